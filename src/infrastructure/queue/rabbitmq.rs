use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use lapin::{
    acker::Acker, options::*, publisher_confirm::Confirmation, types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::modules::video::events::UploadEvent;
use crate::modules::video::traits::{Acknowledger, Delivery, Queue};

const CONSUMER_TAG: &str = "process_video_worker";

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    prefetch_count: u16,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> Result<(Connection, Channel)> {
        info!("Connecting to RabbitMQ");
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))?;

        // Without confirm mode every publish resolves as NotRequested.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        info!("Connected to RabbitMQ");
        Ok((conn, channel))
    }

    /// `prefetch_count` bounds unacknowledged deliveries per consumer; 0 leaves it unbounded.
    pub async fn new(url: &str, prefetch_count: u16) -> Result<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            prefetch_count,
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    async fn reconnect(&self) -> Result<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url).await?;
        *self.conn.lock().await = conn;
        *self.channel.lock().await = channel;
        Ok(())
    }

    async fn declare(channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue, e))?;
        Ok(())
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, queue).await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm publication: {}", e))?;

        confirmed(queue, confirmation)
    }
}

/// Only a broker ack counts as durably published.
fn confirmed(queue: &str, confirmation: Confirmation) -> Result<()> {
    if confirmation.is_ack() {
        Ok(())
    } else if confirmation.is_nack() {
        Err(anyhow!("Broker rejected message published to {}", queue))
    } else {
        Err(anyhow!("Publish to {} was not confirmed by the broker", queue))
    }
}

#[async_trait]
impl Queue for RabbitMqService {
    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, queue).await?;

        if self.prefetch_count > 0 {
            channel
                .basic_qos(self.prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| anyhow!("Failed to set prefetch count: {}", e))?;
        }

        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        // The consumer stream does not borrow the channel.
        drop(channel);

        let deliveries = consumer.filter_map(|delivery| async move {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("Consumer error: {}", e);
                    return None;
                }
            };

            match serde_json::from_slice::<UploadEvent>(&delivery.data) {
                Ok(event) => Some(Delivery {
                    event,
                    acker: Box::new(RabbitAcker(delivery.acker.clone())),
                }),
                Err(e) => {
                    error!("Discarding undecodable upload event: {}", e);
                    let reject = BasicNackOptions {
                        requeue: false,
                        ..BasicNackOptions::default()
                    };
                    if let Err(e) = delivery.acker.nack(reject).await {
                        error!("Failed to reject message: {}", e);
                    }
                    None
                }
            }
        });

        Ok(deliveries.boxed())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if let Err(e) = self.publish_internal(queue, payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(queue, payload).await?;
        }

        Ok(())
    }
}

struct RabbitAcker(Acker);

#[async_trait]
impl Acknowledger for RabbitAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Failed to ack message: {}", e))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        let options = BasicNackOptions {
            requeue,
            ..BasicNackOptions::default()
        };
        self.0
            .nack(options)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Failed to nack message: {}", e))
    }
}
