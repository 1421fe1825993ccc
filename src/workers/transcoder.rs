use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::common::logger::Logger;
use crate::config::settings::AppConfig;
use crate::infrastructure::ffmpeg::{FfmpegTranscoder, TranscoderConfig};
use crate::modules::video::error::JobError;
use crate::modules::video::events::{UploadEvent, UploadFailedEvent, UploadSuccessEvent};
use crate::modules::video::ladder::{Rendition, ladder_for};
use crate::modules::video::playlist;
use crate::modules::video::traits::{Acknowledger, Bucket, Delivery, Queue, VideoProcessor};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub upload_queue: String,
    pub processed_queue: String,
    pub failed_queue: String,
    pub processed_bucket: String,
    /// How long in-flight jobs may run after shutdown is requested.
    pub shutdown_timeout: Duration,
}

impl ProcessorSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            upload_queue: config.upload_queue.clone(),
            processed_queue: config.processed_queue.clone(),
            failed_queue: config.failed_queue.clone(),
            processed_bucket: config.bucket_processed_name.clone(),
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Turns upload events into HLS packages: probe, fan out one transcode per
/// rendition, write the master playlist, then settle the delivery.
#[derive(Clone)]
pub struct Processor {
    queue: Arc<dyn Queue>,
    bucket: Arc<dyn Bucket>,
    video: Arc<dyn VideoProcessor>,
    settings: ProcessorSettings,
    logger: Logger,
}

impl Processor {
    pub fn new(
        queue: Arc<dyn Queue>,
        bucket: Arc<dyn Bucket>,
        video: Arc<dyn VideoProcessor>,
        settings: ProcessorSettings,
        logger: Logger,
    ) -> Self {
        Self {
            queue,
            bucket,
            video,
            settings,
            logger,
        }
    }

    /// Process one upload. On success the master playlist is in place and the
    /// source object has been deleted; on failure nothing has been cleaned up yet.
    pub async fn process_video(&self, event: &UploadEvent) -> Result<(), JobError> {
        let logger = self.logger.scoped(&event.episode_id);

        let height = self
            .video
            .probe_height(&event.bucket, &event.key)
            .await
            .map_err(JobError::Probe)?;

        let ladder = ladder_for(height);
        logger.info(format!(
            "Source is {}p, encoding {}",
            height,
            ladder
                .iter()
                .map(Rendition::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));

        // Shared by every rendition of this job and no other.
        let cancel = CancellationToken::new();
        let shared_event = Arc::new(event.clone());
        let mut tasks = JoinSet::new();

        for &rendition in &ladder {
            let video = self.video.clone();
            let cancel = cancel.clone();
            let event = shared_event.clone();
            tasks.spawn(async move {
                let result = video.transcode(&cancel, &event, rendition).await;
                (rendition, result)
            });
        }

        let mut first_error: Option<JobError> = None;

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((rendition, Ok(()))) => {
                    logger.info(format!("{} complete", rendition));
                    None
                }
                Ok((rendition, Err(source))) => {
                    if source.is_cancelled() {
                        logger.debug(format!("{} cancelled", rendition));
                    } else {
                        logger.warn(format!("{} failed: {}", rendition, source));
                    }
                    Some(JobError::Rendition { rendition, source })
                }
                Err(e) => Some(JobError::TaskAborted(e.to_string())),
            };

            if let Some(err) = failure {
                if first_error.is_none() {
                    cancel.cancel();
                    first_error = Some(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        self.upload_master_playlist(&event.episode_id, &ladder)
            .await?;

        self.bucket
            .delete_object(&event.bucket, &event.key)
            .await
            .map_err(JobError::SourceCleanup)?;

        logger.info("HLS package complete, source removed");
        Ok(())
    }

    async fn upload_master_playlist(
        &self,
        episode_id: &str,
        ladder: &[Rendition],
    ) -> Result<(), JobError> {
        let body = playlist::master_playlist(ladder);
        self.bucket
            .upload_from_reader(
                &self.settings.processed_bucket,
                &playlist::master_playlist_key(episode_id),
                Box::new(std::io::Cursor::new(body.into_bytes())),
            )
            .await
            .map_err(JobError::MasterPlaylist)
    }

    /// Run one delivery to completion and settle it with the broker.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let Delivery { event, acker } = delivery;
        let logger = self.logger.scoped(&event.episode_id);

        logger.info(format!("Received upload {}/{}", event.bucket, event.key));

        match self.process_video(&event).await {
            Ok(()) => self.complete(&event, acker.as_ref(), &logger).await,
            Err(err) => self.fail(&event, &err, acker.as_ref(), &logger).await,
        }
    }

    async fn complete(&self, event: &UploadEvent, acker: &dyn Acknowledger, logger: &Logger) {
        let success = UploadSuccessEvent::new(event, &self.settings.processed_bucket);

        match self.publish(&self.settings.processed_queue, &success).await {
            Ok(()) => {
                if let Err(e) = acker.ack().await {
                    logger.error(format!("{:#}", e));
                }
                logger.info("Processing complete");
            }
            Err(e) => {
                // TODO: the source object is already gone, so the redelivered job will fail its probe.
                logger.error(format!(
                    "Failed to publish success event, requeueing: {:#}",
                    e
                ));
                if let Err(e) = acker.nack(true).await {
                    logger.error(format!("{:#}", e));
                }
            }
        }
    }

    async fn fail(
        &self,
        event: &UploadEvent,
        err: &JobError,
        acker: &dyn Acknowledger,
        logger: &Logger,
    ) {
        logger.error(format!("Processing failed: {}", err));

        let prefix = playlist::episode_prefix(&event.episode_id);
        if let Err(e) = self
            .bucket
            .delete_prefix(&self.settings.processed_bucket, &prefix)
            .await
        {
            logger.warn(format!("Failed to remove partial output {}: {}", prefix, e));
        }

        if let Err(e) = self.bucket.delete_object(&event.bucket, &event.key).await {
            logger.warn(format!("Failed to remove source {}: {}", event.key, e));
        }

        let failed = UploadFailedEvent::new(event, err.to_string());
        if let Err(e) = self.publish(&self.settings.failed_queue, &failed).await {
            logger.error(format!("Failed to publish failure event: {:#}", e));
        }

        if let Err(e) = acker.nack(false).await {
            logger.error(format!("{:#}", e));
        }
    }

    async fn publish<T: Serialize>(&self, queue: &str, event: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.queue.publish(queue, &payload).await
    }

    /// Consume the upload queue until `shutdown` fires or the broker closes
    /// the consumer. Each delivery is handled on its own task.
    pub async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut deliveries = self.queue.consume(&self.settings.upload_queue).await?;
        self.logger
            .info(format!("Listening on '{}'", self.settings.upload_queue));

        let mut jobs = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.logger.info("Shutdown requested, no longer accepting uploads");
                    break;
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        self.logger.error(format!("Job task failed: {}", e));
                    }
                }
                next = deliveries.next() => match next {
                    Some(delivery) => {
                        let processor = self.clone();
                        jobs.spawn(async move { processor.handle_delivery(delivery).await });
                    }
                    None => {
                        self.logger.warn("Upload consumer closed");
                        break;
                    }
                },
            }
        }

        drop(deliveries);
        self.drain(jobs).await;
        Ok(())
    }

    async fn drain(&self, mut jobs: JoinSet<()>) {
        if jobs.is_empty() {
            return;
        }

        self.logger.info(format!(
            "Waiting up to {:?} for {} in-flight jobs",
            self.settings.shutdown_timeout,
            jobs.len()
        ));

        let finished = async {
            while jobs.join_next().await.is_some() {}
        };

        if tokio::time::timeout(self.settings.shutdown_timeout, finished)
            .await
            .is_err()
        {
            self.logger.warn(format!(
                "Aborting {} unfinished jobs; they will be redelivered",
                jobs.len()
            ));
            jobs.shutdown().await;
        }
    }
}

pub async fn start_transcoder_worker(
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bucket: Arc<dyn Bucket> = Arc::new(state.storage.clone());
    let video = FfmpegTranscoder::new(
        bucket.clone(),
        TranscoderConfig::from_app_config(&state.config),
        Logger::new("ffmpeg"),
    );

    let processor = Processor::new(
        Arc::new(state.queue.clone()),
        bucket,
        Arc::new(video),
        ProcessorSettings::from_app_config(&state.config),
        Logger::new("processor"),
    );

    processor.listen(shutdown).await
}
