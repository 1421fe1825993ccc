//! Collaborator seams of the video pipeline.
//!
//! The orchestrator only talks to the broker, the object store and the
//! encoder through these traits, so each can be swapped for an in-memory
//! fake in tests.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use super::error::TranscodeError;
use super::events::UploadEvent;
use super::ladder::Rendition;
use crate::infrastructure::storage::error::StorageResult;

pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait Bucket: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader>;

    /// `range` is an HTTP byte range such as `bytes=0-2097152`.
    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: &str,
    ) -> StorageResult<ObjectReader>;

    async fn upload_from_reader(
        &self,
        bucket: &str,
        key: &str,
        reader: ObjectReader,
    ) -> StorageResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Delete every object whose key starts with `prefix`.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> anyhow::Result<()>;
    async fn nack(&self, requeue: bool) -> anyhow::Result<()>;
}

pub struct Delivery {
    pub event: UploadEvent,
    pub acker: Box<dyn Acknowledger>,
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Start consuming `queue`. Payloads that do not decode as an
    /// [`UploadEvent`] are rejected by the implementation and never yielded.
    async fn consume(&self, queue: &str) -> anyhow::Result<BoxStream<'static, Delivery>>;

    async fn publish(&self, queue: &str, payload: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait VideoProcessor: Send + Sync {
    /// Pixel height of the source's first video stream.
    async fn probe_height(&self, bucket: &str, key: &str) -> Result<u32, TranscodeError>;

    /// Produce and upload one complete HLS variant. Returns
    /// [`TranscodeError::Cancelled`] once `cancel` fires.
    async fn transcode(
        &self,
        cancel: &CancellationToken,
        event: &UploadEvent,
        rendition: Rendition,
    ) -> Result<(), TranscodeError>;
}
