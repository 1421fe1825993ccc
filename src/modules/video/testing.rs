//! In-memory collaborators for tests.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::error::TranscodeError;
use super::events::UploadEvent;
use super::ladder::Rendition;
use super::playlist::{self, SegmentInfo};
use super::traits::{Acknowledger, Bucket, Delivery, ObjectReader, Queue, VideoProcessor};
use crate::infrastructure::storage::error::{StorageError, StorageResult};

type ObjectKey = (String, String);

#[derive(Default)]
pub struct MemoryBucket {
    objects: Mutex<BTreeMap<ObjectKey, Vec<u8>>>,
    deleted: Mutex<Vec<ObjectKey>>,
    prefix_deletes: Mutex<Vec<ObjectKey>>,
    fail_uploads_containing: Mutex<Option<String>>,
    fail_deletes: Mutex<bool>,
}

impl MemoryBucket {
    pub fn with_object(self, bucket: &str, key: &str, data: &[u8]) -> Self {
        self.put(bucket, key, data.to_vec());
        self
    }

    pub fn put(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_string(&self, bucket: &str, key: &str) -> Option<String> {
        self.object(bucket, key)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn deleted_objects(&self) -> Vec<ObjectKey> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn deleted_prefixes(&self) -> Vec<ObjectKey> {
        self.prefix_deletes.lock().unwrap().clone()
    }

    pub fn fail_uploads_containing(&self, needle: &str) {
        *self.fail_uploads_containing.lock().unwrap() = Some(needle.to_string());
    }

    /// Make every later `delete_object` and `delete_prefix` call fail.
    pub fn fail_deletes(&self) {
        *self.fail_deletes.lock().unwrap() = true;
    }

    fn deletes_fail(&self) -> bool {
        *self.fail_deletes.lock().unwrap()
    }

    fn read(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.object(bucket, key)
            .ok_or_else(|| StorageError::download_failed(key, "NoSuchKey"))
    }
}

fn parse_range(range: &str, len: usize) -> (usize, usize) {
    let bounds = range.trim_start_matches("bytes=");
    let (start, end) = bounds.split_once('-').unwrap_or((bounds, ""));
    let start = start.parse::<usize>().unwrap_or(0).min(len);
    let end = end
        .parse::<usize>()
        .map(|e| (e + 1).min(len))
        .unwrap_or(len);
    (start, end.max(start))
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        Ok(Box::new(Cursor::new(self.read(bucket, key)?)))
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: &str,
    ) -> StorageResult<ObjectReader> {
        let data = self.read(bucket, key)?;
        let (start, end) = parse_range(range, data.len());
        Ok(Box::new(Cursor::new(data[start..end].to_vec())))
    }

    async fn upload_from_reader(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ObjectReader,
    ) -> StorageResult<()> {
        let fail = self.fail_uploads_containing.lock().unwrap().clone();
        if let Some(needle) = fail {
            if key.contains(&needle) {
                return Err(StorageError::upload_failed(key, "injected failure"));
            }
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.put(bucket, key, data);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        if self.deletes_fail() {
            return Err(StorageError::delete_failed(key, "injected failure"));
        }
        let id = (bucket.to_string(), key.to_string());
        self.objects.lock().unwrap().remove(&id);
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()> {
        if self.deletes_fail() {
            return Err(StorageError::delete_failed(prefix, "injected failure"));
        }
        self.objects
            .lock()
            .unwrap()
            .retain(|(b, k), _| !(b == bucket && k.starts_with(prefix)));
        self.prefix_deletes
            .lock()
            .unwrap()
            .push((bucket.to_string(), prefix.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

#[derive(Clone, Default)]
pub struct RecordingAcker {
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl RecordingAcker {
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> anyhow::Result<()> {
        self.settlements.lock().unwrap().push(Settlement::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> anyhow::Result<()> {
        self.settlements
            .lock()
            .unwrap()
            .push(Settlement::Nack { requeue });
        Ok(())
    }
}

pub fn delivery(event: UploadEvent) -> (Delivery, RecordingAcker) {
    let acker = RecordingAcker::default();
    let delivery = Delivery {
        event,
        acker: Box::new(acker.clone()),
    };
    (delivery, acker)
}

#[derive(Default)]
pub struct RecordingQueue {
    published: Mutex<Vec<(String, serde_json::Value)>>,
    pending: Mutex<Vec<Delivery>>,
    fail_publish_to: Mutex<Option<String>>,
}

impl RecordingQueue {
    pub fn enqueue(&self, delivery: Delivery) {
        self.pending.lock().unwrap().push(delivery);
    }

    pub fn fail_publish_to(&self, queue: &str) {
        *self.fail_publish_to.lock().unwrap() = Some(queue.to_string());
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, queue: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    async fn consume(&self, _queue: &str) -> anyhow::Result<BoxStream<'static, Delivery>> {
        let pending: Vec<Delivery> = self.pending.lock().unwrap().drain(..).collect();
        Ok(stream::iter(pending).boxed())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> anyhow::Result<()> {
        if self.fail_publish_to.lock().unwrap().as_deref() == Some(queue) {
            anyhow::bail!("broker unavailable");
        }
        let value = serde_json::from_slice(payload)?;
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), value));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Runs until the job's cancellation token fires.
    WaitForCancel,
}

/// Video processor whose per-rendition outcome is scripted. Successful
/// renditions write a one-segment variant into `bucket`.
pub struct ScriptedVideo {
    height: Result<u32, String>,
    behaviors: HashMap<Rendition, Behavior>,
    bucket: Arc<MemoryBucket>,
    processed_bucket: String,
    calls: Mutex<Vec<Rendition>>,
    cancelled: Mutex<Vec<Rendition>>,
}

impl ScriptedVideo {
    pub fn new(height: Result<u32, String>, bucket: Arc<MemoryBucket>, processed_bucket: &str) -> Self {
        Self {
            height,
            behaviors: HashMap::new(),
            bucket,
            processed_bucket: processed_bucket.to_string(),
            calls: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, rendition: Rendition, behavior: Behavior) -> Self {
        self.behaviors.insert(rendition, behavior);
        self
    }

    pub fn calls(&self) -> Vec<Rendition> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<Rendition> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoProcessor for ScriptedVideo {
    async fn probe_height(&self, _bucket: &str, _key: &str) -> Result<u32, TranscodeError> {
        self.height.clone().map_err(TranscodeError::SourceProbe)
    }

    async fn transcode(
        &self,
        cancel: &CancellationToken,
        event: &UploadEvent,
        rendition: Rendition,
    ) -> Result<(), TranscodeError> {
        self.calls.lock().unwrap().push(rendition);

        let behavior = self
            .behaviors
            .get(&rendition)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => {
                let prefix = playlist::variant_prefix(&event.episode_id, rendition);
                self.bucket
                    .put(&self.processed_bucket, &format!("{}/seg000.ts", prefix), vec![0; 4]);
                let body = playlist::variant_playlist(&[SegmentInfo {
                    name: "seg000.ts".into(),
                    duration_secs: 4.0,
                }]);
                self.bucket.put(
                    &self.processed_bucket,
                    &format!("{}/{}", prefix, playlist::VARIANT_PLAYLIST_NAME),
                    body.into_bytes(),
                );
                Ok(())
            }
            Behavior::Fail(detail) => Err(TranscodeError::EncoderExit {
                status: "exit status: 1".into(),
                detail,
            }),
            Behavior::WaitForCancel => {
                let prefix = playlist::variant_prefix(&event.episode_id, rendition);
                self.bucket
                    .put(&self.processed_bucket, &format!("{}/seg000.ts", prefix), vec![0; 4]);
                cancel.cancelled().await;
                self.cancelled.lock().unwrap().push(rendition);
                Err(TranscodeError::Cancelled)
            }
        }
    }
}
