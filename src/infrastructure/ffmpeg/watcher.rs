use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::common::logger::Logger;
use crate::modules::video::error::TranscodeError;
use crate::modules::video::playlist::{SEGMENT_EXTENSION, SegmentInfo};
use crate::modules::video::traits::Bucket;

use super::probe;

/// Ships finished segments from a scratch directory to the processed bucket.
///
/// Only files with the final segment extension are considered; the muxer
/// writes in-progress segments under a temporary name and renames them once
/// complete. Each segment is uploaded once, probed for its duration and
/// then removed locally.
pub struct SegmentWatcher {
    dir: PathBuf,
    bucket: Arc<dyn Bucket>,
    processed_bucket: String,
    remote_prefix: String,
    ffprobe: PathBuf,
    fallback_duration: f64,
    seen: HashSet<String>,
    segments: Vec<SegmentInfo>,
    logger: Logger,
}

impl SegmentWatcher {
    pub fn new(
        dir: PathBuf,
        bucket: Arc<dyn Bucket>,
        processed_bucket: String,
        remote_prefix: String,
        ffprobe: PathBuf,
        fallback_duration: f64,
        logger: Logger,
    ) -> Self {
        Self {
            dir,
            bucket,
            processed_bucket,
            remote_prefix,
            ffprobe,
            fallback_duration,
            seen: HashSet::new(),
            segments: Vec::new(),
            logger,
        }
    }

    /// Upload every finished segment not seen before. Returns how many were shipped.
    pub async fn scan(&mut self) -> Result<usize, TranscodeError> {
        let mut fresh = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(SEGMENT_EXTENSION) && !self.seen.contains(&name) {
                fresh.push(name);
            }
        }

        // seg9.ts before seg10.ts
        fresh.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        for name in &fresh {
            self.ship(name).await?;
        }

        Ok(fresh.len())
    }

    async fn ship(&mut self, name: &str) -> Result<(), TranscodeError> {
        let path = self.dir.join(name);
        let key = format!("{}/{}", self.remote_prefix, name);

        let file = tokio::fs::File::open(&path).await?;
        self.bucket
            .upload_from_reader(&self.processed_bucket, &key, Box::new(file))
            .await?;

        let duration_secs = match probe::probe_duration(&self.ffprobe, &path).await {
            Ok(duration) => duration,
            Err(e) => {
                self.logger.warn(format!(
                    "Could not probe duration of {}, assuming {}s: {}",
                    name, self.fallback_duration, e
                ));
                self.fallback_duration
            }
        };

        self.seen.insert(name.to_string());
        self.segments.push(SegmentInfo {
            name: name.to_string(),
            duration_secs,
        });

        if let Err(e) = tokio::fs::remove_file(&path).await {
            self.logger
                .warn(format!("Failed to remove uploaded segment {}: {}", name, e));
        }

        self.logger
            .debug(format!("Uploaded {} ({:.3}s)", key, duration_secs));
        Ok(())
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<SegmentInfo> {
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::video::testing::MemoryBucket;

    fn watcher(dir: &std::path::Path, bucket: Arc<MemoryBucket>) -> SegmentWatcher {
        SegmentWatcher::new(
            dir.to_path_buf(),
            bucket,
            "processed".into(),
            "videos/ep1/720p".into(),
            // Missing binary exercises the duration fallback.
            PathBuf::from("/nonexistent/ffprobe"),
            10.0,
            Logger::new("test"),
        )
    }

    #[tokio::test]
    async fn ships_finished_segments_in_numeric_order_once() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Arc::new(MemoryBucket::default());
        let mut watcher = watcher(dir.path(), bucket.clone());

        std::fs::write(dir.path().join("seg10.ts"), b"ten").unwrap();
        std::fs::write(dir.path().join("seg9.ts"), b"nine").unwrap();
        std::fs::write(dir.path().join("seg11.ts.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("index.m3u8"), b"#EXTM3U").unwrap();

        assert_eq!(watcher.scan().await.unwrap(), 2);

        let names: Vec<_> = watcher.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["seg9.ts", "seg10.ts"]);
        assert_eq!(
            bucket.object("processed", "videos/ep1/720p/seg9.ts").unwrap(),
            b"nine"
        );
        assert!(!dir.path().join("seg9.ts").exists());
        assert!(dir.path().join("seg11.ts.tmp").exists());

        assert_eq!(watcher.scan().await.unwrap(), 0);
        assert!(
            watcher
                .segments()
                .iter()
                .all(|s| (s.duration_secs - 10.0).abs() < f64::EPSILON)
        );
    }

    #[tokio::test]
    async fn upload_failure_is_reported_and_segment_kept() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Arc::new(MemoryBucket::default());
        bucket.fail_uploads_containing("seg000");
        let mut watcher = watcher(dir.path(), bucket);

        std::fs::write(dir.path().join("seg000.ts"), b"zero").unwrap();

        let err = watcher.scan().await.unwrap_err();
        assert!(matches!(err, TranscodeError::Upload(_)));
        assert!(watcher.segments().is_empty());
    }
}
