use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::command::{self, EncoderBackend, HlsCommand};
use super::probe;
use super::watcher::SegmentWatcher;
use crate::common::logger::Logger;
use crate::config::settings::AppConfig;
use crate::modules::video::error::TranscodeError;
use crate::modules::video::events::UploadEvent;
use crate::modules::video::ladder::Rendition;
use crate::modules::video::playlist::{self, VARIANT_PLAYLIST_NAME};
use crate::modules::video::traits::{Bucket, VideoProcessor};

const STDERR_TAIL_LINES: usize = 20;
const FEEDER_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub processed_bucket: String,
    pub scratch_dir: PathBuf,
    pub backend: EncoderBackend,
    pub segment_seconds: u32,
    pub scan_interval: Duration,
    pub probe_range_bytes: u64,
}

impl TranscoderConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            processed_bucket: config.bucket_processed_name.clone(),
            scratch_dir: config.scratch_dir.clone(),
            backend: EncoderBackend::from_flags(
                config.enable_gpu_process,
                config.enable_gpu_scale_npp,
            ),
            segment_seconds: config.segment_seconds,
            scan_interval: config.scan_interval,
            probe_range_bytes: config.probe_range_bytes,
        }
    }
}

/// Streams a source object through ffmpeg and uploads HLS segments as the
/// encoder finishes them.
pub struct FfmpegTranscoder {
    bucket: Arc<dyn Bucket>,
    config: TranscoderConfig,
    logger: Logger,
}

impl FfmpegTranscoder {
    pub fn new(bucket: Arc<dyn Bucket>, config: TranscoderConfig, logger: Logger) -> Self {
        Self {
            bucket,
            config,
            logger,
        }
    }

    async fn probe_range(&self, bucket: &str, key: &str) -> Result<u32, TranscodeError> {
        let range = format!("bytes=0-{}", self.config.probe_range_bytes);
        let source = self
            .bucket
            .get_object_range(bucket, key, &range)
            .await
            .map_err(|e| TranscodeError::SourceProbe(e.to_string()))?;
        probe::probe_height(&self.config.ffprobe_bin, source).await
    }

    async fn probe_full(&self, bucket: &str, key: &str) -> Result<u32, TranscodeError> {
        let source = self
            .bucket
            .get_object(bucket, key)
            .await
            .map_err(|e| TranscodeError::SourceProbe(e.to_string()))?;
        probe::probe_height(&self.config.ffprobe_bin, source).await
    }

    async fn scratch_dir_for(
        &self,
        episode_id: &str,
        rendition: Rendition,
    ) -> std::io::Result<TempDir> {
        let root = self.config.scratch_dir.clone();
        let prefix = format!("{}-{}-", sanitize(episode_id), rendition);

        tokio::fs::create_dir_all(&root).await?;
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)
        })
        .await
        .map_err(std::io::Error::other)?
    }

    async fn encode(
        &self,
        cancel: &CancellationToken,
        event: &UploadEvent,
        rendition: Rendition,
        dir: &Path,
        logger: &Logger,
    ) -> Result<(), TranscodeError> {
        let source = self
            .bucket
            .get_object(&event.bucket, &event.key)
            .await
            .map_err(|e| TranscodeError::SourceRead(e.to_string()))?;

        let hls = HlsCommand::new(
            self.config.backend,
            rendition.height(),
            self.config.segment_seconds,
            dir,
        );
        let program = self.config.ffmpeg_bin.display().to_string();

        let mut child = Command::new(&self.config.ffmpeg_bin)
            .args(hls.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::EncoderStart {
                program: program.clone(),
                source,
            })?;

        let (Some(stdin), Some(stderr)) = (child.stdin.take(), child.stderr.take()) else {
            kill_and_reap(&mut child).await;
            return Err(TranscodeError::EncoderStart {
                program,
                source: std::io::Error::other("encoder pipes not captured"),
            });
        };

        logger.debug(format!("Encoder started (pid {:?})", child.id()));

        let mut feeder = command::spawn_stdin_feeder(source, stdin);
        let stderr_tail = command::spawn_stderr_tail(stderr, STDERR_TAIL_LINES);

        let mut watcher = SegmentWatcher::new(
            dir.to_path_buf(),
            self.bucket.clone(),
            self.config.processed_bucket.clone(),
            playlist::variant_prefix(&event.episode_id, rendition),
            self.config.ffprobe_bin.clone(),
            f64::from(self.config.segment_seconds),
            logger.clone(),
        );

        let status = match self.supervise(&mut child, cancel, &mut watcher, logger).await {
            Ok(status) => status,
            Err(e) => {
                kill_and_reap(&mut child).await;
                feeder.abort();
                stderr_tail.abort();
                return Err(e);
            }
        };

        if !status.success() {
            feeder.abort();
            let detail = command::collect_stderr_tail(stderr_tail).await;
            return Err(TranscodeError::EncoderExit {
                status: status.to_string(),
                detail,
            });
        }

        match tokio::time::timeout(FEEDER_GRACE, &mut feeder).await {
            Ok(Ok(Ok(bytes))) => logger.debug(format!("Streamed {} source bytes", bytes)),
            Ok(Ok(Err(e))) => return Err(TranscodeError::SourceRead(e.to_string())),
            Ok(Err(e)) => return Err(TranscodeError::SourceRead(e.to_string())),
            Err(_) => feeder.abort(),
        }
        stderr_tail.abort();

        // Segments finished between the last tick and the exit.
        watcher.scan().await?;

        let segments = watcher.into_segments();
        if segments.is_empty() {
            return Err(TranscodeError::NoSegments);
        }

        let key = format!(
            "{}/{}",
            playlist::variant_prefix(&event.episode_id, rendition),
            VARIANT_PLAYLIST_NAME
        );
        let body = playlist::variant_playlist(&segments);
        self.bucket
            .upload_from_reader(
                &self.config.processed_bucket,
                &key,
                Box::new(Cursor::new(body.into_bytes())),
            )
            .await?;

        logger.info(format!("Variant complete with {} segments", segments.len()));
        Ok(())
    }

    /// Poll for finished segments until the encoder exits or the job is cancelled.
    async fn supervise(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
        watcher: &mut SegmentWatcher,
        logger: &Logger,
    ) -> Result<ExitStatus, TranscodeError> {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    logger.info("Cancelled, stopping encoder");
                    return Err(TranscodeError::Cancelled);
                }
                status = child.wait() => return Ok(status?),
                _ = ticker.tick() => {
                    watcher.scan().await?;
                }
            }
        }
    }
}

#[async_trait]
impl VideoProcessor for FfmpegTranscoder {
    async fn probe_height(&self, bucket: &str, key: &str) -> Result<u32, TranscodeError> {
        match self.probe_range(bucket, key).await {
            Ok(height) => Ok(height),
            Err(e) => {
                self.logger.debug(format!(
                    "Partial probe of {} failed ({}), probing the full object",
                    key, e
                ));
                self.probe_full(bucket, key).await
            }
        }
    }

    async fn transcode(
        &self,
        cancel: &CancellationToken,
        event: &UploadEvent,
        rendition: Rendition,
    ) -> Result<(), TranscodeError> {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        let logger = self.logger.scoped(&event.episode_id).scoped(rendition);
        let scratch = self.scratch_dir_for(&event.episode_id, rendition).await?;

        let result = self
            .encode(cancel, event, rendition, scratch.path(), &logger)
            .await;

        match tokio::task::spawn_blocking(move || scratch.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => logger.warn(format!("Failed to remove scratch directory: {}", e)),
            Err(e) => logger.warn(format!("Scratch cleanup task failed: {}", e)),
        }

        result
    }
}

async fn kill_and_reap(child: &mut Child) {
    // Fails only if the process already exited, which is the goal.
    let _ = child.kill().await;
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
