use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::{self, EnvKey, EnvSource, MissingVar, ProcessEnv};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub rabbitmq_url: String,
    pub upload_queue: String,
    pub processed_queue: String,
    pub failed_queue: String,
    pub prefetch_count: u16,
    pub bucket_url: String,
    pub bucket_access_key: String,
    pub bucket_secret_key: String,
    pub bucket_region: String,
    pub bucket_processed_name: String,
    pub enable_gpu_process: bool,
    pub enable_gpu_scale_npp: bool,
    pub scratch_dir: PathBuf,
    pub segment_seconds: u32,
    pub scan_interval: Duration,
    pub probe_range_bytes: u64,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub shutdown_timeout: Duration,
    pub log_json: bool,
}

impl AppConfig {
    pub fn new() -> Result<Self, MissingVar> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &impl EnvSource) -> Result<Self, MissingVar> {
        Ok(Self {
            server_port: env::get_parsed(source, EnvKey::ServerPort, 8080),
            rabbitmq_url: env::get(source, EnvKey::RabbitMqUrl)?,
            upload_queue: env::get(source, EnvKey::UploadQueue)?,
            processed_queue: env::get(source, EnvKey::ProcessedQueue)?,
            failed_queue: env::get(source, EnvKey::FailedQueue)?,
            prefetch_count: env::get_parsed(source, EnvKey::PrefetchCount, 0),
            bucket_url: env::get(source, EnvKey::BucketUrl)?,
            bucket_access_key: env::get(source, EnvKey::BucketAccessKey)?,
            bucket_secret_key: env::get(source, EnvKey::BucketSecretKey)?,
            bucket_region: env::get_or(source, EnvKey::BucketRegion, "us-east-1"),
            bucket_processed_name: env::get(source, EnvKey::BucketProcessedName)?,
            enable_gpu_process: env::get_flag(source, EnvKey::EnableGpuProcess, false),
            enable_gpu_scale_npp: env::get_flag(source, EnvKey::EnableGpuScaleNpp, false),
            scratch_dir: env::get_or(source, EnvKey::ScratchDir, "/dev/shm").into(),
            segment_seconds: env::get_parsed(source, EnvKey::SegmentSeconds, 10u32).max(1),
            scan_interval: Duration::from_millis(
                env::get_parsed(source, EnvKey::ScanIntervalMs, 50u64).max(1),
            ),
            probe_range_bytes: env::get_parsed(source, EnvKey::ProbeRangeBytes, 2_097_152),
            ffmpeg_bin: env::get_or(source, EnvKey::FfmpegBin, "ffmpeg").into(),
            ffprobe_bin: env::get_or(source, EnvKey::FfprobeBin, "ffprobe").into(),
            shutdown_timeout: Duration::from_secs(env::get_parsed(
                source,
                EnvKey::ShutdownTimeoutSecs,
                30,
            )),
            log_json: env::get_or(source, EnvKey::LogFormat, "pretty").eq_ignore_ascii_case("json"),
        })
    }
}
