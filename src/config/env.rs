use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKey {
    ServerPort,
    RabbitMqUrl,
    UploadQueue,
    ProcessedQueue,
    FailedQueue,
    PrefetchCount,
    BucketUrl,
    BucketAccessKey,
    BucketSecretKey,
    BucketRegion,
    BucketProcessedName,
    EnableGpuProcess,
    EnableGpuScaleNpp,
    ScratchDir,
    SegmentSeconds,
    ScanIntervalMs,
    ProbeRangeBytes,
    FfmpegBin,
    FfprobeBin,
    ShutdownTimeoutSecs,
    LogFormat,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "PORT",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::UploadQueue => "UPLOAD_QUEUE_NAME",
            EnvKey::ProcessedQueue => "PROCESSED_VIDEO_QUEUE_NAME",
            EnvKey::FailedQueue => "FAILED_PROCESSED_VIDEO_QUEUE_NAME",
            EnvKey::PrefetchCount => "UPLOAD_PREFETCH_COUNT",
            EnvKey::BucketUrl => "BUCKET_URL",
            EnvKey::BucketAccessKey => "BUCKET_ACCESS_KEY",
            EnvKey::BucketSecretKey => "BUCKET_ACCESS_PASSWORD",
            EnvKey::BucketRegion => "BUCKET_REGION",
            EnvKey::BucketProcessedName => "BUCKET_PROCESSED_NAME",
            EnvKey::EnableGpuProcess => "ENABLE_GPU_PROCESS",
            EnvKey::EnableGpuScaleNpp => "ENABLE_GPU_SCALE_NPP",
            EnvKey::ScratchDir => "SCRATCH_DIR",
            EnvKey::SegmentSeconds => "HLS_SEGMENT_SECONDS",
            EnvKey::ScanIntervalMs => "SEGMENT_SCAN_INTERVAL_MS",
            EnvKey::ProbeRangeBytes => "PROBE_RANGE_BYTES",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::FfprobeBin => "FFPROBE_BIN",
            EnvKey::ShutdownTimeoutSecs => "SHUTDOWN_TIMEOUT_SECS",
            EnvKey::LogFormat => "LOG_FORMAT",
        }
    }
}

/// Source of raw configuration values. The process environment in production,
/// a map in tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for std::collections::HashMap<&str, &str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("missing required environment variable {0}")]
pub struct MissingVar(pub &'static str);

pub fn get(source: &impl EnvSource, key: EnvKey) -> Result<String, MissingVar> {
    source
        .var(key.as_str())
        .filter(|v| !v.trim().is_empty())
        .ok_or(MissingVar(key.as_str()))
}

pub fn get_or(source: &impl EnvSource, key: EnvKey, default: &str) -> String {
    get(source, key).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(source: &impl EnvSource, key: EnvKey, default: T) -> T {
    match get(source, key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Accepts the usual spellings of a boolean flag ("true", "1", "yes", "on").
pub fn get_flag(source: &impl EnvSource, key: EnvKey, default: bool) -> bool {
    match get(source, key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
