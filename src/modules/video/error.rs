use thiserror::Error;

use super::ladder::Rendition;
use crate::infrastructure::storage::error::StorageError;

/// Failure of a single probe or per-rendition transcode.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("source probe failed: {0}")]
    SourceProbe(String),

    #[error("failed to read source: {0}")]
    SourceRead(String),

    #[error("failed to start {program}: {source}")]
    EncoderStart {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with {status}: {detail}")]
    EncoderExit { status: String, detail: String },

    #[error("encoder produced no segments")]
    NoSegments,

    #[error(transparent)]
    Upload(#[from] StorageError),

    #[error("cancelled after a sibling rendition failed")]
    Cancelled,

    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranscodeError::Cancelled)
    }
}

/// Terminal error of one job; its `Display` becomes the failure event reason.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to detect source height: {0}")]
    Probe(#[source] TranscodeError),

    #[error("{rendition} failed: {source}")]
    Rendition {
        rendition: Rendition,
        #[source]
        source: TranscodeError,
    },

    #[error("rendition task aborted: {0}")]
    TaskAborted(String),

    #[error("failed to upload master playlist: {0}")]
    MasterPlaylist(#[source] StorageError),

    #[error("failed to delete source object: {0}")]
    SourceCleanup(#[source] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendition_error_carries_encoder_detail() {
        let err = JobError::Rendition {
            rendition: Rendition::P1080,
            source: TranscodeError::EncoderExit {
                status: "exit status: 1".into(),
                detail: "encoder crash".into(),
            },
        };

        let reason = err.to_string();
        assert!(reason.starts_with("1080p failed"));
        assert!(reason.contains("encoder crash"));
    }
}
