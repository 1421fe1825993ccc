use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Download of {key} failed: {message}")]
    DownloadFailed { key: String, message: String },

    #[error("Upload of {key} failed: {message}")]
    UploadFailed { key: String, message: String },

    #[error("Delete of {key} failed: {message}")]
    DeleteFailed { key: String, message: String },

    #[error("Listing {prefix} failed: {message}")]
    ListFailed { prefix: String, message: String },

    #[error("Failed to create bucket {bucket}: {message}")]
    BucketCreateFailed { bucket: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn download_failed(key: impl Into<String>, message: impl ToString) -> Self {
        Self::DownloadFailed {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn upload_failed(key: impl Into<String>, message: impl ToString) -> Self {
        Self::UploadFailed {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn delete_failed(key: impl Into<String>, message: impl ToString) -> Self {
        Self::DeleteFailed {
            key: key.into(),
            message: message.to_string(),
        }
    }
}
