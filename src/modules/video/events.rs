use serde::{Deserialize, Serialize};

/// Published by the upload service once a raw video has landed in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub bucket: String,
    #[serde(rename = "object_key", alias = "key")]
    pub key: String,
    #[serde(rename = "episode_id", alias = "episodeId")]
    pub episode_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSuccessEvent {
    #[serde(rename = "epId")]
    pub episode_id: String,
    pub key: String,
    /// Bucket holding the HLS package.
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailedEvent {
    pub key: String,
    #[serde(rename = "epId")]
    pub episode_id: String,
    /// Bucket the source was uploaded to.
    pub bucket: String,
    pub reason: String,
}

impl UploadSuccessEvent {
    pub fn new(event: &UploadEvent, processed_bucket: &str) -> Self {
        Self {
            episode_id: event.episode_id.clone(),
            key: event.key.clone(),
            bucket: processed_bucket.to_string(),
        }
    }
}

impl UploadFailedEvent {
    pub fn new(event: &UploadEvent, reason: impl Into<String>) -> Self {
        Self {
            key: event.key.clone(),
            episode_id: event.episode_id.clone(),
            bucket: event.bucket.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_event_reads_producer_field_names() {
        let event: UploadEvent = serde_json::from_value(json!({
            "bucket": "raw",
            "object_key": "a.mp4",
            "episode_id": "ep1"
        }))
        .unwrap();

        assert_eq!(event.bucket, "raw");
        assert_eq!(event.key, "a.mp4");
        assert_eq!(event.episode_id, "ep1");
    }

    #[test]
    fn upload_event_accepts_short_aliases() {
        let event: UploadEvent =
            serde_json::from_str(r#"{"bucket":"raw","key":"a.mp4","episodeId":"ep1"}"#).unwrap();
        assert_eq!(event.key, "a.mp4");
        assert_eq!(event.episode_id, "ep1");
    }

    #[test]
    fn outcome_events_use_published_field_names() {
        let event = UploadEvent {
            bucket: "raw".into(),
            key: "a.mp4".into(),
            episode_id: "ep1".into(),
        };

        let success = serde_json::to_value(UploadSuccessEvent::new(&event, "processed")).unwrap();
        assert_eq!(success, json!({"epId": "ep1", "key": "a.mp4", "bucket": "processed"}));

        let failed = serde_json::to_value(UploadFailedEvent::new(&event, "encoder crash")).unwrap();
        assert_eq!(
            failed,
            json!({"key": "a.mp4", "epId": "ep1", "bucket": "raw", "reason": "encoder crash"})
        );
    }
}
