//! Session metadata types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::DEFAULT_USER_TYPE;

/// Metadata record for a session, stored alongside its message log.
///
/// `message_count` tracks the number of lines ever appended to the log.
/// The summary pointer fields (`has_summary`, `last_summary_uuid`,
/// `last_summary_time`, `last_summary_index`) are set together whenever a
/// summary message is persisted, and only then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Unique session ID
    pub session_id: String,
    /// User-provided or auto-generated title
    pub title: Option<String>,
    /// Creation timestamp
    pub created: DateTime<Utc>,
    /// Last update timestamp
    pub updated: DateTime<Utc>,
    /// Number of messages appended to the log
    pub message_count: u64,
    /// Working directory the session was created in
    pub cwd: PathBuf,
    /// Writer version that created the session
    pub version: String,
    /// User type
    pub user_type: String,
    /// Whether at least one summary message has been persisted
    pub has_summary: bool,
    /// Uuid of the most recent summary message
    pub last_summary_uuid: Option<String>,
    /// When the most recent summary was persisted
    pub last_summary_time: Option<DateTime<Utc>>,
    /// Log line index of the most recent summary message
    pub last_summary_index: Option<u64>,
}

impl SessionMetadata {
    /// Create metadata for a new session with default values.
    pub fn new(title: Option<String>, cwd: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            title,
            created: now,
            updated: now,
            message_count: 0,
            cwd,
            version: env!("CARGO_PKG_VERSION").to_string(),
            user_type: DEFAULT_USER_TYPE.to_string(),
            has_summary: false,
            last_summary_uuid: None,
            last_summary_time: None,
            last_summary_index: None,
        }
    }

    /// Record that a summary message was persisted at the given log index.
    pub fn record_summary(&mut self, uuid: impl Into<String>, index: u64) {
        self.has_summary = true;
        self.last_summary_uuid = Some(uuid.into());
        self.last_summary_time = Some(Utc::now());
        self.last_summary_index = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_has_no_summary() {
        let meta = SessionMetadata::new(Some("test".to_string()), PathBuf::from("/tmp"));
        assert_eq!(meta.message_count, 0);
        assert!(!meta.has_summary);
        assert!(meta.last_summary_uuid.is_none());
        assert!(meta.last_summary_index.is_none());
    }

    #[test]
    fn test_record_summary_sets_pointer_fields_together() {
        let mut meta = SessionMetadata::new(None, PathBuf::from("/tmp"));
        meta.record_summary("u3", 2);

        assert!(meta.has_summary);
        assert_eq!(meta.last_summary_uuid.as_deref(), Some("u3"));
        assert_eq!(meta.last_summary_index, Some(2));
        assert!(meta.last_summary_time.is_some());
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let meta = SessionMetadata::new(Some("round trip".to_string()), PathBuf::from("/work"));
        let json = serde_json::to_string_pretty(&meta).unwrap();
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"messageCount\""));
        assert!(json.contains("\"hasSummary\""));

        let parsed: SessionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }
}
