//! Session storage implementation.
//!
//! Filesystem-backed storage: one directory per session containing a
//! pretty-printed metadata record and an append-only JSONL message log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use memoir_core::{ConversationMessage, SessionMetadata};

/// Metadata file name inside a session directory.
const METADATA_FILE: &str = "metadata.json";

/// Message log file name inside a session directory.
const MESSAGES_FILE: &str = "messages.jsonl";

/// Errors that can occur during session storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Storage path error: {0}")]
    Path(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Summary pointer written into metadata when a summary message lands.
#[derive(Debug, Clone)]
pub struct SummaryPointer {
    /// Uuid of the summary message
    pub uuid: String,
    /// When it was persisted
    pub time: DateTime<Utc>,
    /// Its line index in the log
    pub index: u64,
}

/// Partial update applied to a session's metadata record.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    /// New title
    pub title: Option<String>,
    /// New `updated` timestamp
    pub updated: Option<DateTime<Utc>>,
    /// New message count
    pub message_count: Option<u64>,
    /// Summary pointer to record
    pub summary: Option<SummaryPointer>,
}

impl MetadataUpdate {
    /// Update that only bumps the `updated` timestamp.
    pub fn touch() -> Self {
        Self {
            updated: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_message_count(mut self, count: u64) -> Self {
        self.message_count = Some(count);
        self
    }

    pub fn with_summary(mut self, pointer: SummaryPointer) -> Self {
        self.summary = Some(pointer);
        self
    }

    /// Apply this update to a metadata record.
    pub fn apply(self, metadata: &mut SessionMetadata) {
        if let Some(title) = self.title {
            metadata.title = Some(title);
        }
        if let Some(updated) = self.updated {
            metadata.updated = updated;
        }
        if let Some(count) = self.message_count {
            metadata.message_count = count;
        }
        if let Some(pointer) = self.summary {
            metadata.has_summary = true;
            metadata.last_summary_uuid = Some(pointer.uuid);
            metadata.last_summary_time = Some(pointer.time);
            metadata.last_summary_index = Some(pointer.index);
        }
    }
}

/// Session storage trait for abstraction over storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session directory with an empty log; returns its id.
    async fn create_session(&self, title: Option<&str>) -> Result<String>;

    /// Load all messages of a session.
    async fn load_session(&self, id: &str) -> Result<Vec<ConversationMessage>>;

    /// Load the log suffix starting at the message with `from_uuid`.
    ///
    /// Streams the log once; returns `Ok(None)` when the uuid never appears.
    async fn load_session_tail(
        &self,
        id: &str,
        from_uuid: &str,
    ) -> Result<Option<Vec<ConversationMessage>>>;

    /// Overwrite a session's log with the given messages.
    async fn save_session(&self, id: &str, messages: &[ConversationMessage]) -> Result<()>;

    /// Append one message to a session's log.
    async fn append_message(&self, id: &str, message: &ConversationMessage) -> Result<()>;

    /// Delete a session and its messages. No-op when the session is missing.
    async fn delete_session(&self, id: &str) -> Result<()>;

    /// List all sessions, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<SessionMetadata>>;

    /// Load a session's metadata record.
    async fn load_metadata(&self, id: &str) -> Result<SessionMetadata>;

    /// Apply a partial update to a session's metadata record.
    async fn update_metadata(&self, id: &str, update: MetadataUpdate) -> Result<SessionMetadata>;

    /// Find sessions whose id starts with the given prefix.
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<SessionMetadata>>;
}

/// Filesystem-backed session storage.
///
/// Layout: `<root>/<session_id>/metadata.json` (pretty-printed JSON) and
/// `<root>/<session_id>/messages.jsonl` (one compact JSON object per line).
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    /// Create a new store rooted at the given directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open a store at the default data directory.
    pub fn open_default() -> Result<Self> {
        let root = dirs::data_dir()
            .ok_or_else(|| StoreError::Path("Could not find data directory".into()))?
            .join("memoir")
            .join("sessions");
        Self::new(root)
    }

    /// Root directory for session data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(METADATA_FILE)
    }

    fn log_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(MESSAGES_FILE)
    }

    fn ensure_session_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write a metadata record through a temp file + rename.
    fn write_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        let dir = self.ensure_session_dir(&metadata.session_id)?;
        let final_path = dir.join(METADATA_FILE);
        let tmp_path = dir.join(format!("{METADATA_FILE}.tmp"));

        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn read_metadata(&self, id: &str) -> Result<SessionMetadata> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Parse one log line, or skip it with a warning.
    fn parse_line(id: &str, line_no: usize, line: &str) -> Option<ConversationMessage> {
        match serde_json::from_str(line) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(
                    session = id,
                    line = line_no,
                    error = %e,
                    "Skipping malformed log line"
                );
                None
            }
        }
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn create_session(&self, title: Option<&str>) -> Result<String> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let metadata = SessionMetadata::new(title.map(String::from), cwd);
        let id = metadata.session_id.clone();

        self.ensure_session_dir(&id)?;
        File::create(self.log_path(&id))?;
        self.write_metadata(&metadata)?;

        debug!(session = %id, "Created session");
        Ok(id)
    }

    async fn load_session(&self, id: &str) -> Result<Vec<ConversationMessage>> {
        if !self.session_dir(id).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let path = self.log_path(id);
        if !path.exists() {
            return Ok(vec![]);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let mut messages = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(message) = Self::parse_line(id, idx, &line) {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    async fn load_session_tail(
        &self,
        id: &str,
        from_uuid: &str,
    ) -> Result<Option<Vec<ConversationMessage>>> {
        if !self.session_dir(id).exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let path = self.log_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let mut tail: Option<Vec<ConversationMessage>> = None;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Some(message) = Self::parse_line(id, idx, &line) else {
                continue;
            };

            match tail {
                Some(ref mut collected) => collected.push(message),
                None if message.uuid == from_uuid => tail = Some(vec![message]),
                None => {}
            }
        }

        Ok(tail)
    }

    async fn save_session(&self, id: &str, messages: &[ConversationMessage]) -> Result<()> {
        self.ensure_session_dir(id)?;

        let mut file = File::create(self.log_path(id))?;
        for message in messages {
            let json = serde_json::to_string(message)?;
            writeln!(file, "{}", json)?;
        }
        file.flush()?;

        // Rewrite the count so metadata matches the new log.
        let mut metadata = match self.read_metadata(id) {
            Ok(metadata) => metadata,
            Err(StoreError::NotFound(_)) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                let mut metadata = SessionMetadata::new(None, cwd);
                metadata.session_id = id.to_string();
                metadata
            }
            Err(e) => return Err(e),
        };
        metadata.message_count = messages.len() as u64;
        metadata.updated = Utc::now();
        self.write_metadata(&metadata)?;

        Ok(())
    }

    async fn append_message(&self, id: &str, message: &ConversationMessage) -> Result<()> {
        self.ensure_session_dir(id)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(id))?;

        let json = serde_json::to_string(message)?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let dir = self.session_dir(id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
            debug!(session = id, "Deleted session");
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let mut sessions = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let metadata_path = entry.path().join(METADATA_FILE);
            if !metadata_path.exists() {
                continue;
            }

            let content = match fs::read_to_string(&metadata_path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %metadata_path.display(), error = %e, "Skipping unreadable metadata");
                    continue;
                }
            };
            match serde_json::from_str::<SessionMetadata>(&content) {
                Ok(metadata) => sessions.push(metadata),
                Err(e) => {
                    warn!(path = %metadata_path.display(), error = %e, "Skipping malformed metadata");
                }
            }
        }

        sessions.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(sessions)
    }

    async fn load_metadata(&self, id: &str) -> Result<SessionMetadata> {
        self.read_metadata(id)
    }

    async fn update_metadata(&self, id: &str, update: MetadataUpdate) -> Result<SessionMetadata> {
        let mut metadata = self.read_metadata(id)?;
        update.apply(&mut metadata);
        self.write_metadata(&metadata)?;
        Ok(metadata)
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<SessionMetadata>> {
        let sessions = self.list_sessions().await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.session_id.starts_with(prefix))
            .collect())
    }
}
