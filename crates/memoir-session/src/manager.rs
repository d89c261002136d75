//! Conversation history management.
//!
//! [`HistoryManager`] composes the store and cache: it owns message
//! construction, append and dedup logic, and metadata bookkeeping. It is
//! the sole writer; the store and cache are internal collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use memoir_core::{Config, Content, ConversationMessage, Role, SessionMetadata};

use crate::cache::MessageCache;
use crate::store::{MetadataUpdate, Result, SessionStore, SummaryPointer};

/// Default dedup window in seconds.
const DEFAULT_DEDUP_WINDOW_SECS: i64 = 5;

/// Manager for a session store plus its read cache.
///
/// The append + metadata-update sequence for a session runs under a
/// per-session mutex, so unsynchronized call sites within one process
/// cannot race the metadata read-modify-write. Operations on different
/// sessions run fully in parallel.
pub struct HistoryManager<S: SessionStore> {
    store: S,
    cache: MessageCache,
    dedup_window_secs: i64,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<S: SessionStore> HistoryManager<S> {
    /// Create a manager with default cache and dedup settings.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: MessageCache::new(),
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager tuned by configuration.
    pub fn with_config(store: S, config: &Config) -> Self {
        Self {
            store,
            cache: MessageCache::with_ttl(std::time::Duration::from_secs(config.cache.ttl_secs)),
            dedup_window_secs: config.dedup.window_secs,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Per-session write lock, created on first use.
    fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Construct a message without any I/O.
    ///
    /// Stamps identity, timestamp, and the environment snapshot; the caller
    /// decides when (and whether) to persist it.
    pub fn create_message(
        &self,
        kind: Role,
        content: Content,
        parent_uuid: Option<String>,
        session_id: &str,
    ) -> ConversationMessage {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        ConversationMessage::new(kind, content, parent_uuid, session_id, cwd)
    }

    /// Create a new session; returns its id.
    pub async fn create_session(&self, title: Option<&str>) -> Result<String> {
        self.store.create_session(title).await
    }

    /// Append a message and update the session's metadata.
    pub async fn add_message(&self, session_id: &str, message: ConversationMessage) -> Result<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        self.add_message_locked(session_id, message).await
    }

    /// Append a message unless it duplicates one already stored.
    ///
    /// A message is a duplicate when its uuid matches an existing message,
    /// or when an existing message has the same kind, identical content,
    /// and a timestamp within the dedup window. Returns whether the
    /// message was stored.
    pub async fn add_message_deduplicated(
        &self,
        session_id: &str,
        message: ConversationMessage,
    ) -> Result<bool> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let existing = self.read_messages(session_id).await?;
        if let Some(original) = self.find_duplicate(&existing, &message) {
            warn!(
                session = session_id,
                uuid = %message.uuid,
                duplicate_of = %original.uuid,
                "Dropping duplicate message"
            );
            return Ok(false);
        }

        self.add_message_locked(session_id, message).await?;
        Ok(true)
    }

    /// Get a session's messages, reading through the cache.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        self.read_messages(session_id).await
    }

    /// Get a session's metadata, reading through the cache.
    pub async fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        if let Some(cached) = self.cache.get_metadata(session_id) {
            return Ok(cached);
        }
        let metadata = self.store.load_metadata(session_id).await?;
        self.cache.set_metadata(session_id, metadata.clone());
        Ok(metadata)
    }

    /// List all sessions, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        self.store.list_sessions().await
    }

    /// The most recently updated session, if any.
    pub async fn most_recent_session(&self) -> Result<Option<SessionMetadata>> {
        Ok(self.list_sessions().await?.into_iter().next())
    }

    /// Drop cached state for a session.
    ///
    /// Useful after out-of-band changes to the session's files; otherwise
    /// the TTL bounds how long stale entries survive.
    pub fn invalidate_cache(&self, session_id: &str) {
        self.cache.invalidate(session_id);
    }

    /// Delete a session and purge all cached state for it.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.store.delete_session(session_id).await?;
        self.cache.invalidate(session_id);
        self.locks.lock().remove(session_id);
        Ok(())
    }

    /// Update a session's title.
    pub async fn update_session_title(&self, session_id: &str, title: &str) -> Result<()> {
        let metadata = self
            .store
            .update_metadata(session_id, MetadataUpdate::touch().with_title(title))
            .await?;
        self.cache.set_metadata(session_id, metadata);
        Ok(())
    }

    /// Append under an already-held session lock.
    async fn add_message_locked(
        &self,
        session_id: &str,
        message: ConversationMessage,
    ) -> Result<()> {
        // Read the count first so the appended line's index is known, and a
        // missing session surfaces before anything is written.
        let metadata = self.store.load_metadata(session_id).await?;
        let index = metadata.message_count;

        if let Err(e) = self.store.append_message(session_id, &message).await {
            self.cache.invalidate(session_id);
            return Err(e);
        }

        let mut update = MetadataUpdate::touch().with_message_count(index + 1);
        if message.is_summary {
            update = update.with_summary(SummaryPointer {
                uuid: message.uuid.clone(),
                time: Utc::now(),
                index,
            });
        }

        match self.store.update_metadata(session_id, update).await {
            Ok(updated) => {
                self.cache.push(session_id, message);
                self.cache.set_metadata(session_id, updated);
                Ok(())
            }
            Err(e) => {
                self.cache.invalidate(session_id);
                Err(e)
            }
        }
    }

    async fn read_messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        if let Some(cached) = self.cache.get(session_id) {
            return Ok(cached);
        }
        let messages = self.store.load_session(session_id).await?;
        self.cache.set(session_id, messages.clone());
        Ok(messages)
    }

    fn find_duplicate<'a>(
        &self,
        existing: &'a [ConversationMessage],
        candidate: &ConversationMessage,
    ) -> Option<&'a ConversationMessage> {
        existing.iter().find(|m| {
            m.uuid == candidate.uuid
                || (m.kind == candidate.kind
                    && m.message.content == candidate.message.content
                    && (candidate.timestamp - m.timestamp).num_seconds().abs()
                        <= self.dedup_window_secs)
        })
    }
}
