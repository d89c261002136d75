//! In-memory caching of parsed messages and metadata.
//!
//! Entries are TTL-bounded so out-of-band file changes are picked up within
//! a bounded staleness window, regardless of mutation history.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use memoir_core::{ConversationMessage, SessionMetadata};

/// Default time-to-live for cache entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A cached value with its storage time.
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }
}

/// TTL-bounded cache of message arrays and metadata, keyed by session id.
pub struct MessageCache {
    ttl: Duration,
    messages: Mutex<HashMap<String, CacheEntry<Vec<ConversationMessage>>>>,
    metadata: Mutex<HashMap<String, CacheEntry<SessionMetadata>>>,
}

impl MessageCache {
    /// Create a cache with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            messages: Mutex::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached message array for a session, if still valid.
    pub fn get(&self, session_id: &str) -> Option<Vec<ConversationMessage>> {
        let mut map = self.messages.lock();
        match map.get(session_id) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.value.clone()),
            Some(_) => {
                map.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Replace the cached message array for a session.
    pub fn set(&self, session_id: &str, messages: Vec<ConversationMessage>) {
        self.messages
            .lock()
            .insert(session_id.to_string(), CacheEntry::new(messages));
    }

    /// Append one message to a valid cached array.
    ///
    /// Does nothing when there is no valid entry; the next read re-derives
    /// truth from disk. The entry's age is not reset.
    pub fn push(&self, session_id: &str, message: ConversationMessage) {
        let mut map = self.messages.lock();
        match map.get_mut(session_id) {
            Some(entry) if !entry.is_expired(self.ttl) => entry.value.push(message),
            Some(_) => {
                map.remove(session_id);
            }
            None => {}
        }
    }

    /// Get the cached metadata for a session, if still valid.
    pub fn get_metadata(&self, session_id: &str) -> Option<SessionMetadata> {
        let mut map = self.metadata.lock();
        match map.get(session_id) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.value.clone()),
            Some(_) => {
                map.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Replace the cached metadata for a session.
    pub fn set_metadata(&self, session_id: &str, metadata: SessionMetadata) {
        self.metadata
            .lock()
            .insert(session_id.to_string(), CacheEntry::new(metadata));
    }

    /// Check whether a valid message entry exists for a session.
    pub fn is_valid(&self, session_id: &str) -> bool {
        self.messages
            .lock()
            .get(session_id)
            .map(|entry| !entry.is_expired(self.ttl))
            .unwrap_or(false)
    }

    /// Drop all cached state for a session.
    pub fn invalidate(&self, session_id: &str) {
        self.messages.lock().remove(session_id);
        self.metadata.lock().remove(session_id);
    }

    /// Drop all cached state.
    pub fn invalidate_all(&self) {
        self.messages.lock().clear();
        self.metadata.lock().clear();
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}
