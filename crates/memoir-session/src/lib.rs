//! # memoir-session
//!
//! Conversation persistence and context recovery for Memoir.
//!
//! This crate provides:
//! - Filesystem session storage with append-only JSONL message logs
//! - A TTL-bounded in-memory cache of parsed messages and metadata
//! - History management with write deduplication and metadata bookkeeping
//! - Budget-aware context recovery with summary-point fast paths
//! - Checkpoint reconciliation for externally-produced turn lists
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use memoir_session::{
//!     manager::HistoryManager,
//!     recovery::{CharEstimator, ContextRecovery},
//!     store::FsSessionStore,
//! };
//!
//! let store = FsSessionStore::open_default()?;
//! let manager = Arc::new(HistoryManager::new(store));
//!
//! // Resume a session within a 128k-token budget
//! let recovery = ContextRecovery::new(Arc::clone(&manager));
//! let window = recovery
//!     .load_with_budget(&session_id, 128_000, &CharEstimator::default(), None)
//!     .await?;
//! ```
//!
//! ## Storage Architecture
//!
//! Sessions are stored one directory per session:
//! - `<root>/{id}/metadata.json` - pretty-printed metadata record
//! - `<root>/{id}/messages.jsonl` - append-only message log
//!
//! The default root is `<data_dir>/memoir/sessions`.
//!
//! ## Concurrency
//!
//! One process, no file locking. The manager serializes the append +
//! metadata-update sequence per session; operations on different sessions
//! run in parallel. The cache TTL bounds staleness against out-of-band
//! file changes.

pub mod cache;
pub mod checkpoint;
pub mod manager;
pub mod recovery;
pub mod store;

// Re-export commonly used types
pub use cache::MessageCache;
pub use checkpoint::{CheckpointAdapter, Turn};
pub use manager::HistoryManager;
pub use recovery::{
    CharEstimator, ContextRecovery, DigestSummarizer, Summarizer, TokenEstimator,
};
pub use store::{
    FsSessionStore, MetadataUpdate, SessionStore, StoreError, SummaryPointer,
};
