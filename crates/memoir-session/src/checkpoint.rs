//! Checkpoint reconciliation.
//!
//! Bridges an externally-produced, possibly already-partially-persisted
//! ordered turn list into the chain-linked log: derives parent links and
//! diffs against what is already stored, so retried checkpoints do not
//! duplicate history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use memoir_core::{Content, ConversationMessage, Role};

use crate::manager::HistoryManager;
use crate::store::{Result, SessionStore};

/// One turn as produced by the reasoning engine.
///
/// Provider payload (`model`, `usage`, tool-use/tool-result content parts)
/// is carried through verbatim, never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Author role
    pub role: Role,
    /// Turn content
    pub content: Content,
    /// Model that produced the turn, if any
    pub model: Option<String>,
    /// Provider usage accounting, if any
    pub usage: Option<serde_json::Value>,
}

impl Turn {
    /// Create a turn with the given role and content.
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            model: None,
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: serde_json::Value) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Adapter persisting checkpoints through a history manager.
pub struct CheckpointAdapter<S: SessionStore> {
    manager: Arc<HistoryManager<S>>,
}

impl<S: SessionStore> CheckpointAdapter<S> {
    /// Create an adapter over the given manager.
    pub fn new(manager: Arc<HistoryManager<S>>) -> Self {
        Self { manager }
    }

    /// Persist a single turn, chaining it onto the current last message.
    ///
    /// Goes through deduplication, so a retried turn is dropped rather
    /// than stored twice. Returns the stored message, or `None` when the
    /// turn was judged a duplicate.
    pub async fn save_message(
        &self,
        session_id: &str,
        kind: Role,
        content: Content,
    ) -> Result<Option<ConversationMessage>> {
        let existing = self.manager.get_messages(session_id).await?;
        let parent = existing.last().map(|m| m.uuid.clone());

        let message = self
            .manager
            .create_message(kind, content, parent, session_id);
        let stored = self
            .manager
            .add_message_deduplicated(session_id, message.clone())
            .await?;

        Ok(stored.then_some(message))
    }

    /// Reconcile a complete ordered turn list against the persisted chain.
    ///
    /// Turns up to the already-persisted count are assumed stored; only the
    /// suffix is appended. The parent pointer is threaded through the loop
    /// locally, so linking cost is linear in the number of new turns.
    /// Returns how many turns were persisted.
    pub async fn save_conversation(&self, session_id: &str, turns: &[Turn]) -> Result<usize> {
        let existing = self.manager.get_messages(session_id).await?;
        let existing_count = existing.len();
        if turns.len() <= existing_count {
            return Ok(0);
        }

        let mut last_uuid = existing.last().map(|m| m.uuid.clone());
        let mut persisted = 0;

        for turn in &turns[existing_count..] {
            let mut message = self.manager.create_message(
                turn.role,
                turn.content.clone(),
                last_uuid.clone(),
                session_id,
            );
            message.message.model = turn.model.clone();
            message.message.usage = turn.usage.clone();

            last_uuid = Some(message.uuid.clone());
            self.manager.add_message(session_id, message).await?;
            persisted += 1;
        }

        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsSessionStore;
    use tempfile::TempDir;

    async fn create_test_adapter() -> (
        CheckpointAdapter<FsSessionStore>,
        Arc<HistoryManager<FsSessionStore>>,
        String,
        TempDir,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsSessionStore::new(temp_dir.path()).unwrap();
        let manager = Arc::new(HistoryManager::new(store));
        let id = manager.create_session(None).await.unwrap();
        let adapter = CheckpointAdapter::new(Arc::clone(&manager));
        (adapter, manager, id, temp_dir)
    }

    fn turns(texts: &[(&str, Role)]) -> Vec<Turn> {
        texts
            .iter()
            .map(|(text, role)| Turn::new(*role, Content::text(*text)))
            .collect()
    }

    #[tokio::test]
    async fn test_save_message_derives_parent() {
        let (adapter, manager, id, _tmp) = create_test_adapter().await;

        let first = adapter
            .save_message(&id, Role::User, Content::text("Hello"))
            .await
            .unwrap()
            .unwrap();
        assert!(first.parent_uuid.is_none());

        let second = adapter
            .save_message(&id, Role::Assistant, Content::text("Hi"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.parent_uuid.as_deref(), Some(first.uuid.as_str()));

        assert_eq!(manager.get_messages(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_message_drops_retried_turn() {
        let (adapter, manager, id, _tmp) = create_test_adapter().await;

        adapter
            .save_message(&id, Role::User, Content::text("Hello"))
            .await
            .unwrap();
        let retried = adapter
            .save_message(&id, Role::User, Content::text("Hello"))
            .await
            .unwrap();

        assert!(retried.is_none());
        assert_eq!(manager.get_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_conversation_persists_all_with_chain() {
        let (adapter, manager, id, _tmp) = create_test_adapter().await;

        let list = turns(&[
            ("first", Role::User),
            ("second", Role::Assistant),
            ("third", Role::User),
        ]);
        let persisted = adapter.save_conversation(&id, &list).await.unwrap();
        assert_eq!(persisted, 3);

        let messages = manager.get_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].parent_uuid.is_none());
        assert_eq!(
            messages[1].parent_uuid.as_deref(),
            Some(messages[0].uuid.as_str())
        );
        assert_eq!(
            messages[2].parent_uuid.as_deref(),
            Some(messages[1].uuid.as_str())
        );
    }

    #[tokio::test]
    async fn test_save_conversation_persists_only_new_suffix() {
        let (adapter, manager, id, _tmp) = create_test_adapter().await;

        let mut list = turns(&[("first", Role::User), ("second", Role::Assistant)]);
        adapter.save_conversation(&id, &list).await.unwrap();
        let before = manager.get_messages(&id).await.unwrap();

        list.extend(turns(&[("third", Role::User)]));
        let persisted = adapter.save_conversation(&id, &list).await.unwrap();
        assert_eq!(persisted, 1);

        let after = manager.get_messages(&id).await.unwrap();
        assert_eq!(after.len(), 3);
        // The earlier messages are untouched and the new one chains onto
        // the previous tail.
        assert_eq!(&after[..2], &before[..]);
        assert_eq!(
            after[2].parent_uuid.as_deref(),
            Some(before[1].uuid.as_str())
        );
    }

    #[tokio::test]
    async fn test_save_conversation_is_noop_when_nothing_new() {
        let (adapter, manager, id, _tmp) = create_test_adapter().await;

        let list = turns(&[("first", Role::User)]);
        adapter.save_conversation(&id, &list).await.unwrap();
        let persisted = adapter.save_conversation(&id, &list).await.unwrap();

        assert_eq!(persisted, 0);
        assert_eq!(manager.get_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_payload_is_carried_verbatim() {
        let (adapter, manager, id, _tmp) = create_test_adapter().await;

        let usage = serde_json::json!({"input_tokens": 12, "output_tokens": 34});
        let list = vec![
            Turn::new(Role::User, Content::text("question")),
            Turn::new(Role::Assistant, Content::text("answer"))
                .with_model("sonnet-large")
                .with_usage(usage.clone()),
        ];
        adapter.save_conversation(&id, &list).await.unwrap();

        let messages = manager.get_messages(&id).await.unwrap();
        assert_eq!(messages[1].message.model.as_deref(), Some("sonnet-large"));
        assert_eq!(messages[1].message.usage, Some(usage));
    }
}
