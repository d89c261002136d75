//! Context recovery for session resume.
//!
//! Each call is a one-shot computation over a session's log: pick the
//! window anchored at the most recent summary, check it against the token
//! budget, and compress through an injected summarizer when the budget is
//! exceeded. Degradations (summarizer failure, stale summary pointer) are
//! recovered locally and never fail the caller's resume flow.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use memoir_core::config::RecoveryTuning;
use memoir_core::{Content, ContentPart, ConversationMessage, Role};

use crate::manager::HistoryManager;
use crate::store::{Result, SessionStore};

/// Estimates the model-context cost of a set of messages.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, messages: &[ConversationMessage]) -> u64;
}

/// Character-count estimator, roughly four characters per token.
pub struct CharEstimator {
    chars_per_token: f64,
}

impl CharEstimator {
    pub fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl TokenEstimator for CharEstimator {
    fn estimate(&self, messages: &[ConversationMessage]) -> u64 {
        let chars: usize = messages
            .iter()
            .map(|m| m.message.content.as_text().len())
            .sum();
        (chars as f64 / self.chars_per_token) as u64
    }
}

/// Produces a summary message standing in for the given window.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        messages: &[ConversationMessage],
    ) -> anyhow::Result<ConversationMessage>;
}

/// Summarizer that builds a structured digest without an LLM.
///
/// Collects user goals and tool activity from the window. Useful as a
/// degraded-mode stand-in when no model-backed summarizer is available.
pub struct DigestSummarizer;

impl DigestSummarizer {
    fn truncate(text: &str, max: usize) -> String {
        if text.chars().count() <= max {
            text.to_string()
        } else {
            let cut: String = text.chars().take(max.saturating_sub(3)).collect();
            format!("{cut}...")
        }
    }

    fn describe_tool_use(name: &str, input: &serde_json::Value) -> String {
        let args = match input.as_object() {
            Some(obj) if !obj.is_empty() => {
                let keys: Vec<&str> = obj.keys().map(|s| s.as_str()).take(3).collect();
                format!("({})", keys.join(", "))
            }
            _ => "()".to_string(),
        };
        format!("{name}: {args}")
    }
}

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(
        &self,
        messages: &[ConversationMessage],
    ) -> anyhow::Result<ConversationMessage> {
        let first = messages
            .first()
            .ok_or_else(|| anyhow::anyhow!("nothing to summarize"))?;

        let mut goals = Vec::new();
        let mut actions = Vec::new();

        for message in messages {
            match message.kind {
                Role::User => {
                    let text = message.message.content.as_text();
                    if text.len() >= 10 {
                        goals.push(Self::truncate(&text, 200));
                    }
                }
                Role::Assistant => {
                    if let Content::Parts(parts) = &message.message.content {
                        for part in parts {
                            if let ContentPart::ToolUse { name, input, .. } = part {
                                actions.push(Self::describe_tool_use(name, input));
                            }
                        }
                    }
                }
                Role::System => {}
            }
        }

        let mut lines = Vec::new();
        if !goals.is_empty() {
            lines.push("User requested:".to_string());
            for goal in goals.iter().take(3) {
                lines.push(format!("- {goal}"));
            }
        }
        if !actions.is_empty() {
            lines.push("Actions taken:".to_string());
            for action in actions.iter().take(10) {
                lines.push(format!("- {action}"));
            }
        }

        let text = if lines.is_empty() {
            format!("Compacted {} messages from the conversation.", messages.len())
        } else {
            lines.join("\n")
        };

        Ok(ConversationMessage::new(
            Role::Assistant,
            Content::text(text),
            None,
            first.session_id.clone(),
            first.cwd.clone(),
        ))
    }
}

/// Context recovery over a history manager.
pub struct ContextRecovery<S: SessionStore> {
    manager: Arc<HistoryManager<S>>,
    tuning: RecoveryTuning,
}

impl<S: SessionStore> ContextRecovery<S> {
    /// Create a recovery engine with default tuning.
    pub fn new(manager: Arc<HistoryManager<S>>) -> Self {
        Self::with_tuning(manager, RecoveryTuning::default())
    }

    /// Create a recovery engine with custom tuning.
    pub fn with_tuning(manager: Arc<HistoryManager<S>>, tuning: RecoveryTuning) -> Self {
        Self { manager, tuning }
    }

    /// Load a session's resume window under a token budget.
    ///
    /// The window is anchored at the most recent summary message (older
    /// summaries stay in the log for audit, but are not re-evaluated).
    /// When the window's estimated cost exceeds
    /// `token_limit * compression_threshold` and a summarizer is supplied,
    /// the window is compressed into a fresh summary message, persisted,
    /// and returned alone. A failing summarizer degrades to a sliding
    /// window of the most recent messages instead of failing the resume.
    pub async fn load_with_budget(
        &self,
        session_id: &str,
        token_limit: u64,
        estimator: &dyn TokenEstimator,
        summarizer: Option<&dyn Summarizer>,
    ) -> Result<Vec<ConversationMessage>> {
        let messages = self.manager.get_messages(session_id).await?;
        if messages.is_empty() {
            return Ok(vec![]);
        }

        let start = messages.iter().rposition(|m| m.is_summary).unwrap_or(0);
        let candidate = &messages[start..];

        let cost = estimator.estimate(candidate);
        let trigger = token_limit as f64 * self.tuning.compression_threshold;
        if cost as f64 > trigger {
            if let Some(summarizer) = summarizer {
                return self
                    .compress_or_degrade(session_id, &messages, candidate, token_limit, cost, summarizer)
                    .await;
            }
        }

        Ok(candidate.to_vec())
    }

    /// Fast path: load the suffix starting at the recorded summary pointer.
    ///
    /// When the pointer is stale (metadata/log divergence after a crash
    /// mid-write), falls back to the full-log path rather than returning an
    /// incomplete result.
    pub async fn load_from_summary_point(
        &self,
        session_id: &str,
    ) -> Result<Vec<ConversationMessage>> {
        let metadata = self.manager.get_metadata(session_id).await?;
        if !metadata.has_summary {
            return self.manager.get_messages(session_id).await;
        }

        let Some(uuid) = metadata.last_summary_uuid else {
            warn!(
                session = session_id,
                "Summary flag set without a pointer, falling back to full load"
            );
            return self.manager.get_messages(session_id).await;
        };

        match self
            .manager
            .store()
            .load_session_tail(session_id, &uuid)
            .await?
        {
            Some(tail) => Ok(tail),
            None => {
                warn!(
                    session = session_id,
                    summary = %uuid,
                    "Summary pointer not present in log, falling back to full load"
                );
                self.manager.get_messages(session_id).await
            }
        }
    }

    async fn compress_or_degrade(
        &self,
        session_id: &str,
        all: &[ConversationMessage],
        candidate: &[ConversationMessage],
        token_limit: u64,
        cost: u64,
        summarizer: &dyn Summarizer,
    ) -> Result<Vec<ConversationMessage>> {
        match summarizer.summarize(candidate).await {
            Ok(raw) => {
                // The summarizer may not know the chain; re-stamp the
                // envelope so the result links onto the current tail.
                let mut summary = raw.into_summary();
                summary.session_id = session_id.to_string();
                summary.parent_uuid = all.last().map(|m| m.uuid.clone());
                summary.kind = Role::Assistant;
                summary.message.role = Role::Assistant;

                self.manager.add_message(session_id, summary.clone()).await?;
                info!(
                    session = session_id,
                    compacted = candidate.len(),
                    "Compressed conversation window"
                );
                Ok(vec![summary])
            }
            Err(e) => {
                warn!(
                    session = session_id,
                    error = %e,
                    "Summarizer failed, degrading to sliding window"
                );
                Ok(sliding_window(
                    candidate,
                    token_limit,
                    cost,
                    self.tuning.window_fraction,
                ))
            }
        }
    }
}

/// Most recent messages fitting roughly within the budget fraction.
///
/// Keeps at least one message for a non-empty candidate so a degraded
/// resume never comes back empty-handed.
fn sliding_window(
    candidate: &[ConversationMessage],
    token_limit: u64,
    cost: u64,
    fraction: f64,
) -> Vec<ConversationMessage> {
    let avg = cost as f64 / candidate.len() as f64;
    let keep = if avg > 0.0 {
        ((token_limit as f64 * fraction) / avg).floor() as usize
    } else {
        candidate.len()
    };
    let keep = keep.clamp(1, candidate.len());
    candidate[candidate.len() - keep..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsSessionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedEstimator(u64);

    impl TokenEstimator for FixedEstimator {
        fn estimate(&self, _messages: &[ConversationMessage]) -> u64 {
            self.0
        }
    }

    struct PerMessageEstimator(u64);

    impl TokenEstimator for PerMessageEstimator {
        fn estimate(&self, messages: &[ConversationMessage]) -> u64 {
            messages.len() as u64 * self.0
        }
    }

    struct CountingSummarizer(AtomicUsize);

    impl CountingSummarizer {
        fn new() -> Self {
            Self(AtomicUsize::new(0))
        }

        fn calls(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(
            &self,
            messages: &[ConversationMessage],
        ) -> anyhow::Result<ConversationMessage> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let first = messages.first().unwrap();
            Ok(ConversationMessage::new(
                Role::Assistant,
                Content::text("condensed history"),
                None,
                first.session_id.clone(),
                first.cwd.clone(),
            ))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _messages: &[ConversationMessage],
        ) -> anyhow::Result<ConversationMessage> {
            anyhow::bail!("summarizer unavailable")
        }
    }

    async fn create_test_recovery() -> (
        ContextRecovery<FsSessionStore>,
        Arc<HistoryManager<FsSessionStore>>,
        TempDir,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsSessionStore::new(temp_dir.path()).unwrap();
        let manager = Arc::new(HistoryManager::new(store));
        let recovery = ContextRecovery::new(Arc::clone(&manager));
        (recovery, manager, temp_dir)
    }

    async fn append_text(
        manager: &HistoryManager<FsSessionStore>,
        id: &str,
        kind: Role,
        text: &str,
        summary: bool,
    ) -> ConversationMessage {
        let parent = manager
            .get_messages(id)
            .await
            .unwrap()
            .last()
            .map(|m| m.uuid.clone());
        let mut message = manager.create_message(kind, Content::text(text), parent, id);
        if summary {
            message = message.into_summary();
        }
        manager.add_message(id, message.clone()).await.unwrap();
        message
    }

    #[tokio::test]
    async fn test_empty_session_returns_empty_without_compression() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        let summarizer = CountingSummarizer::new();
        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(0), Some(&summarizer))
            .await
            .unwrap();

        assert!(window.is_empty());
        assert_eq!(summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_window_anchored_at_most_recent_summary() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        append_text(&manager, &id, Role::Assistant, "two", false).await;
        let s = append_text(&manager, &id, Role::Assistant, "summary", true).await;
        let m4 = append_text(&manager, &id, Role::User, "four", false).await;
        let m5 = append_text(&manager, &id, Role::Assistant, "five", false).await;

        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(10), None)
            .await
            .unwrap();

        assert_eq!(window, vec![s, m4, m5]);
    }

    #[tokio::test]
    async fn test_whole_log_when_no_summary() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        append_text(&manager, &id, Role::Assistant, "two", false).await;

        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(10), None)
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_cost_just_over_threshold_compresses() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();
        append_text(&manager, &id, Role::User, "please do the thing", false).await;

        let summarizer = CountingSummarizer::new();
        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(801), Some(&summarizer))
            .await
            .unwrap();

        assert_eq!(summarizer.calls(), 1);
        assert_eq!(window.len(), 1);
        assert!(window[0].is_summary);

        // The summary was persisted and the pointer recorded.
        let metadata = manager.get_metadata(&id).await.unwrap();
        assert!(metadata.has_summary);
        assert_eq!(metadata.last_summary_uuid.as_deref(), Some(window[0].uuid.as_str()));
        assert_eq!(manager.get_messages(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cost_just_under_threshold_does_not_compress() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();
        append_text(&manager, &id, Role::User, "please do the thing", false).await;

        let summarizer = CountingSummarizer::new();
        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(799), Some(&summarizer))
            .await
            .unwrap();

        assert_eq!(summarizer.calls(), 0);
        assert_eq!(window.len(), 1);
        assert!(!window[0].is_summary);
    }

    #[tokio::test]
    async fn test_over_threshold_without_summarizer_returns_candidate() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();
        append_text(&manager, &id, Role::User, "one", false).await;

        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(5000), None)
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn test_compressed_summary_links_onto_tail() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        let tail = append_text(&manager, &id, Role::Assistant, "two", false).await;

        let summarizer = CountingSummarizer::new();
        let window = recovery
            .load_with_budget(&id, 100, &FixedEstimator(500), Some(&summarizer))
            .await
            .unwrap();

        assert_eq!(window[0].parent_uuid.as_deref(), Some(tail.uuid.as_str()));
        assert_eq!(window[0].session_id, id);
    }

    #[tokio::test]
    async fn test_summarizer_failure_degrades_to_sliding_window() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        let mut appended = Vec::new();
        for i in 0..20 {
            appended.push(append_text(&manager, &id, Role::User, &format!("m{i}"), false).await);
        }

        // 100 tokens per message: cost 2000 against a 1000 budget; the
        // fallback keeps floor(800 / 100) = 8 messages.
        let window = recovery
            .load_with_budget(&id, 1000, &PerMessageEstimator(100), Some(&FailingSummarizer))
            .await
            .unwrap();

        assert_eq!(window.len(), 8);
        assert_eq!(window, appended[12..].to_vec());
    }

    #[tokio::test]
    async fn test_sliding_window_keeps_at_least_one_message() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();
        let m = append_text(&manager, &id, Role::User, "huge", false).await;

        // A single message costing far more than the budget still survives.
        let window = recovery
            .load_with_budget(&id, 10, &PerMessageEstimator(1000), Some(&FailingSummarizer))
            .await
            .unwrap();
        assert_eq!(window, vec![m]);
    }

    #[tokio::test]
    async fn test_only_most_recent_summary_is_considered() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        append_text(&manager, &id, Role::Assistant, "old summary", true).await;
        append_text(&manager, &id, Role::User, "two", false).await;
        let s2 = append_text(&manager, &id, Role::Assistant, "new summary", true).await;
        let m5 = append_text(&manager, &id, Role::User, "three", false).await;

        let window = recovery
            .load_with_budget(&id, 1000, &FixedEstimator(10), None)
            .await
            .unwrap();
        assert_eq!(window, vec![s2, m5]);
    }

    #[tokio::test]
    async fn test_fast_path_matches_summary_scan() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        append_text(&manager, &id, Role::Assistant, "summary", true).await;
        append_text(&manager, &id, Role::User, "two", false).await;

        let fast = recovery.load_from_summary_point(&id).await.unwrap();
        let scanned = recovery
            .load_with_budget(&id, 1_000_000, &FixedEstimator(1), None)
            .await
            .unwrap();

        assert_eq!(fast, scanned);
    }

    #[tokio::test]
    async fn test_fast_path_without_summary_loads_full_log() {
        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        append_text(&manager, &id, Role::Assistant, "two", false).await;

        let messages = recovery.load_from_summary_point(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_summary_pointer_falls_back_to_full_log() {
        use crate::store::{MetadataUpdate, SummaryPointer};
        use chrono::Utc;

        let (recovery, manager, _tmp) = create_test_recovery().await;
        let id = manager.create_session(None).await.unwrap();

        append_text(&manager, &id, Role::User, "one", false).await;
        append_text(&manager, &id, Role::Assistant, "two", false).await;

        // Simulate a crash mid-write: the pointer references a message
        // that never made it into the log.
        manager
            .store()
            .update_metadata(
                &id,
                MetadataUpdate::default().with_summary(SummaryPointer {
                    uuid: "never-written".to_string(),
                    time: Utc::now(),
                    index: 99,
                }),
            )
            .await
            .unwrap();
        manager.invalidate_cache(&id);

        let messages = recovery.load_from_summary_point(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_char_estimator() {
        let estimator = CharEstimator::default();
        let message = ConversationMessage::new(
            Role::User,
            Content::text("abcdefgh"),
            None,
            "s",
            std::path::PathBuf::from("/tmp"),
        );
        assert_eq!(estimator.estimate(std::slice::from_ref(&message)), 2);
    }

    #[tokio::test]
    async fn test_digest_summarizer_collects_goals_and_actions() {
        let messages = vec![
            ConversationMessage::new(
                Role::User,
                Content::text("Please refactor the parser module"),
                None,
                "s",
                std::path::PathBuf::from("/tmp"),
            ),
            ConversationMessage::new(
                Role::Assistant,
                Content::Parts(vec![ContentPart::ToolUse {
                    id: "call_1".to_string(),
                    name: "edit_file".to_string(),
                    input: serde_json::json!({"path": "src/parser.rs"}),
                }]),
                None,
                "s",
                std::path::PathBuf::from("/tmp"),
            ),
        ];

        let summary = DigestSummarizer.summarize(&messages).await.unwrap();
        let text = summary.message.content.as_text();
        assert!(text.contains("refactor the parser"));
        assert!(text.contains("edit_file"));
    }
}
