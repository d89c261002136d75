//! Message and conversation primitives.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default user type stamped on new messages and sessions.
pub const DEFAULT_USER_TYPE: &str = "external";

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input
    User,
    /// Assistant response
    Assistant,
    /// System message (instructions, synthetic notices)
    System,
}

/// Message content types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Multiple content parts (tool calls, tool results, ...)
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Create text content.
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Get content as text (concatenates text parts if needed).
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Content part for structured message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },
    /// Tool use request
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Tool result, correlated to a tool use by id
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    /// Payload kinds this version does not model; carried through verbatim.
    #[serde(rename = "opaque")]
    Opaque { data: serde_json::Value },
}

/// The role/content body of a message, with optional provider metadata
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Author role
    pub role: Role,
    /// Message content
    pub content: Content,
    /// Model that produced this message (assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider usage accounting, opaque to this crate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

impl MessageBody {
    /// Create a body with the given role and plain text content.
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            model: None,
            usage: None,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A persisted message in a conversation.
///
/// Messages form a single linear history per session: `parent_uuid` is the
/// uuid of the message persisted immediately before this one, and is `None`
/// only for the first message of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    /// Unique message ID within the session
    pub uuid: String,
    /// Uuid of the preceding message in the chain
    pub parent_uuid: Option<String>,
    /// Owning session
    pub session_id: String,
    /// Message kind
    #[serde(rename = "type")]
    pub kind: Role,
    /// Role/content body
    pub message: MessageBody,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Working directory at creation time
    pub cwd: PathBuf,
    /// Whether this message belongs to a sidechain
    pub is_sidechain: bool,
    /// User type
    pub user_type: String,
    /// Writer version that produced this line
    pub version: String,
    /// Marker for synthetic summary messages produced by compression
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_summary: bool,
}

impl ConversationMessage {
    /// Construct a new message, stamping identity and timestamp.
    pub fn new(
        kind: Role,
        content: Content,
        parent_uuid: Option<String>,
        session_id: impl Into<String>,
        cwd: PathBuf,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            parent_uuid,
            session_id: session_id.into(),
            kind,
            message: MessageBody::new(kind, content),
            timestamp: Utc::now(),
            cwd,
            is_sidechain: false,
            user_type: DEFAULT_USER_TYPE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            is_summary: false,
        }
    }

    /// Mark this message as a compression summary.
    pub fn into_summary(mut self) -> Self {
        self.is_summary = true;
        self
    }
}
