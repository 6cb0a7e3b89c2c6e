//! Message and content domain types.
//!
//! These are the value objects that flow through the entire system:
//! caller builds a request → bus carries it → the tool-call loop extends the
//! content history → a response travels back on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolCall;

/// Identifier shared by exactly one request and its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The actor that produced a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single role-tagged entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Who produced this entry
    pub role: Role,

    /// The text body
    pub text: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Content {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    /// Create a tool result entry answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, text)
        }
    }

    /// Attach tool calls to an assistant entry.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Tool results and the assistant turns that requested them.
    ///
    /// These only matter while the tool-call loop is running and are
    /// stripped from the history handed back to callers.
    pub fn is_intermediate(&self) -> bool {
        self.role == Role::Tool || !self.tool_calls.is_empty()
    }
}

/// Whether a bus message opens or closes a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

/// The unit of bus traffic. Immutable once posted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Shared by a request and its response
    pub conversation_id: ConversationId,

    pub direction: Direction,

    /// Ordered, role-tagged history of the exchange
    pub content: Vec<Content>,

    /// Set only on responses produced after a handler fault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn build(conversation_id: ConversationId, direction: Direction, content: Vec<Content>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            direction,
            content,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a request under a fresh conversation id.
    pub fn request(content: Vec<Content>) -> Self {
        Self::build(ConversationId::new(), Direction::Request, content)
    }

    /// Create a request under a caller-chosen conversation id.
    pub fn request_for(conversation_id: ConversationId, content: Vec<Content>) -> Self {
        Self::build(conversation_id, Direction::Request, content)
    }

    /// Create the response for `conversation_id`.
    pub fn response(conversation_id: ConversationId, content: Vec<Content>) -> Self {
        Self::build(conversation_id, Direction::Response, content)
    }

    /// Create a response that reports a failure instead of an answer.
    pub fn fault(conversation_id: ConversationId, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::build(conversation_id, Direction::Response, Vec::new())
        }
    }

    pub fn is_request(&self) -> bool {
        self.direction == Direction::Request
    }

    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    /// Text of the first content item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|c| c.text.as_str())
    }
}
