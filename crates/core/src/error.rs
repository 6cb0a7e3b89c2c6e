//! Error types for the Legion domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, folded into [`Error`].

use thiserror::Error;

use crate::message::ConversationId;

/// The top-level error type for all Legion operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Bus errors ---
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    // --- Assembly errors ---
    #[error("Missing required component: {component}")]
    Construction { component: &'static str },

    /// The tool-call loop kept requesting tools past its round budget.
    #[error("Tool-call round budget exhausted after {rounds} round(s)")]
    RoundBudgetExhausted { rounds: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum BusError {
    /// A request or response collided with the correlation state of an id.
    #[error("Correlation conflict for conversation {conversation_id}: {reason}")]
    CorrelationConflict {
        conversation_id: ConversationId,
        reason: String,
    },

    /// A subscriber failed while handling a message.
    #[error("Handler fault on conversation {conversation_id}: {reason}")]
    HandlerFault {
        conversation_id: ConversationId,
        reason: String,
    },

    /// The waiter was dropped without ever being fulfilled.
    #[error("Waiter for conversation {0} was abandoned")]
    WaiterAbandoned(ConversationId),
}
