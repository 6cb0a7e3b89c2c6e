//! # Legion Core
//!
//! Domain types, traits, and error definitions for the Legion conversation
//! runtime, plus the in-process message bus that ties the components together.
//!
//! ## Design Philosophy
//!
//! Every collaborator (language-model backend, tool source, bus subscriber)
//! is defined as a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod bus;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use bus::{MessageBus, MessageHandler};
pub use error::{BusError, Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Content, ConversationId, Direction, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use tool::{
    CompositeToolRegistry, FnTool, Parameter, ParameterKind, ParameterValue, StaticToolRegistry,
    Tool, ToolArguments, ToolCall, ToolRegistry,
};

/// Cancellation token threaded through every asynchronous call chain.
pub use tokio_util::sync::CancellationToken;
