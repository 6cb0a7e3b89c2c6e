//! The conversation runtime for Legion.
//!
//! A request flows through two layers:
//!
//! 1. The **orchestrator** wraps the caller's content in a request message,
//!    posts it on the bus and waits for the correlated response.
//! 2. Its subscriber drives the **tool-call loop**: send the history to the
//!    model, run any tools it asks for, feed the results back, and repeat
//!    until the model answers without tool calls.

pub mod orchestrator;
pub mod tool_loop;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use orchestrator::{ChatRequest, ChatResponse, Orchestrator, OrchestratorBuilder};
pub use tool_loop::{LoopPolicy, ToolCallLoop};
