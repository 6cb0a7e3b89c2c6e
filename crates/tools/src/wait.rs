//! Wait tool: pauses for a number of milliseconds, honouring cancellation.

use async_trait::async_trait;
use legion_core::error::ToolError;
use legion_core::tool::{Parameter, ParameterKind, Tool, ToolArguments};
use legion_core::CancellationToken;
use std::time::Duration;

/// Upper bound on a single wait.
pub const MAX_WAIT_MS: i64 = 60_000;

pub struct WaitTool;

impl WaitTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WaitTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Wait for the given number of milliseconds before continuing."
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![Parameter::required(
            "milliseconds",
            ParameterKind::Integer,
            "How long to wait, in milliseconds (max 60000)",
        )]
    }

    async fn invoke(
        &self,
        arguments: ToolArguments,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let ms = arguments
            .get_i64("milliseconds")
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'milliseconds' argument".into()))?;

        if !(0..=MAX_WAIT_MS).contains(&ms) {
            return Err(ToolError::InvalidArguments(format!(
                "milliseconds must be between 0 and {MAX_WAIT_MS}, got {ms}"
            )));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled(self.name().into())),
            _ = tokio::time::sleep(Duration::from_millis(ms as u64)) => {
                Ok(format!("Waited {ms} ms"))
            }
        }
    }
}
