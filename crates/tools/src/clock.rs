//! Clock tool: reports the current local time.

use async_trait::async_trait;
use chrono::Local;
use legion_core::error::ToolError;
use legion_core::tool::{Parameter, ParameterKind, Tool, ToolArguments};
use legion_core::CancellationToken;

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

pub struct ClockTool;

impl ClockTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClockTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in the user's local time zone."
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![Parameter::optional(
            "format",
            ParameterKind::String,
            "strftime-style format string, e.g. \"%H:%M\". Defaults to a full timestamp.",
        )]
    }

    async fn invoke(
        &self,
        arguments: ToolArguments,
        _cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let format = arguments.get_str("format").unwrap_or(DEFAULT_FORMAT);
        render(format)
    }
}

/// chrono panics on Display of an invalid format, so parse it first.
fn render(format: &str) -> Result<String, ToolError> {
    use chrono::format::{Item, StrftimeItems};

    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ToolError::InvalidArguments(format!(
            "invalid time format: {format}"
        )));
    }
    Ok(Local::now().format_with_items(items.into_iter()).to_string())
}
