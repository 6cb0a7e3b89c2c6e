//! Built-in tool implementations for Legion.
//!
//! Tools give the model a way to act on the world: read the clock, pause
//! for a while, and fetch a web page.

pub mod clock;
pub mod http_get;
pub mod wait;

use legion_config::ToolsConfig;
use legion_core::tool::StaticToolRegistry;
use tracing::warn;

pub use clock::ClockTool;
pub use http_get::HttpGetTool;
pub use wait::WaitTool;

/// Names of every built-in tool, in registration order.
pub const BUILTIN_TOOLS: &[&str] = &["get_current_time", "wait", "http_get"];

/// Create a registry holding every built-in tool with default settings.
pub fn default_registry() -> StaticToolRegistry {
    registry_from_config(&ToolsConfig::default())
}

/// Create a registry holding the built-in tools named in `config.enabled`.
///
/// Unknown names are skipped with a warning.
pub fn registry_from_config(config: &ToolsConfig) -> StaticToolRegistry {
    let mut registry = StaticToolRegistry::new();
    for name in &config.enabled {
        match name.as_str() {
            "get_current_time" => registry.register(ClockTool::new()),
            "wait" => registry.register(WaitTool::new()),
            "http_get" => registry.register(HttpGetTool::new(config.http_max_bytes)),
            other => warn!(tool = %other, "Unknown built-in tool in config, skipping"),
        }
    }
    registry
}
