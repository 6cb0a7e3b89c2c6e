//! `legion tools`: List the tools offered to the model.

use legion_config::AppConfig;
use legion_core::{CancellationToken, ToolRegistry};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = legion_tools::registry_from_config(&config.tools);
    let tools = registry.list_tools(&CancellationToken::new()).await?;

    if tools.is_empty() {
        println!("No tools enabled. Add names to [tools].enabled in config.toml.");
        println!("Built-in tools: {}", legion_tools::BUILTIN_TOOLS.join(", "));
        return Ok(());
    }

    println!("Tools ({}):", tools.len());
    for tool in &tools {
        println!();
        println!("  {}", tool.name());
        println!("    {}", tool.description());
        for param in tool.parameters() {
            let required = if param.required { "required" } else { "optional" };
            println!(
                "    - {} ({}, {}): {}",
                param.name,
                param.kind.as_str(),
                required,
                param.description
            );
        }
    }

    Ok(())
}
