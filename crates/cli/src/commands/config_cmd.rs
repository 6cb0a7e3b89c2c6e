//! `legion config`: Configuration management commands.

use legion_config::AppConfig;

/// Print a commented default config file to stdout.
pub fn show() {
    let path = AppConfig::config_dir().join("config.toml");
    println!("# Legion configuration");
    println!("# Save as {}", path.display());
    println!("# Environment overrides: LEGION_API_KEY, LEGION_API_URL, LEGION_MODEL");
    println!();
    print!("{}", AppConfig::default_toml());
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = AppConfig::load()?;
    println!("   OK  Config parsed successfully");

    let mut warnings = Vec::new();

    if config.provider.api_key.is_none() && !is_local(&config.provider.api_url) {
        warnings.push("No API key set for a remote endpoint (set LEGION_API_KEY)");
    }

    if config.tools.enabled.is_empty() {
        warnings.push("No tools enabled; the model will only answer in text");
    }

    let unknown: Vec<&str> = config
        .tools
        .enabled
        .iter()
        .map(String::as_str)
        .filter(|name| !legion_tools::BUILTIN_TOOLS.contains(name))
        .collect();
    let unknown_warning = format!("Unknown tools will be skipped: {}", unknown.join(", "));
    if !unknown.is_empty() {
        warnings.push(unknown_warning.as_str());
    }

    if warnings.is_empty() {
        println!("   OK  All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   WARN  {w}");
        }
    }

    println!();
    println!("   Provider: {} at {}", config.provider.name, config.provider.api_url);
    println!("   Model:    {}", config.provider.model);
    println!("   Rounds:   {}", config.agent.max_tool_rounds);

    Ok(())
}

fn is_local(url: &str) -> bool {
    url.contains("://localhost") || url.contains("://127.0.0.1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_urls_detected() {
        assert!(is_local("http://localhost:11434/v1"));
        assert!(is_local("http://127.0.0.1:8000/v1"));
        assert!(!is_local("https://api.openai.com/v1"));
    }
}
