//! `legion chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use legion_agent::{ChatRequest, Orchestrator};
use legion_config::AppConfig;
use legion_core::{CancellationToken, Content, Error};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = legion_providers::from_config(&config)?;
    let registry = Arc::new(legion_tools::registry_from_config(&config.tools));
    let tool_names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();

    let orchestrator = Orchestrator::builder()
        .config(&config)
        .provider(provider)
        .registry(registry)
        .build()?;
    debug!(
        provider = %config.provider.name,
        model = %config.provider.model,
        tools = tool_names.len(),
        "Orchestrator ready"
    );

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = ask(&orchestrator, vec![Content::user(msg)]).await;
        eprint!("\r              \r");
        let content = result?;
        for entry in content {
            println!("{}", entry.text);
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Legion: Interactive Mode");
    println!();
    println!("  Provider:  {} ({})", config.provider.name, config.provider.api_url);
    println!("  Model:     {}", config.provider.model);
    if tool_names.is_empty() {
        println!("  Tools:     none");
    } else {
        println!("  Tools:     {}", tool_names.join(", "));
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C cancels a running request; 'exit' quits.");
    println!();

    // The front-end owns continuity: every turn resends the visible history.
    let mut history: Vec<Content> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        history.push(Content::user(line));
        eprint!("  ...");

        match ask(&orchestrator, history.clone()).await {
            Ok(content) => {
                eprint!("\r     \r");
                println!();
                for entry in &content {
                    for text_line in entry.text.lines() {
                        println!("  Assistant > {text_line}");
                    }
                }
                println!();
                history.extend(content);
            }
            Err(e) => {
                eprint!("\r     \r");
                eprintln!("  [Error] {e}");
                println!();
                history.pop();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one request, cancelling it on Ctrl+C.
async fn ask(orchestrator: &Orchestrator, content: Vec<Content>) -> Result<Vec<Content>, Error> {
    let cancel = CancellationToken::new();
    tokio::select! {
        response = orchestrator.chat(ChatRequest::new(content), cancel.clone()) => {
            response.map(|r| r.content)
        }
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(Error::Cancelled)
        }
    }
}
