//! Legion CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive chat or single-message mode
//! - `tools`: List the enabled built-in tools
//! - `config`: Print a default config file, or validate the current one

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "legion",
    about = "Legion: tool-calling conversation runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the tools offered to the model
    Tools,

    /// Print a default config file
    Config {
        /// Validate the current configuration instead
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat { message } => commands::chat::run(message).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Config { validate: false } => commands::config_cmd::show(),
        Commands::Config { validate: true } => commands::config_cmd::validate()?,
    }

    Ok(())
}
