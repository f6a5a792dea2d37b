use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fintelligent::SessionConfig;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;

#[derive(Parser)]
#[command(name = "fintel")]
#[command(about = "Terminal client for the spreadsheet assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to ~/.fintelligent)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant against a local workbook
    Chat(ChatArgs),

    /// Print the resolved configuration
    Config,
}

#[derive(Parser)]
struct ChatArgs {
    /// Backend WebSocket url (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Workbook JSON file to load; a fresh one-sheet workbook is used otherwise
    #[arg(long)]
    workbook: Option<PathBuf>,

    /// Write the workbook back to --workbook on exit
    #[arg(long, requires = "workbook")]
    save: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .unwrap_or_else(fintelligent::config::default_config_dir);
    let mut config = SessionConfig::load(&config_dir)
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;

    match cli.command {
        Commands::Chat(args) => {
            init_tracing(args.debug);
            if let Some(url) = args.url {
                config.backend_url = url;
            }
            cli::chat::run(&config, args.workbook, args.save).await
        }
        Commands::Config => cli::print_config(&config_dir),
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "fintel=debug,fintelligent=debug,info"
    } else {
        "fintel=info,fintelligent=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // stdout belongs to the conversation.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
