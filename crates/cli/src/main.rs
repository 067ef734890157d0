//! agentloop CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `chat`: Run one turn of a conversation
//! - `ingest`: Split files and store them as knowledge
//! - `config`: Print the effective configuration

use agentloop_config::AppConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "agentloop",
    about = "agentloop: retrieval-augmented agent orchestration",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (default: ~/.agentloop/config.toml)
    #[arg(short, long, global = true, env = "AGENTLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Send one message to a conversation
    Chat {
        conversation_id: String,
        message: String,

        /// Run the streaming tool loop and print each event
        #[arg(short, long)]
        stream: bool,
    },

    /// Split text files and add them to the knowledge store
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides()?;
            config
        }
        None => AppConfig::load().context("Failed to load config")?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(config, port, host).await?,
        Commands::Chat {
            conversation_id,
            message,
            stream,
        } => commands::chat::run(config, &conversation_id, &message, stream).await?,
        Commands::Ingest { files } => commands::ingest::run(config, &files).await?,
        Commands::Config => commands::config_cmd::run(&config)?,
    }

    Ok(())
}
