//! # trainmcp
//!
//! Train ticket assistant: an LLM that answers through the tools of a
//! 12306 MCP server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trainmcp_core::Config;

mod commands;
mod tui;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    pub config_path: PathBuf,
}

/// trainmcp - train ticket assistant over MCP
#[derive(Parser)]
#[command(name = "trainmcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON or TOML)
    #[arg(short, long, env = "CONFIG_PATH", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Tool-calling rounds per question before an answer is forced
    #[arg(long, value_name = "N")]
    max_iterations: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session (default)
    Chat,
    /// Check connectivity to the MCP server
    Probe {
        /// Server base URL, defaults to the configured one
        #[arg(long)]
        url: Option<String>,
        /// Tool invoked with empty arguments
        #[arg(long, default_value = "get-current-date")]
        tool: String,
    },
    /// List the built-in station codes
    Stations {
        /// Only cities containing this text
        keyword: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_deref());
    let loaded = Config::load(Some(&config_path));

    // Logging comes after loading since the level is configurable
    let level = loaded
        .as_ref()
        .map(|c| c.logging.filter_directive())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(level)
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if !config_path.exists() {
        warn!(path = %config_path.display(), "Config file not found, using defaults");
    }
    let config = match loaded {
        Ok(config) => {
            info!(path = %config_path.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    let ctx = AppContext {
        config,
        config_path,
    };

    match cli.command {
        None | Some(Commands::Chat) => {
            tui::run(&ctx, cli.max_iterations).await?;
        }
        Some(Commands::Probe { url, tool }) => {
            let url = url.unwrap_or_else(|| ctx.config.mcp_server.url.clone());
            commands::probe::run(&url, &tool, &ctx).await?;
        }
        Some(Commands::Stations { keyword }) => {
            commands::stations::run(keyword.as_deref(), &ctx);
        }
        Some(Commands::Config { action }) => {
            commands::config::handle(action, &ctx)?;
        }
    }

    Ok(())
}
