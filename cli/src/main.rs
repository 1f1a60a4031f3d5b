// pairlink: pairing & relay coordinator
//
// Runs the coordinator behind a websocket endpoint and manages its config.

mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pairlink_core::{Coordinator, StaticDiscovery};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "pairlink")]
#[command(about = "PairLink pairing and message relay coordinator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator
    Start {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<IpAddr>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, bind } => cmd_start(port, bind).await,
        Commands::Config { action } => cmd_config(action),
    }
}

/// Install the tracing subscriber; the returned guard flushes file logs on drop
fn init_logging(config: &config::Config) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(dir, "pairlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

async fn cmd_start(port: Option<u16>, bind: Option<IpAddr>) -> Result<()> {
    let config = config::Config::load()?;
    let _log_guard = init_logging(&config)?;

    let port = port.unwrap_or(config.listen_port);
    let bind = match bind {
        Some(ip) => ip,
        None => config
            .bind_address
            .parse()
            .context("Invalid bind_address in config")?,
    };
    let addr = SocketAddr::new(bind, port);

    let coordinator = Arc::new(Coordinator::with_config(config.coordinator_config()));
    let discovery = Arc::new(StaticDiscovery::new(config.known_peers.clone()));
    let ctx = Arc::new(server::ServerContext::new(coordinator).with_discovery(discovery));

    println!("{}", "PairLink: starting...".bold());
    println!();
    println!("  {} WebSocket: {}", "✓".green(), format!("ws://{}/ws", addr).bright_cyan());
    println!("  {} Status:    {}", "✓".green(), format!("http://{}/api/status", addr).bright_cyan());
    println!();
    println!("Press {} to stop.", "Ctrl+C".bright_yellow());

    tokio::select! {
        result = server::serve(addr, ctx) => result?,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => println!("{}", "(not set)".dimmed()),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
