//! Lethe daemon - runs the memory lifecycle engines

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lethe::config::Config;
use lethe::error::Result;
use lethe::MemoryRuntime;

/// Lethe - tiered memory lifecycle engine for autonomous agents
#[derive(Parser)]
#[command(name = "lethed")]
#[command(about = "Tiered memory lifecycle engine for autonomous agents")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the lifecycle engines (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lethe=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return parse_config(&path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".lethe").join("config.toml")),
        dirs::config_dir().map(|c| c.join("lethe").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return parse_config(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

fn parse_config(path: &PathBuf) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        lethe::LetheError::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| lethe::LetheError::Config(format!("Failed to parse config: {e}")))
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Lethe daemon");

    let config = load_config(config_path)?;
    tracing::debug!("Config loaded: {:?}", config);

    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir).map_err(|e| {
        lethe::LetheError::Storage(format!(
            "Failed to create data directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;

    let runtime = MemoryRuntime::new(config)?;
    let handle = runtime.start();

    // Periodic status log until ctrl-c.
    let mut status = tokio::time::interval(Duration::from_secs(60));
    status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    status.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                match runtime.stats().await {
                    Ok(stats) => tracing::info!(
                        "Tiers: {} scopes, {} turns, {} facts, {} episodes, {} documents; \
                         bus: {} retained, {} trimmed unconsumed",
                        stats.scopes,
                        stats.turns,
                        stats.facts,
                        stats.episodes,
                        stats.documents,
                        stats.bus_retained,
                        stats.bus_trimmed_unconsumed
                    ),
                    Err(e) => tracing::warn!("Stats collection failed: {e}"),
                }
            }
        }
    }

    tracing::info!("Shutting down lifecycle engines");
    handle.stop().await;
    tracing::info!("Lethe daemon stopped");
    Ok(())
}
