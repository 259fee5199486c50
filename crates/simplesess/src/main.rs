//! simplesess - partitionable server-side sessions
//!
//! Maintenance CLI for a session store: garbage collection, inspection and
//! configuration.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

mod commands;

use commands::{config, gc, inspect};
use simplesess_config::ConfigLoader;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// simplesess - partitionable server-side sessions
#[derive(Parser)]
#[command(name = "simplesess")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(long, global = true, env = "SIMPLESESS_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Session database (default: from config, then the platform data dir)
    #[arg(long, global = true, env = "SIMPLESESS_DB", value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Delete expired sessions, once or on a schedule
    Gc(gc::GcArgs),

    /// List stored sessions
    Inspect(inspect::InspectArgs),

    /// Show the effective configuration
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "simplesess=debug,simplesess_session=debug,simplesess_store=debug,simplesess_config=debug,info"
    } else {
        "simplesess=info,simplesess_session=info,simplesess_store=info,warn"
    };

    let log_dir = simplesess_config::user_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "simplesess.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "simplesess=trace,simplesess_session=trace,simplesess_store=trace,simplesess_config=trace,info",
                )),
        )
        .init();

    // An explicit --config file replaces discovery entirely.
    let loaded = ConfigLoader::new()
        .explicit_file(cli.config.as_deref())
        .load()
        .context("Failed to load configuration")?;
    for w in &loaded.warnings {
        warn!("{}", w);
    }

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        loaded,
        db_override: cli.db,
    };

    match cli.command {
        Commands::Gc(args) => gc::run(args, &ctx).await,
        Commands::Inspect(args) => inspect::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
