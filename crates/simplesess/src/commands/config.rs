//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use simplesess_config::{GcSection, LayerStatus, SessionSection, SimplesessConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration (default)
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./simplesess.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Effective configuration for JSON output.
#[derive(Debug, Serialize)]
struct ShowOutput<'a> {
    sources: Vec<PathBuf>,
    store_path: Option<PathBuf>,
    expiration_secs: u64,
    refresh_variant_secs: u64,
    config: &'a SimplesessConfig,
    warnings: &'a [String],
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local } => cmd_init(local),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = &loaded.config;
    let session = config.session_config()?;
    let store_path = ctx.store_path().ok();

    if ctx.json_output {
        let output = ShowOutput {
            sources: loaded
                .loaded_from()
                .into_iter()
                .map(|p| p.to_path_buf())
                .collect(),
            store_path,
            expiration_secs: session.expiration.as_secs(),
            refresh_variant_secs: session.refresh_variant.as_secs(),
            config,
            warnings: &loaded.warnings,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# simplesess Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    println!("Session:");
    println!("  expiration:      {}s", session.expiration.as_secs());
    println!("  refresh variant: {}s", session.refresh_variant.as_secs());
    println!();

    let cookie = &session.cookie;
    println!("Cookie:");
    println!("  path:      {}", cookie.path);
    println!(
        "  domain:    {}",
        cookie.domain.as_deref().unwrap_or("(host only)")
    );
    println!("  secure:    {}", cookie.secure);
    println!("  http_only: {}", cookie.http_only);
    println!();

    let gc = config.gc();
    println!("Garbage collection:");
    println!("  interval: {}s", gc.interval_secs);
    println!("  dry_run:  {}", gc.dry_run);
    println!();

    println!("Store:");
    match store_path {
        Some(path) => println!("  path: {}", path.display()),
        None => println!("  path: (unresolved, pass --db)"),
    }
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;

    println!("Config file search order (later overrides earlier):\n");

    for source in &loaded.sources {
        let status = match source.status {
            LayerStatus::Loaded => "✓ loaded   ",
            LayerStatus::Missing => "· not found",
            LayerStatus::Failed(_) => "✗ ignored  ",
        };
        println!("  {} {:<8} {}", status, source.layer, source.path.display());
        if let LayerStatus::Failed(ref reason) = source.status {
            println!("      {}", reason);
        }
    }

    println!();
    let loaded_count = loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'simplesess config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("simplesess.toml")
    } else {
        simplesess_config::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    let config = SimplesessConfig {
        session: Some(SessionSection::default()),
        cookie: Some(Default::default()),
        gc: Some(GcSection::default()),
        store: None,
    };
    simplesess_config::write_config_file(&config, &path)?;

    println!("✓ Created {}", path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    match simplesess_config::user_config_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("Could not determine config directory"),
    }
    Ok(())
}
