//! CLI command handlers.

pub mod config;
pub mod gc;
pub mod inspect;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use simplesess_config::{LoadedConfig, SimplesessConfig};
use simplesess_store::SqliteRecordStore;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Resolved configuration and where it came from.
    pub loaded: LoadedConfig,
    /// `--db` flag, overriding `[store] path`.
    pub db_override: Option<PathBuf>,
}

impl Context {
    /// The merged configuration.
    pub fn config(&self) -> &SimplesessConfig {
        &self.loaded.config
    }

    /// Database path after applying the `--db` override.
    pub fn store_path(&self) -> Result<PathBuf> {
        self.db_override
            .clone()
            .or_else(|| self.config().store_path())
            .ok_or_else(|| anyhow::anyhow!("Could not determine session database path; pass --db"))
    }

    /// Open the session database.
    pub fn open_store(&self) -> Result<Arc<SqliteRecordStore>> {
        let path = self.store_path()?;
        let store = SqliteRecordStore::open(&path)
            .with_context(|| format!("Failed to open session database {}", path.display()))?;
        Ok(Arc::new(store))
    }
}
