//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [session]                # expiration policy
//! [cookie]                 # issued cookie attributes
//! [gc]                     # garbage collection schedule
//! [store]                  # record store location
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simplesess_session::{CookieOptions, DEFAULT_GC_INTERVAL, SessionConfig};

use crate::{ConfigError, Result};

/// Application name for platform directory resolution.
pub(crate) const APP_NAME: &str = "simplesess";

/// Default database filename inside the data directory.
const DEFAULT_DB_FILE: &str = "sessions.db";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplesessConfig {
    /// Expiration policy.
    pub session: Option<SessionSection>,

    /// Cookie attributes.
    pub cookie: Option<CookieOptions>,

    /// Garbage collection.
    pub gc: Option<GcSection>,

    /// Record store.
    pub store: Option<StoreSection>,
}

impl SimplesessConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole.
    pub fn merge(&mut self, other: SimplesessConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.cookie.is_some() {
            self.cookie = other.cookie;
        }

        if other.gc.is_some() {
            self.gc = other.gc;
        }

        if other.store.is_some() {
            self.store = other.store;
        }
    }

    /// Build a validated [`SessionConfig`].
    pub fn session_config(&self) -> Result<SessionConfig> {
        let session = self.session.clone().unwrap_or_default();
        let config = SessionConfig::new()
            .with_expiration(Duration::from_secs(session.expiration_secs))
            .with_refresh_variant(Duration::from_secs(session.refresh_variant_secs))
            .with_cookie(self.cookie.clone().unwrap_or_default());

        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Effective garbage collection settings.
    pub fn gc(&self) -> GcSection {
        self.gc.clone().unwrap_or_default()
    }

    /// Configured database path, falling back to the platform data directory.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .or_else(default_store_path)
    }
}

/// Default database location (`<data dir>/simplesess/sessions.db`).
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_NAME).join(DEFAULT_DB_FILE))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Expiration policy.
///
/// ```toml
/// [session]
/// expiration_secs = 1800
/// refresh_variant_secs = 1440
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Seconds a session stays valid after its expiration was last computed.
    pub expiration_secs: u64,
    /// Seconds after which the stored expiration is refreshed.
    /// Must be less than `expiration_secs`.
    pub refresh_variant_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            expiration_secs: defaults.expiration.as_secs(),
            refresh_variant_secs: defaults.refresh_variant.as_secs(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Garbage Collection Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Garbage collection schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcSection {
    /// Seconds between scheduled collections.
    pub interval_secs: u64,
    /// Report expired sessions without deleting them.
    pub dry_run: bool,
}

impl Default for GcSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_GC_INTERVAL.as_secs(),
            dry_run: false,
        }
    }
}

impl GcSection {
    /// Interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Record store location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// SQLite database path.
    pub path: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
