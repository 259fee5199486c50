//! Configuration system for simplesess.
//!
//! Provides TOML-based configuration with:
//! - Session expiration and refresh-variant settings
//! - Cookie attributes for issued session tokens
//! - Garbage collection schedule
//! - Record store location
//!
//! Config files are layered: the user config directory first, then a
//! project-local `simplesess.toml`. See [`ConfigLoader`].

pub mod error;
pub mod loader;
pub mod types;

pub use loader::{
    CONFIG_DIR_ENV, ConfigLoader, ConfigSource, Layer, LayerStatus, LoadedConfig,
    read_config_file, user_config_dir, user_config_path, write_config_file,
};
pub use error::{ConfigError, Result};
pub use types::*;
