//! Layered config loading.
//!
//! A [`ConfigLoader`] reads up to two layers, each overriding the one before:
//! the user file (`<config dir>/config.toml`) and the project file
//! (`<project dir>/simplesess.toml`). An explicit file replaces both.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::APP_NAME;
use crate::{ConfigError, Result, SimplesessConfig};

const PROJECT_FILE: &str = "simplesess.toml";
const USER_FILE: &str = "config.toml";

/// Overrides the user config directory when set and non-empty.
pub const CONFIG_DIR_ENV: &str = "SIMPLESESS_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
    /// A file named on the command line; no other layer is read.
    Explicit,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Layer::User => "user",
            Layer::Project => "project",
            Layer::Explicit => "explicit",
        })
    }
}

/// What happened when a layer was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    Loaded,
    Missing,
    /// The file exists but could not be used; the message is also in
    /// [`LoadedConfig::warnings`].
    Failed(String),
}

/// One layer that was considered.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    pub status: LayerStatus,
}

impl ConfigSource {
    pub fn is_loaded(&self) -> bool {
        self.status == LayerStatus::Loaded
    }
}

/// Merged configuration and the layers it came from, lowest precedence first.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: SimplesessConfig,
    pub sources: Vec<ConfigSource>,
    /// Broken layers and settings that are valid but look like mistakes.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the layers that contributed to the config.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.is_loaded())
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Builder for reading the config layers.
///
/// ```no_run
/// use simplesess_config::ConfigLoader;
///
/// let loaded = ConfigLoader::new().project_dir("/srv/app").load()?;
/// let session = loaded.config.session_config()?;
/// # Ok::<(), simplesess_config::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_dir: Option<PathBuf>,
    project_dir: PathBuf,
    explicit: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Read the user directory from the environment and the project file
    /// from the working directory.
    pub fn new() -> Self {
        Self {
            user_dir: user_config_dir(),
            project_dir: PathBuf::from("."),
            explicit: None,
        }
    }

    /// Use `dir` as the user config directory.
    pub fn user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    /// Skip the user layer.
    pub fn no_user_dir(mut self) -> Self {
        self.user_dir = None;
        self
    }

    /// Look for `simplesess.toml` in `dir`.
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Read only `path`. Unlike discovered layers it must exist and parse.
    pub fn explicit_file(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.explicit = path.map(Into::into);
        self
    }

    /// Read and merge the layers.
    ///
    /// A discovered layer that exists but cannot be read or parsed is
    /// skipped with a warning. An explicit file that fails is an error.
    pub fn load(self) -> Result<LoadedConfig> {
        let mut loaded = LoadedConfig::default();

        if let Some(path) = self.explicit {
            loaded.config = read_config_file(&path)?;
            debug!(path = %path.display(), "Loaded explicit config file");
            loaded.sources.push(ConfigSource {
                layer: Layer::Explicit,
                path,
                status: LayerStatus::Loaded,
            });
        } else {
            if let Some(dir) = self.user_dir {
                loaded.apply(Layer::User, dir.join(USER_FILE));
            }
            loaded.apply(Layer::Project, self.project_dir.join(PROJECT_FILE));
        }

        loaded.warnings.extend(risky_settings(&loaded.config));
        Ok(loaded)
    }
}

impl LoadedConfig {
    fn apply(&mut self, layer: Layer, path: PathBuf) {
        let status = if !path.is_file() {
            LayerStatus::Missing
        } else {
            match read_config_file(&path) {
                Ok(overlay) => {
                    debug!(%layer, path = %path.display(), "Loaded config layer");
                    self.config.merge(overlay);
                    LayerStatus::Loaded
                }
                Err(e) => {
                    let message = e.to_string();
                    self.warnings
                        .push(format!("Ignoring {layer} config {}: {message}", path.display()));
                    LayerStatus::Failed(message)
                }
            }
        };
        self.sources.push(ConfigSource { layer, path, status });
    }
}

/// Parse one config file.
pub fn read_config_file(path: &Path) -> Result<SimplesessConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    SimplesessConfig::from_toml(&contents)
}

/// Write `config` to `path`, creating missing parent directories.
pub fn write_config_file(config: &SimplesessConfig, path: &Path) -> Result<()> {
    let write_err = |path: &Path, source: std::io::Error| ConfigError::WriteFile {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// The user config directory: `SIMPLESESS_CONFIG_DIR`, else the platform
/// config dir joined with `simplesess`.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_NAME)),
    }
}

/// The user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_FILE))
}

fn risky_settings(config: &SimplesessConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.cookie.as_ref().is_some_and(|c| !c.http_only) {
        warnings.push(
            "[cookie] http_only is disabled; session tokens will be readable from scripts."
                .to_string(),
        );
    }
    if config.gc.as_ref().is_some_and(|gc| gc.dry_run) {
        warnings.push("[gc] dry_run is enabled; expired sessions will not be deleted.".to_string());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GcSection;
    use std::fs;
    use tempfile::TempDir;

    /// A user dir and a project dir, both empty.
    struct Dirs {
        user: TempDir,
        project: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            Self {
                user: TempDir::new().unwrap(),
                project: TempDir::new().unwrap(),
            }
        }

        fn write_user(&self, contents: &str) {
            fs::write(self.user.path().join(USER_FILE), contents).unwrap();
        }

        fn write_project(&self, contents: &str) {
            fs::write(self.project.path().join(PROJECT_FILE), contents).unwrap();
        }

        fn loader(&self) -> ConfigLoader {
            ConfigLoader::new()
                .user_dir(self.user.path())
                .project_dir(self.project.path())
        }
    }

    #[test]
    fn test_nothing_on_disk_gives_defaults() {
        let dirs = Dirs::new();
        let loaded = dirs.loader().load().unwrap();

        assert_eq!(loaded.config, SimplesessConfig::default());
        assert!(loaded.loaded_from().is_empty());
        assert!(loaded.warnings.is_empty());
        let layers: Vec<Layer> = loaded.sources.iter().map(|s| s.layer).collect();
        assert_eq!(layers, vec![Layer::User, Layer::Project]);
        assert!(loaded.sources.iter().all(|s| s.status == LayerStatus::Missing));
    }

    #[test]
    fn test_project_overrides_user() {
        let dirs = Dirs::new();
        dirs.write_user(
            "[session]\nexpiration_secs = 3600\nrefresh_variant_secs = 3000\n\n[cookie]\ndomain = \"example.com\"\n",
        );
        dirs.write_project("[session]\nexpiration_secs = 900\nrefresh_variant_secs = 600\n");

        let loaded = dirs.loader().load().unwrap();
        let session = loaded.config.session_config().unwrap();

        assert_eq!(session.expiration.as_secs(), 900);
        assert_eq!(session.refresh_variant.as_secs(), 600);
        assert_eq!(session.cookie.domain.as_deref(), Some("example.com"));
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_without_user_dir_reads_project_only() {
        let dirs = Dirs::new();
        dirs.write_user("[gc]\ninterval_secs = 10\n");
        dirs.write_project("[store]\npath = \"/srv/sessions.db\"\n");

        let loaded = dirs.loader().no_user_dir().load().unwrap();

        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].layer, Layer::Project);
        assert_eq!(loaded.config.gc().interval_secs, GcSection::default().interval_secs);
        assert_eq!(loaded.config.store_path(), Some(PathBuf::from("/srv/sessions.db")));
    }

    #[test]
    fn test_unparsable_layer_is_skipped() {
        let dirs = Dirs::new();
        dirs.write_user("[session\n");
        dirs.write_project("[gc]\ninterval_secs = 60\n");

        let loaded = dirs.loader().load().unwrap();

        assert!(matches!(loaded.sources[0].status, LayerStatus::Failed(_)));
        assert!(loaded.sources[1].is_loaded());
        assert_eq!(loaded.config.gc().interval_secs, 60);
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].starts_with("Ignoring user config"));
    }

    #[test]
    fn test_explicit_file_replaces_discovery() {
        let dirs = Dirs::new();
        dirs.write_project("[gc]\ninterval_secs = 60\n");
        let custom = dirs.project.path().join("custom.toml");
        fs::write(&custom, "[gc]\ninterval_secs = 5\n").unwrap();

        let loaded = dirs.loader().explicit_file(Some(&custom)).load().unwrap();

        assert_eq!(loaded.config.gc().interval_secs, 5);
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].layer, Layer::Explicit);
        assert_eq!(loaded.loaded_from(), vec![custom.as_path()]);
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dirs = Dirs::new();
        let err = dirs
            .loader()
            .explicit_file(Some(dirs.project.path().join("absent.toml")))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_explicit_file_must_parse() {
        let dirs = Dirs::new();
        let custom = dirs.project.path().join("custom.toml");
        fs::write(&custom, "this is not valid toml {{{{").unwrap();

        let err = dirs.loader().explicit_file(Some(&custom)).load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_risky_settings_warn() {
        let dirs = Dirs::new();
        dirs.write_project("[cookie]\nhttp_only = false\n\n[gc]\ndry_run = true\n");

        let loaded = dirs.loader().load().unwrap();

        assert_eq!(loaded.warnings.len(), 2);
        assert!(loaded.warnings[0].contains("http_only"));
        assert!(loaded.warnings[1].contains("dry_run"));
    }

    #[test]
    fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = SimplesessConfig::from_toml("[gc]\ninterval_secs = 120\n").unwrap();

        write_config_file(&config, &path).unwrap();

        assert_eq!(read_config_file(&path).unwrap(), config);
    }

    #[test]
    fn test_layer_names() {
        assert_eq!(Layer::User.to_string(), "user");
        assert_eq!(Layer::Explicit.to_string(), "explicit");
    }
}
