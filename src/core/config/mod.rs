//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! verify-repo has two configuration scopes:
//! - **Global**: User-level defaults
//! - **Repo**: Settings checked into the repository being verified
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Repo config file
//! 4. CLI flags / [`crate::runner::RunOptions`] (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$VERIFY_REPO_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/verify-repo/config.toml`
//! 3. `~/.verify-repo/config.toml`
//!
//! # Repo Config Locations
//!
//! Searched in order:
//! 1. `<root>/verify.config.toml` (canonical)
//! 2. `<root>/.verify-repo/config.toml` (compatibility, warns)
//!
//! # Example
//!
//! ```no_run
//! use verify_repo::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/path/to/repo"))).unwrap();
//! let config = result.config;
//!
//! println!("Package manager: {}", config.package_manager());
//! println!("Patterns: {:?}", config.patterns());
//! ```

pub mod schema;

pub use schema::{GlobalConfig, RepoConfig};

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::types::{Concurrency, PackageManager};

/// Canonical repo config file name, relative to the root.
pub const REPO_CONFIG_FILE: &str = "verify.config.toml";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence automatically: repo config overrides global
/// config, which overrides built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: GlobalConfig,
    /// Repository configuration (if present)
    pub repo: Option<RepoConfig>,
    global_path: Option<PathBuf>,
    repo_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// If `root` is provided, also loads the repository's config.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed.
    /// Missing config files are not an error (defaults are used).
    pub fn load(root: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();

        let (global, global_path) = Self::load_global()?;

        let (repo, repo_path) = match root {
            Some(path) => Self::load_repo(path, &mut warnings)?,
            None => (None, None),
        };

        global.validate()?;
        if let Some(ref r) = repo {
            r.validate()?;
        }

        Ok(ConfigLoadResult {
            config: Config {
                global,
                repo,
                global_path,
                repo_path,
            },
            warnings,
        })
    }

    /// Load global configuration from standard locations.
    fn load_global() -> Result<(GlobalConfig, Option<PathBuf>), ConfigError> {
        if let Ok(path) = std::env::var("VERIFY_REPO_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                let config = read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("verify-repo/config.toml");
            if path.exists() {
                let config = read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".verify-repo/config.toml");
            if path.exists() {
                let config = read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((GlobalConfig::default(), None))
    }

    /// Load repository configuration from standard locations.
    fn load_repo(
        root: &Path,
        warnings: &mut Vec<ConfigWarning>,
    ) -> Result<(Option<RepoConfig>, Option<PathBuf>), ConfigError> {
        let canonical = Self::repo_config_path(root);
        if canonical.exists() {
            let config = read_config(&canonical)?;
            return Ok((Some(config), Some(canonical)));
        }

        let compat = root.join(".verify-repo/config.toml");
        if compat.exists() {
            warnings.push(ConfigWarning {
                message: format!(
                    "Using deprecated config location. Please move to '{}'",
                    canonical.display()
                ),
                path: compat.clone(),
            });
            let config = read_config(&compat)?;
            return Ok((Some(config), Some(compat)));
        }

        Ok((None, None))
    }

    /// Get the canonical path for global config.
    ///
    /// Returns `~/.verify-repo/config.toml`.
    pub fn global_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".verify-repo/config.toml"))
    }

    /// Get the canonical path for repo config under `root`.
    pub fn repo_config_path(root: &Path) -> PathBuf {
        root.join(REPO_CONFIG_FILE)
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Default worker bound, if configured anywhere.
    ///
    /// `None` means the executor falls back to unbounded.
    pub fn concurrency(&self) -> Option<Concurrency> {
        self.repo
            .as_ref()
            .and_then(|r| r.concurrency)
            .or(self.global.concurrency)
    }

    /// Package manager for script checks.
    ///
    /// Defaults to npm if not configured.
    pub fn package_manager(&self) -> PackageManager {
        self.repo
            .as_ref()
            .and_then(|r| r.package_manager)
            .or(self.global.package_manager)
            .unwrap_or_default()
    }

    /// Whether verbose reporting is the default.
    ///
    /// Defaults to `false` if not configured.
    pub fn verbose(&self) -> bool {
        self.global.verbose.unwrap_or(false)
    }

    /// Discovery patterns from repo config, if any.
    pub fn patterns(&self) -> Option<&[String]> {
        self.repo.as_ref().and_then(|r| r.patterns.as_deref())
    }

    /// Ignore patterns from repo config, if any.
    pub fn ignore(&self) -> Option<&[String]> {
        self.repo.as_ref().and_then(|r| r.ignore.as_deref())
    }

    /// Get the path to the loaded global config file.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Get the path to the loaded repo config file.
    pub fn repo_config_loaded_from(&self) -> Option<&Path> {
        self.repo_path.as_deref()
    }
}

/// Read and parse a TOML config file.
fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
