//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$VERIFY_REPO_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/verify-repo/config.toml`
//! 3. `~/.verify-repo/config.toml` (canonical write location)
//!
//! # Repo Config
//!
//! Located at `<root>/verify.config.toml` (canonical).
//!
//! # Validation
//!
//! Config values are validated after parsing. Discovery patterns must be
//! non-empty, valid globs.

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::{Concurrency, PackageManager};

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// concurrency = 4
/// package_manager = "pnpm"
/// verbose = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default worker bound (`true` = unbounded, `false` = sequential)
    pub concurrency: Option<Concurrency>,

    /// Package manager for `script(...)` checks
    pub package_manager: Option<PackageManager>,

    /// Print every result, not only failures
    pub verbose: Option<bool>,
}

impl GlobalConfig {
    /// Validate the configuration values.
    ///
    /// Every representable value is currently valid; kept for symmetry with
    /// [`RepoConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Repository configuration.
///
/// # Example
///
/// ```toml
/// concurrency = false
/// package_manager = "yarn"
/// patterns = ["checks/**/*.verify"]
/// ignore = ["**/fixtures/**"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    /// Worker bound for this repository
    pub concurrency: Option<Concurrency>,

    /// Package manager for `script(...)` checks
    pub package_manager: Option<PackageManager>,

    /// Verify-file discovery patterns, relative to the root
    pub patterns: Option<Vec<String>>,

    /// Patterns excluded from discovery
    pub ignore: Option<Vec<String>>,
}

impl RepoConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a pattern is empty or not a valid glob.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(patterns) = &self.patterns {
            if patterns.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "patterns cannot be an empty list".to_string(),
                ));
            }
            validate_globs("patterns", patterns)?;
        }

        if let Some(ignore) = &self.ignore {
            validate_globs("ignore", ignore)?;
        }

        Ok(())
    }
}

fn validate_globs(field: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        if pattern.trim().is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "{} contains an empty pattern",
                field
            )));
        }
        glob::Pattern::new(pattern).map_err(|e| {
            ConfigError::InvalidValue(format!("invalid glob in {}: '{}': {}", field, pattern, e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_parses_all_fields() {
        let config: GlobalConfig = toml::from_str(
            r#"
            concurrency = 4
            package_manager = "pnpm"
            verbose = true
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, Concurrency::limited(4));
        assert_eq!(config.package_manager, Some(PackageManager::Pnpm));
        assert_eq!(config.verbose, Some(true));
    }

    #[test]
    fn repo_rejects_unknown_fields() {
        let result: Result<RepoConfig, _> = toml::from_str("timeout = 10");
        assert!(result.is_err());
    }

    #[test]
    fn repo_rejects_bad_glob() {
        let config = RepoConfig {
            patterns: Some(vec!["checks/[".to_string()]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn repo_rejects_empty_pattern_list() {
        let config = RepoConfig {
            patterns: Some(vec![]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn repo_accepts_valid_patterns() {
        let config = RepoConfig {
            patterns: Some(vec!["**/*.verify".to_string()]),
            ignore: Some(vec!["**/node_modules/**".to_string()]),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
