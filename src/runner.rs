//! runner
//!
//! High-level run contract: configuration in, summary out.
//!
//! # Flow
//!
//! 1. Load configuration for the root (global, then repo file)
//! 2. Merge explicit options over it
//! 3. Build an engine with the built-in plugins plus any extra plugins
//! 4. Discover verify files and load each inside its file scope
//! 5. Run with the concurrency override
//!
//! Every run owns its engine; nothing here touches the process-wide
//! [`crate::verify`] handle.
//!
//! # Precedence
//!
//! | Setting          | Source order (first wins)                          |
//! |------------------|----------------------------------------------------|
//! | patterns         | options, repo config, `**/*.verify`                |
//! | ignore           | defaults + repo config + options (combined)        |
//! | concurrency      | options (override), then config (engine default)   |
//! | package manager  | options, repo config, global config, npm           |

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::{Config, ConfigError};
use crate::core::types::{Concurrency, PackageManager, RunSummary};
use crate::engine::{DeclarationError, EngineConfig, RepoPlugin, RepoVerificationEngine};
use crate::loader::{self, LoadError};
use crate::plugins;

/// Errors from a verification run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Load(#[from] LoadError),

    /// The run completed and at least one check failed.
    #[error("{} failed.", pluralize_checks(.0.failed))]
    Failed(RunSummary),
}

impl RunError {
    /// The summary of a completed run, when the run got that far.
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunError::Failed(summary) => Some(summary),
            _ => None,
        }
    }
}

fn pluralize_checks(count: usize) -> String {
    if count == 1 {
        "1 check".to_string()
    } else {
        format!("{} checks", count)
    }
}

/// Parameters of one run.
#[derive(Clone)]
pub struct RunOptions {
    /// Repository root; patterns and relative paths resolve against it.
    pub root: PathBuf,
    /// Discovery patterns. Empty means "use config, then the default".
    pub patterns: Vec<String>,
    /// Extra ignore patterns.
    pub ignore: Vec<String>,
    /// Worker bound for this run, overriding configuration.
    pub concurrency: Option<Concurrency>,
    pub package_manager: Option<PackageManager>,
    /// Applied after the built-in plugins.
    pub plugins: Vec<Arc<dyn RepoPlugin>>,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: Vec::new(),
            ignore: Vec::new(),
            concurrency: None,
            package_manager: None,
            plugins: Vec::new(),
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("root", &self.root)
            .field("patterns", &self.patterns)
            .field("ignore", &self.ignore)
            .field("concurrency", &self.concurrency)
            .field("package_manager", &self.package_manager)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

/// Build the engine for `options` over already-loaded configuration.
pub fn build_engine(options: &RunOptions, config: &Config) -> Result<RepoVerificationEngine, RunError> {
    let mut all = plugins::builtin();
    all.extend(options.plugins.iter().cloned());

    let engine = RepoVerificationEngine::new(EngineConfig {
        plugins: all,
        root: Some(options.root.clone()),
        default_concurrency: config.concurrency(),
        package_manager: options
            .package_manager
            .unwrap_or_else(|| config.package_manager()),
    })?;
    Ok(engine)
}

/// Discover, load, and run every verify file under the root.
///
/// Returns [`RunError::Failed`] carrying the summary when any check failed.
pub async fn run(options: RunOptions) -> Result<RunSummary, RunError> {
    let loaded = Config::load(Some(&options.root))?;
    for warning in &loaded.warnings {
        debug!(path = %warning.path.display(), "{}", warning.message);
    }
    let config = loaded.config;

    let engine = build_engine(&options, &config)?;

    let patterns = if !options.patterns.is_empty() {
        options.patterns.clone()
    } else if let Some(configured) = config.patterns() {
        configured.to_vec()
    } else {
        loader::default_patterns()
    };
    let mut ignore = loader::default_ignore();
    ignore.extend(config.ignore().unwrap_or_default().iter().cloned());
    ignore.extend(options.ignore.iter().cloned());

    let files = loader::discover(&options.root, &patterns, &ignore)?;
    info!(files = files.len(), "discovered verify files");
    for file in &files {
        loader::load_file(&engine, file)?;
    }
    debug!(planned = engine.planned_tests(), "declaration complete");

    let summary = engine.run(options.concurrency).await?;
    if summary.failed > 0 {
        return Err(RunError::Failed(summary));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_message_pluralizes() {
        let mut summary = RunSummary::empty();
        summary.failed = 1;
        assert_eq!(RunError::Failed(summary.clone()).to_string(), "1 check failed.");
        summary.failed = 2;
        assert_eq!(RunError::Failed(summary).to_string(), "2 checks failed.");
    }

    #[test]
    fn declaration_errors_are_transparent() {
        let err = RunError::from(DeclarationError::EmptyDescription);
        assert_eq!(err.to_string(), "Repo test description must be a non-empty string.");
        assert!(err.summary().is_none());
    }
}
