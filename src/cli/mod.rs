//! cli
//!
//! Command-line interface layer for verify-repo.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install the tracing subscriber
//! - Delegate to command handlers
//! - Does NOT declare or execute checks directly
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to
//! [`crate::runner`] for execution and [`crate::ui`] for rendering.

pub mod args;
pub mod commands;

pub use args::{Cli, Command, RunArgs, Shell};

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tracing_subscriber::EnvFilter;

use crate::ui::output::Verbosity;

/// Environment variable holding the tracing filter.
pub const LOG_ENV: &str = "VERIFY_REPO_LOG";

/// Settings shared by every command, taken from the global flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub cwd: Option<PathBuf>,
    pub debug: bool,
    pub quiet: bool,
}

impl Context {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.debug)
    }

    /// The directory checks are declared against: `--cwd`, or the process
    /// working directory.
    pub fn root(&self) -> Result<PathBuf> {
        let dir = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().context("failed to read the current directory")?,
        };
        dir.canonicalize()
            .with_context(|| format!("cannot use {} as the root", dir.display()))
    }
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    let ctx = Context {
        cwd: cli.cwd.clone(),
        debug: cli.debug,
        quiet: cli.quiet,
    };

    commands::dispatch(cli.command, &ctx)
}

/// Install the stderr subscriber. A no-op when one is already installed.
pub fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
