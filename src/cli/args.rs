//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--cwd <path>`: Run as if in that directory
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::types::{Concurrency, PackageManager};

/// verify-repo - Declarative repository checks with a fluent API
#[derive(Parser, Debug)]
#[command(name = "verify-repo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if verify-repo was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover verify files and run every declared check
    #[command(
        long_about = "Discover verify files and run every declared check.\n\n\
            Verify files (default pattern **/*.verify) declare checks with the \
            fluent syntax, one chain per statement. All declared checks run with \
            bounded concurrency and the process exits with status 1 when any fails.",
        after_help = "\
EXAMPLES:
    # Run every check, listing failures only
    verify-repo run

    # List every result with its duration
    verify-repo run --verbose

    # One check at a time
    verify-repo run --sequential

    # Only the checks under ci/
    verify-repo run --pattern 'ci/**/*.verify'"
    )]
    Run(RunArgs),

    /// Print the documentation of every built-in plugin
    Docs,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments of `verify-repo run`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// List every result instead of failures only
    #[arg(long)]
    pub verbose: bool,

    /// Maximum number of checks in flight (a positive integer, or true for unbounded)
    #[arg(long, value_name = "N", conflicts_with = "sequential")]
    pub concurrency: Option<Concurrency>,

    /// Run checks one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Verify-file glob, relative to the root (repeatable)
    #[arg(long = "pattern", value_name = "GLOB")]
    pub patterns: Vec<String>,

    /// Additional glob of files to skip (repeatable)
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Package manager used by script checks (npm, yarn, pnpm, bun)
    #[arg(long, value_name = "PM")]
    pub package_manager: Option<PackageManager>,

    /// Print the run summary as JSON instead of the report
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// The concurrency override requested on the command line.
    pub fn concurrency_override(&self) -> Option<Concurrency> {
        if self.sequential {
            Some(Concurrency::sequential())
        } else {
            self.concurrency
        }
    }
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
