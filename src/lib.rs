//! verify-repo - Declarative repository checks with a fluent API
//!
//! verify-repo lets a repository state facts about itself (files exist,
//! the worktree is clean, a command exits 0, output matches a pattern) as
//! fluent chains such as `verify.file("README.md").exists()`, and runs all
//! of them with bounded concurrency.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to runner)
//! - [`runner`] - High-level run contract: config in, summary out
//! - [`loader`] - Verify-file discovery, parsing, and evaluation
//! - [`engine`] - Plugin registry, verification contexts, and the executor
//! - [`plugins`] - Built-in filesystem, git, command, and package plugins
//! - [`git`] - Single interface for all Git operations
//! - [`verify`] - Process-wide façade over one engine
//! - [`core`] - Shared types and configuration
//! - [`ui`] - User-facing output and report rendering
//!
//! # Correctness Invariants
//!
//! 1. Every chain schedules exactly one check
//! 2. A registered check runs exactly once per run and yields one result
//! 3. Results are reported in declaration order, whatever the concurrency
//! 4. A failing or panicking check never aborts the run

pub mod cli;
pub mod core;
pub mod engine;
pub mod git;
pub mod loader;
pub mod plugins;
pub mod runner;
pub mod ui;
pub mod verify;
