//! ui
//!
//! User-facing output.
//!
//! # Modules
//!
//! - [`output`] - Verbosity-aware printing
//! - [`reporter`] - Run summary and plugin documentation rendering
//!
//! # Design
//!
//! All user-facing output goes through this module. Diagnostics go through
//! `tracing` instead and never mix with report text.

pub mod output;
pub mod reporter;
