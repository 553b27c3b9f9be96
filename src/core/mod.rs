//! core
//!
//! Shared types and configuration for verify-repo.
//!
//! # Modules
//!
//! - [`types`] - Value types: Metadata, TestResult, RunSummary, Concurrency, etc.
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states (a zero worker bound is unrepresentable)
//! - Schemas are strict and self-describing

pub mod config;
pub mod types;
