//! core::types
//!
//! Shared value types for declaration and execution.
//!
//! # Types
//!
//! - [`Metadata`] - Key/value map carried by verification contexts
//! - [`TestStatus`] / [`TestResult`] - Outcome of one executed check
//! - [`RunSummary`] - Aggregate of a whole run, in declaration order
//! - [`Concurrency`] - Worker bound for the executor
//! - [`PackageManager`] - Backend selector handed to plugins
//!
//! # Serialization
//!
//! [`RunSummary`] and [`TestResult`] serialize with camelCase keys
//! (`durationMs`) so the JSON report matches what CI wrappers consume.
//!
//! # Examples
//!
//! ```
//! use verify_repo::core::types::Concurrency;
//!
//! assert_eq!(Concurrency::Unbounded.worker_count(7), 7);
//! assert_eq!(Concurrency::limited(3).unwrap().worker_count(7), 3);
//! assert_eq!(Concurrency::limited(3).unwrap().worker_count(2), 2);
//! assert!(Concurrency::limited(0).is_none());
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Metadata attached to a verification context.
///
/// Child contexts receive a merged copy; a parent's map is never mutated
/// through a child.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Identifier of a declared check, unique until the engine is cleared.
pub type TestId = u64;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid concurrency '{0}': expected a positive integer, true, or false")]
    InvalidConcurrency(String),

    #[error("invalid package manager '{0}': must be one of npm, yarn, pnpm, bun")]
    InvalidPackageManager(String),
}

/// Status of a check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Not yet settled.
    Pending,
    /// The check concluded successfully.
    Passed,
    /// The check failed, threw, or never concluded.
    Failed,
}

/// Result of executing one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: TestId,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Serialized failure (error chain, panic payload).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl TestResult {
    /// Check whether this result passed.
    pub fn is_passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Aggregate of a complete run.
///
/// `results` is always in registration order, independent of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: f64,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    /// Summary of a run with nothing to execute.
    pub fn empty() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            duration_ms: 0.0,
            results: Vec::new(),
        }
    }

    /// Build a summary by tallying settled statuses.
    ///
    /// Results that are still pending count as failed so that
    /// `passed + failed == total` always holds.
    pub fn from_results(results: Vec<TestResult>, duration_ms: f64) -> Self {
        let passed = results.iter().filter(|r| r.is_passed()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }

    /// True when no check failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Iterate over failed results in declaration order.
    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.is_passed())
    }
}

/// Concurrency bound for the executor.
///
/// Serialized as `true` for unbounded and as the worker count otherwise.
/// `false` deserializes to a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Start every check at once.
    Unbounded,
    /// At most this many checks in flight.
    Limited(NonZeroUsize),
}

impl Concurrency {
    /// One check at a time.
    pub fn sequential() -> Self {
        Concurrency::Limited(NonZeroUsize::MIN)
    }

    /// A bounded concurrency, or `None` for zero.
    pub fn limited(workers: usize) -> Option<Self> {
        NonZeroUsize::new(workers).map(Concurrency::Limited)
    }

    /// `override ?? default ?? unbounded`.
    pub fn resolve(override_: Option<Concurrency>, default: Option<Concurrency>) -> Concurrency {
        override_.or(default).unwrap_or(Concurrency::Unbounded)
    }

    /// Number of workers for a plan of `total` checks: `clamp(1, total, bound)`.
    ///
    /// Returns 0 only for an empty plan.
    pub fn worker_count(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        match self {
            Concurrency::Unbounded => total,
            Concurrency::Limited(n) => n.get().min(total),
        }
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Unbounded => write!(f, "unbounded"),
            Concurrency::Limited(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Concurrency {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "unbounded" | "true" => Ok(Concurrency::Unbounded),
            "false" => Ok(Concurrency::sequential()),
            other => other
                .parse::<usize>()
                .ok()
                .and_then(Concurrency::limited)
                .ok_or_else(|| TypeError::InvalidConcurrency(s.to_string())),
        }
    }
}

impl Serialize for Concurrency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Concurrency::Unbounded => serializer.serialize_bool(true),
            Concurrency::Limited(n) => serializer.serialize_u64(n.get() as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Concurrency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Workers(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Concurrency::Unbounded),
            Raw::Flag(false) => Ok(Concurrency::sequential()),
            Raw::Workers(n) => usize::try_from(n)
                .ok()
                .and_then(Concurrency::limited)
                .ok_or_else(|| {
                    serde::de::Error::custom(TypeError::InvalidConcurrency(n.to_string()))
                }),
        }
    }
}

/// Package manager used to run `script(...)` checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    /// Shell command that runs a package script.
    ///
    /// ```
    /// use verify_repo::core::types::PackageManager;
    ///
    /// assert_eq!(PackageManager::Npm.script_command("lint"), "npm run lint");
    /// assert_eq!(PackageManager::Yarn.script_command("lint"), "yarn lint");
    /// ```
    pub fn script_command(&self, script: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm run {}", script),
            PackageManager::Yarn => format!("yarn {}", script),
            PackageManager::Pnpm => format!("pnpm run {}", script),
            PackageManager::Bun => format!("bun run {}", script),
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManager {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(PackageManager::Npm),
            "yarn" => Ok(PackageManager::Yarn),
            "pnpm" => Ok(PackageManager::Pnpm),
            "bun" => Ok(PackageManager::Bun),
            other => Err(TypeError::InvalidPackageManager(other.to_string())),
        }
    }
}
