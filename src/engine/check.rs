//! engine::check
//!
//! Check handlers and their settle protocol.
//!
//! # Handler Contract
//!
//! A handler is an async function receiving a [`Settle`] handle. It concludes
//! in one of two ways:
//!
//! 1. Calling [`Settle::pass`] / [`Settle::fail`] (first call wins, later
//!    calls are ignored)
//! 2. Returning `Ok(Some(CheckOutcome))`
//!
//! A returned outcome is applied after the handler finished, so it only
//! counts when no callback settled first. Returning `Ok(None)` without
//! settling leaves the check inconclusive, which the executor records as a
//! failure. Returning `Err` or panicking records a failure with the
//! serialized error, unless a callback already settled the check.
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::engine::check::{handler, CheckOutcome, Settle};
//!
//! let h = handler(|settle: Settle| async move {
//!     settle.pass("ok");
//!     Ok(None)
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::core::types::TestId;

/// Conclusion of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub pass: bool,
    pub message: String,
    /// Serialized failure detail.
    pub error: Option<String>,
}

impl CheckOutcome {
    /// A passing outcome.
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            pass: true,
            message: message.into(),
            error: None,
        }
    }

    /// A failing outcome without extra detail.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            message: message.into(),
            error: None,
        }
    }

    /// A failing outcome carrying an error.
    ///
    /// The error is serialized as its message followed by its causes,
    /// separated by `: `.
    pub fn fail_with(message: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            pass: false,
            message: message.into(),
            error: Some(format!("{:#}", error.into())),
        }
    }
}

/// Value returned by a [`CheckHandler`].
pub type HandlerResult = anyhow::Result<Option<CheckOutcome>>;

/// One-shot settle slot shared between a handler and the executor.
///
/// Cloning shares the slot. The first `pass`/`fail`/`settle` call wins.
#[derive(Clone, Default)]
pub struct Settle {
    slot: Arc<Mutex<Option<CheckOutcome>>>,
}

impl Settle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle with a passing outcome. Returns false if already settled.
    pub fn pass(&self, message: impl Into<String>) -> bool {
        self.settle(CheckOutcome::pass(message))
    }

    /// Settle with a failing outcome. Returns false if already settled.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.settle(CheckOutcome::fail(message))
    }

    /// Settle with a failing outcome and error detail.
    pub fn fail_with(&self, message: impl Into<String>, error: impl Into<anyhow::Error>) -> bool {
        self.settle(CheckOutcome::fail_with(message, error))
    }

    /// Settle with an arbitrary outcome. Returns false if already settled.
    pub fn settle(&self, outcome: CheckOutcome) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<CheckOutcome> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for Settle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settle")
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// An executable check.
#[async_trait]
pub trait CheckHandler: Send + Sync {
    async fn check(&self, settle: Settle) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> CheckHandler for F
where
    F: Fn(Settle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn check(&self, settle: Settle) -> HandlerResult {
        (self)(settle).await
    }
}

/// Box a closure as a shareable handler.
pub fn handler<F, Fut>(f: F) -> Arc<dyn CheckHandler>
where
    F: Fn(Settle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

/// A declared check, owned by the engine until cleared.
#[derive(Clone)]
pub struct TestDefinition {
    pub id: TestId,
    pub description: String,
    pub handler: Arc<dyn CheckHandler>,
    /// Verify file that declared the check.
    pub source: Option<PathBuf>,
}

impl fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDefinition")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_settle_wins() {
        let settle = Settle::new();
        assert!(settle.pass("ok"));
        assert!(!settle.fail("no"));
        assert_eq!(settle.outcome(), Some(CheckOutcome::pass("ok")));
    }

    #[test]
    fn clones_share_the_slot() {
        let settle = Settle::new();
        let other = settle.clone();
        assert!(other.fail_with("bad", anyhow::anyhow!("line1\nline2")));
        assert!(settle.is_settled());
        let outcome = settle.outcome().unwrap();
        assert!(!outcome.pass);
        assert_eq!(outcome.error.as_deref(), Some("line1\nline2"));
    }

    #[tokio::test]
    async fn closure_handlers_run() {
        let h = handler(|settle: Settle| async move {
            settle.pass("done");
            Ok::<_, anyhow::Error>(None)
        });
        let settle = Settle::new();
        let returned = h.check(settle.clone()).await.unwrap();
        assert!(returned.is_none());
        assert_eq!(settle.outcome().unwrap().message, "done");
    }

    #[test]
    fn fail_with_serializes_error_chain() {
        let err = anyhow::anyhow!("inner").context("outer");
        let outcome = CheckOutcome::fail_with("failed", err);
        assert_eq!(outcome.error.as_deref(), Some("outer: inner"));
    }

    #[test]
    fn fail_with_uses_display_for_io_errors() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let outcome = CheckOutcome::fail_with("failed", err);
        assert_eq!(outcome.error.as_deref(), Some("No such file or directory"));
    }
}
