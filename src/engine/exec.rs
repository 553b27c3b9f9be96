//! engine::exec
//!
//! The bounded-concurrency executor.
//!
//! # Architecture
//!
//! [`execute_tests`] is a pure function of its inputs: a snapshot of
//! declared checks and a concurrency bound. It spawns `worker_count`
//! workers on a [`JoinSet`]; each worker claims the next index from a shared
//! atomic cursor until the plan is exhausted. Every check runs in its own
//! task so a panicking handler is isolated from its worker and siblings.
//!
//! # Invariants
//!
//! - `summary.total == plan.len()`
//! - `summary.passed + summary.failed == summary.total`
//! - `summary.results[i]` belongs to `plan[i]` (slots are pre-allocated)
//! - One check's failure or panic never aborts another
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::engine::exec::execute_tests;
//!
//! let summary = execute_tests(plan, None, Concurrency::limited(4)).await;
//! assert_eq!(summary.total, plan_len);
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};

use super::check::{CheckOutcome, Settle, TestDefinition};
use crate::core::types::{Concurrency, RunSummary, TestResult, TestStatus};

/// Execute a snapshot of checks and aggregate their results.
///
/// Concurrency resolves as `override ?? default ?? unbounded`.
pub async fn execute_tests(
    plan: Vec<TestDefinition>,
    default: Option<Concurrency>,
    override_: Option<Concurrency>,
) -> RunSummary {
    let total = plan.len();
    if total == 0 {
        return RunSummary::empty();
    }

    let concurrency = Concurrency::resolve(override_, default);
    let workers = concurrency.worker_count(total);
    debug!(total, workers, %concurrency, "executing checks");

    let started = Instant::now();
    let plan: Arc<[TestDefinition]> = plan.into();
    let cursor = Arc::new(AtomicUsize::new(0));
    let slots: Arc<Mutex<Vec<Option<TestResult>>>> = Arc::new(Mutex::new(vec![None; total]));

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let plan = Arc::clone(&plan);
        let cursor = Arc::clone(&cursor);
        let slots = Arc::clone(&slots);
        set.spawn(
            async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(definition) = plan.get(index) else {
                        break;
                    };
                    let result = execute_test(definition).await;
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result);
                }
            }
            .in_current_span(),
        );
    }

    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "executor worker stopped unexpectedly");
        }
    }

    let slots = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner));
    let results = slots
        .into_iter()
        .zip(plan.iter())
        .map(|(slot, definition)| slot.unwrap_or_else(|| not_run(definition)))
        .collect();

    let summary = RunSummary::from_results(results, elapsed_ms(started));
    debug!(
        passed = summary.passed,
        failed = summary.failed,
        duration_ms = summary.duration_ms,
        "checks finished"
    );
    summary
}

/// Run one check and settle its result.
async fn execute_test(definition: &TestDefinition) -> TestResult {
    let started = Instant::now();
    let settle = Settle::new();

    let handler = Arc::clone(&definition.handler);
    let task_settle = settle.clone();
    let joined = tokio::spawn(async move { handler.check(task_settle).await }.in_current_span()).await;

    // A handler that errors or panics after settling keeps its settled outcome.
    match joined {
        Ok(Ok(Some(returned))) => {
            settle.settle(returned);
        }
        Ok(Ok(None)) => {}
        Ok(Err(err)) => {
            settle.settle(threw(definition, format!("{:?}", err)));
        }
        Err(join_err) => {
            let error = match join_err.try_into_panic() {
                Ok(payload) => format!("panicked: {}", panic_message(payload)),
                Err(err) => err.to_string(),
            };
            settle.settle(threw(definition, error));
        }
    }

    let (status, message, error) = match settle.outcome() {
        Some(outcome) if outcome.pass => (TestStatus::Passed, Some(outcome.message), None),
        Some(outcome) => (TestStatus::Failed, Some(outcome.message), outcome.error),
        None => (
            TestStatus::Failed,
            Some(format!(
                "Check \"{}\" did not conclude.",
                definition.description
            )),
            None,
        ),
    };

    TestResult {
        id: definition.id,
        description: definition.description.clone(),
        source: definition.source.clone(),
        status,
        message,
        error,
        duration_ms: elapsed_ms(started),
    }
}

fn threw(definition: &TestDefinition, error: String) -> CheckOutcome {
    CheckOutcome {
        pass: false,
        message: format!("Test \"{}\" threw an error.", definition.description),
        error: Some(error),
    }
}

fn not_run(definition: &TestDefinition) -> TestResult {
    TestResult {
        id: definition.id,
        description: definition.description.clone(),
        source: definition.source.clone(),
        status: TestStatus::Failed,
        message: Some(format!("Check \"{}\" did not run.", definition.description)),
        error: None,
        duration_ms: 0.0,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::check::{handler, CheckHandler, CheckOutcome};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn definition(id: u64, description: &str, handler: Arc<dyn CheckHandler>) -> TestDefinition {
        TestDefinition {
            id,
            description: description.to_string(),
            handler,
            source: None,
        }
    }

    fn passing(id: u64) -> TestDefinition {
        definition(
            id,
            &format!("check {}", id),
            handler(|settle: Settle| async move {
                settle.pass("ok");
                Ok::<_, anyhow::Error>(None)
            }),
        )
    }

    #[tokio::test]
    async fn empty_plan_yields_empty_summary() {
        let summary = execute_tests(Vec::new(), None, None).await;
        assert_eq!(summary, RunSummary::empty());
    }

    #[tokio::test]
    async fn returned_outcome_is_used() {
        let plan = vec![definition(
            0,
            "returns",
            handler(|_settle: Settle| async move {
                Ok::<_, anyhow::Error>(Some(CheckOutcome::fail_with(
                    "nope",
                    anyhow::anyhow!("detail"),
                )))
            }),
        )];

        let summary = execute_tests(plan, None, None).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].message.as_deref(), Some("nope"));
        assert_eq!(summary.results[0].error.as_deref(), Some("detail"));
    }

    #[tokio::test]
    async fn callback_wins_over_returned_outcome() {
        let plan = vec![definition(
            0,
            "both",
            handler(|settle: Settle| async move {
                settle.pass("callback");
                Ok::<_, anyhow::Error>(Some(CheckOutcome::fail("returned")))
            }),
        )];

        let summary = execute_tests(plan, None, None).await;

        assert_eq!(summary.passed, 1);
        assert_eq!(summary.results[0].message.as_deref(), Some("callback"));
    }

    #[tokio::test]
    async fn settled_outcome_survives_a_later_error() {
        let plan = vec![
            definition(
                0,
                "settles then errors",
                handler(|settle: Settle| async move {
                    settle.pass("ok");
                    Err::<Option<CheckOutcome>, _>(anyhow::anyhow!("late"))
                }),
            ),
            definition(
                1,
                "settles then panics",
                handler(|settle: Settle| async move {
                    settle.fail("first");
                    if true {
                        panic!("late");
                    }
                    Ok::<_, anyhow::Error>(None)
                }),
            ),
        ];

        let summary = execute_tests(plan, None, None).await;

        assert_eq!(summary.results[0].status, TestStatus::Passed);
        assert_eq!(summary.results[0].message.as_deref(), Some("ok"));
        assert_eq!(summary.results[0].error, None);
        assert_eq!(summary.results[1].status, TestStatus::Failed);
        assert_eq!(summary.results[1].message.as_deref(), Some("first"));
        assert_eq!(summary.results[1].error, None);
    }

    #[tokio::test]
    async fn inconclusive_handler_fails() {
        let plan = vec![definition(
            0,
            "silent",
            handler(|_settle: Settle| async move { Ok::<_, anyhow::Error>(None) }),
        )];

        let summary = execute_tests(plan, None, None).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.results[0].message.as_deref(),
            Some("Check \"silent\" did not conclude.")
        );
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let plan = vec![
            passing(0),
            definition(
                1,
                "panics",
                handler(|_settle: Settle| async move {
                    if true {
                        panic!("kaboom");
                    }
                    Ok::<_, anyhow::Error>(None)
                }),
            ),
            passing(2),
        ];

        let summary = execute_tests(plan, None, Concurrency::limited(1)).await;

        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        let failed = &summary.results[1];
        assert_eq!(
            failed.message.as_deref(),
            Some("Test \"panics\" threw an error.")
        );
        assert!(failed.error.as_deref().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn respects_worker_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let plan = (0..8)
            .map(|id| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                definition(
                    id,
                    &format!("slow {}", id),
                    handler(move |settle: Settle| {
                        let in_flight = Arc::clone(&in_flight);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            settle.pass("done");
                            Ok::<_, anyhow::Error>(None)
                        }
                    }),
                )
            })
            .collect();

        let summary = execute_tests(plan, Concurrency::limited(2), None).await;

        assert_eq!(summary.passed, 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
