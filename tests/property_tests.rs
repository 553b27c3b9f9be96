//! Property-based tests for the executor and the verify-file parser.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated plans and inputs.

use std::sync::Arc;

use proptest::prelude::*;

use verify_repo::core::types::{Concurrency, Metadata, TestStatus};
use verify_repo::engine::{
    handler, CheckHandler, CheckOutcome, EngineConfig, RepoVerificationEngine, Settle,
};
use verify_repo::loader::parser;

/// What a generated handler does when it runs.
#[derive(Debug, Clone, Copy)]
enum Behavior {
    PassCallback,
    FailCallback,
    ReturnPass,
    ReturnFail,
    Inconclusive,
    Error,
    Panic,
}

fn behavior() -> impl Strategy<Value = Behavior> {
    prop_oneof![
        Just(Behavior::PassCallback),
        Just(Behavior::FailCallback),
        Just(Behavior::ReturnPass),
        Just(Behavior::ReturnFail),
        Just(Behavior::Inconclusive),
        Just(Behavior::Error),
        Just(Behavior::Panic),
    ]
}

fn concurrency() -> impl Strategy<Value = Option<Concurrency>> {
    prop_oneof![
        Just(None),
        Just(Some(Concurrency::Unbounded)),
        (1usize..8).prop_map(Concurrency::limited),
    ]
}

impl Behavior {
    fn passes(self) -> bool {
        matches!(self, Behavior::PassCallback | Behavior::ReturnPass)
    }

    fn handler(self) -> Arc<dyn CheckHandler> {
        handler(move |settle: Settle| async move {
            tokio::task::yield_now().await;
            match self {
                Behavior::PassCallback => {
                    settle.pass("ok");
                    Ok(None)
                }
                Behavior::FailCallback => {
                    settle.fail("no");
                    Ok(None)
                }
                Behavior::ReturnPass => Ok(Some(CheckOutcome::pass("ok"))),
                Behavior::ReturnFail => Ok(Some(CheckOutcome::fail("no"))),
                Behavior::Inconclusive => Ok(None),
                Behavior::Error => Err(anyhow::anyhow!("handler error")),
                Behavior::Panic => panic!("handler panic"),
            }
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn summary_accounts_for_every_check(
        behaviors in prop::collection::vec(behavior(), 0..24),
        bound in concurrency(),
    ) {
        let engine = RepoVerificationEngine::new(EngineConfig::default()).unwrap();
        for (index, behavior) in behaviors.iter().enumerate() {
            let ctx = engine.create_verification_context("prop", Metadata::new(), true);
            ctx.register(format!("check {}", index), behavior.handler()).unwrap();
        }

        let summary = tokio_test::block_on(engine.run(bound)).unwrap();

        prop_assert_eq!(summary.total, behaviors.len());
        prop_assert_eq!(summary.passed + summary.failed, summary.total);
        prop_assert_eq!(summary.results.len(), behaviors.len());
        for (index, (result, behavior)) in summary.results.iter().zip(&behaviors).enumerate() {
            prop_assert_eq!(result.id, index as u64);
            prop_assert_eq!(&result.description, &format!("check {}", index));
            let expected = if behavior.passes() { TestStatus::Passed } else { TestStatus::Failed };
            prop_assert_eq!(result.status, expected);
        }
    }

    #[test]
    fn worker_count_is_clamped(total in 1usize..200, bound in 1usize..300) {
        let workers = Concurrency::limited(bound).unwrap().worker_count(total);
        prop_assert!(workers >= 1);
        prop_assert!(workers <= total);
        prop_assert_eq!(workers, bound.min(total));
        prop_assert_eq!(Concurrency::Unbounded.worker_count(total), total);
    }

    #[test]
    fn parser_never_panics(source in "\\PC{0,80}") {
        let _ = parser::parse(&source);
    }

    #[test]
    fn quoted_strings_survive_parsing(text in "[a-zA-Z0-9 _./-]{0,40}") {
        let source = format!("verify.file(\"{}\").exists();", text);
        let statements = parser::parse(&source).unwrap();
        let args = statements[0].segments[0].args.as_ref().unwrap();
        prop_assert_eq!(args[0].as_str(), Some(text.as_str()));
    }
}
