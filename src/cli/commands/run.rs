//! run command - Discover, declare, execute, report

use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::cli::args::RunArgs;
use crate::cli::Context;
use crate::core::config::Config;
use crate::runner::{self, RunError, RunOptions};
use crate::ui::{output, reporter};

/// Run every declared check under the root and report the results.
///
/// A failed run is returned as [`RunError::Failed`] after the report has
/// been written.
pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let root = ctx.root()?;
    let verbosity = ctx.verbosity();

    // Invalid config is reported by the runner.
    let loaded = Config::load(Some(&root)).ok();
    for warning in loaded.iter().flat_map(|loaded| &loaded.warnings) {
        output::warn(&warning.message, verbosity);
    }
    // Repo and global config may turn on verbose reporting.
    let verbose = args.verbose || loaded.is_some_and(|loaded| loaded.config.verbose());

    let concurrency = args.concurrency_override();
    let mut options = RunOptions::new(&root);
    options.patterns = args.patterns;
    options.ignore = args.ignore;
    options.concurrency = concurrency;
    options.package_manager = args.package_manager;
    output::debug(format!("{:?}", options), verbosity);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let started = Instant::now();
    let (summary, failed) = match runtime.block_on(runner::run(options)) {
        Ok(summary) => (summary, false),
        Err(RunError::Failed(summary)) => (summary, true),
        Err(err) => return Err(err.into()),
    };
    let total_ms = started.elapsed().as_secs_f64() * 1000.0;
    debug!(total_ms, "run finished");

    if args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        println!("{}", json);
    } else {
        let mut out: Box<dyn Write> = if verbosity.is_quiet() {
            Box::new(io::sink())
        } else {
            Box::new(io::stdout().lock())
        };
        let mut err = io::stderr().lock();
        reporter::write_report(&summary, &root, verbose, Some(total_ms), &mut out, &mut err)?;
        out.flush()?;
    }

    if failed {
        return Err(RunError::Failed(summary).into());
    }
    Ok(())
}
