use std::process::ExitCode;

use verify_repo::cli;
use verify_repo::runner::RunError;
use verify_repo::ui::output;

fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Failures were already reported.
            if !matches!(err.downcast_ref::<RunError>(), Some(RunError::Failed(_))) {
                output::error(format!("{:#}", err));
            }
            ExitCode::FAILURE
        }
    }
}
