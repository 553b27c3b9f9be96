//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Validates command-specific arguments
//! 2. Calls the runner or the plugin registry
//! 3. Formats and displays output through [`crate::ui`]
//!
//! `run` is the only async command; it builds its own tokio runtime so the
//! rest of the CLI stays synchronous.

mod completion;
mod docs;
mod run;

pub use completion::completion;
pub use docs::docs;
pub use run::run;

use super::args::Command;
use super::Context;
use anyhow::Result;

/// Dispatch a parsed command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Run(args) => run(ctx, args),
        Command::Docs => docs(ctx),
        Command::Completion { shell } => completion(shell),
    }
}
