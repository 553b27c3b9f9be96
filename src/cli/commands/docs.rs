//! docs command - Print built-in plugin documentation

use crate::cli::Context;
use crate::engine::collect_docs;
use crate::plugins;
use crate::ui::{output, reporter};
use anyhow::Result;

/// Print the documentation of every built-in plugin, sorted by name.
pub fn docs(ctx: &Context) -> Result<()> {
    let docs = collect_docs(&plugins::builtin());
    output::print(reporter::render_docs(&docs).trim_end(), ctx.verbosity());
    Ok(())
}
