//! plugins
//!
//! Built-in plugins.
//!
//! # Plugins
//!
//! - [`fs`]: `file`, `dir`, `files` entrypoints
//! - [`git`]: `git` entrypoint backed by [`crate::git::Git`]
//! - [`command`]: `command` and `script` entrypoints
//! - [`package`]: `package` entrypoint over `package.json` manifests
//!
//! Every plugin is a [`FnPlugin`](crate::engine::FnPlugin) carrying its
//! name, description, and documented signatures; [`builtin`] returns them
//! in application order.

pub mod command;
pub mod fs;
pub mod git;
pub mod package;

use std::future::Future;
use std::sync::Arc;

use crate::core::types::Metadata;
use crate::engine::{handler, CheckHandler, CheckOutcome, RepoPlugin, Settle};

/// The built-in plugins, in application order.
pub fn builtin() -> Vec<Arc<dyn RepoPlugin>> {
    vec![
        fs::plugin().into_plugin(),
        git::plugin().into_plugin(),
        command::plugin().into_plugin(),
        package::plugin().into_plugin(),
    ]
}

/// Wrap an outcome-producing closure as a handler.
///
/// Built-in checks never settle through the callback; they return their
/// conclusion.
pub(crate) fn outcome<F, Fut>(check: F) -> Arc<dyn CheckHandler>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CheckOutcome> + Send + 'static,
{
    handler(move |_settle: Settle| {
        let pending = check();
        async move { Ok(Some(pending.await)) }
    })
}

/// One-key metadata map.
pub(crate) fn meta(key: &str, value: impl Into<serde_json::Value>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(key.to_string(), value.into());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collect_docs;

    #[test]
    fn builtin_plugins_are_documented() {
        let docs = collect_docs(&builtin());
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();

        assert_eq!(names, vec!["Filesystem", "Git", "Command runner", "Package"]);
        assert!(docs.iter().all(|d| !d.entries.is_empty()));
    }
}
