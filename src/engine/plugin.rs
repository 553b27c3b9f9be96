//! engine::plugin
//!
//! Plugin contract: options in, named entrypoint factories out.
//!
//! # Plugin Shapes
//!
//! - A type implementing [`RepoPlugin`] (the "object with `api()`" shape)
//! - A closure wrapped with [`plugin_fn`], carrying its metadata through
//!   the builder methods on [`FnPlugin`]
//!
//! Both are applied the same way by
//! [`RepoVerificationEngine::apply_plugin`](super::RepoVerificationEngine::apply_plugin).
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::engine::plugin::{plugin_fn, PluginApi};
//! use verify_repo::engine::entry::PluginEntry;
//!
//! let hello = plugin_fn(|_options| {
//!     Ok(PluginApi::new().entrypoint("hello", |ctx| {
//!         Ok(PluginEntry::new(ctx).check("works", |ctx, _args| {
//!             ctx.register("hello works", handler(|s: Settle| async move {
//!                 s.pass("hi");
//!                 Ok(None)
//!             }))
//!         }))
//!     }))
//! })
//! .named("Hello")
//! .doc("hello.works()", "Always passes.");
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::context::VerificationContext;
use super::entry::PluginEntry;
use super::errors::DeclarationError;
use crate::core::types::PackageManager;

/// Engine-wide options handed to every plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOptions {
    /// Repository root used to resolve relative paths.
    pub root: Option<PathBuf>,
    /// Backend selector for script checks.
    pub package_manager: PackageManager,
}

/// Per-context factory registered under an entrypoint name.
pub type EntrypointFactory =
    Arc<dyn Fn(VerificationContext) -> Result<PluginEntry, DeclarationError> + Send + Sync>;

/// Named entrypoints produced by a plugin.
#[derive(Clone, Default)]
pub struct PluginApi {
    entrypoints: Vec<(String, EntrypointFactory)>,
}

impl PluginApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entrypoint. Names are validated when the plugin is applied.
    pub fn entrypoint<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(VerificationContext) -> Result<PluginEntry, DeclarationError> + Send + Sync + 'static,
    {
        self.entrypoints.push((name.into(), Arc::new(factory)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entrypoints.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entrypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entrypoints.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, EntrypointFactory)> {
        self.entrypoints
    }
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// One documented API signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDocEntry {
    pub signature: String,
    pub description: String,
}

impl PluginDocEntry {
    pub fn new(signature: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            description: description.into(),
        }
    }
}

/// Documentation recorded for a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDocumentation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub entries: Vec<PluginDocEntry>,
}

/// A plugin contributing entrypoints to the fluent API.
pub trait RepoPlugin: Send + Sync {
    /// Display name used in documentation.
    fn name(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> Option<&str> {
        None
    }

    fn docs(&self) -> &[PluginDocEntry] {
        &[]
    }

    /// Build the entrypoint table for these options.
    fn api(&self, options: &PluginOptions) -> Result<PluginApi, DeclarationError>;
}

type ApiFactory = dyn Fn(&PluginOptions) -> Result<PluginApi, DeclarationError> + Send + Sync;

/// A closure-backed plugin with attached metadata.
pub struct FnPlugin {
    name: Option<String>,
    description: Option<String>,
    docs: Vec<PluginDocEntry>,
    factory: Box<ApiFactory>,
}

/// Wrap a factory closure as a plugin.
pub fn plugin_fn<F>(factory: F) -> FnPlugin
where
    F: Fn(&PluginOptions) -> Result<PluginApi, DeclarationError> + Send + Sync + 'static,
{
    FnPlugin {
        name: None,
        description: None,
        docs: Vec::new(),
        factory: Box::new(factory),
    }
}

impl FnPlugin {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn doc(mut self, signature: impl Into<String>, description: impl Into<String>) -> Self {
        self.docs.push(PluginDocEntry::new(signature, description));
        self
    }

    /// Share as a trait object.
    pub fn into_plugin(self) -> Arc<dyn RepoPlugin> {
        Arc::new(self)
    }
}

impl fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlugin")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("docs", &self.docs.len())
            .finish_non_exhaustive()
    }
}

impl RepoPlugin for FnPlugin {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn docs(&self) -> &[PluginDocEntry] {
        &self.docs
    }

    fn api(&self, options: &PluginOptions) -> Result<PluginApi, DeclarationError> {
        (self.factory)(options)
    }
}

/// Collect documentation without constructing an engine.
///
/// Every named plugin is listed, even one without entries.
pub fn collect_docs(plugins: &[Arc<dyn RepoPlugin>]) -> Vec<PluginDocumentation> {
    plugins
        .iter()
        .filter_map(|plugin| {
            let name = plugin.name()?;
            Some(PluginDocumentation {
                name: name.to_string(),
                description: plugin.description().map(str::to_string),
                entries: plugin.docs().to_vec(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_api(_: &PluginOptions) -> Result<PluginApi, DeclarationError> {
        Ok(PluginApi::new())
    }

    #[test]
    fn builder_records_metadata() {
        let plugin = plugin_fn(empty_api)
            .named("Filesystem")
            .described("File checks")
            .doc("file(path).exists()", "File exists");

        assert_eq!(plugin.name(), Some("Filesystem"));
        assert_eq!(plugin.description(), Some("File checks"));
        assert_eq!(plugin.docs().len(), 1);
    }

    #[test]
    fn collect_docs_skips_unnamed() {
        let plugins: Vec<Arc<dyn RepoPlugin>> = vec![
            plugin_fn(empty_api).into_plugin(),
            plugin_fn(empty_api).named("Git").into_plugin(),
        ];

        let docs = collect_docs(&plugins);

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "Git");
        assert!(docs[0].entries.is_empty());
    }

    #[test]
    fn api_lists_names_in_order() {
        let api = PluginApi::new()
            .entrypoint("file", |ctx| Ok(PluginEntry::new(ctx)))
            .entrypoint("dir", |ctx| Ok(PluginEntry::new(ctx)));
        assert_eq!(api.names().collect::<Vec<_>>(), vec!["file", "dir"]);
        assert_eq!(api.len(), 2);
    }
}
