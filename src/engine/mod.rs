//! engine
//!
//! The declaration-and-execution engine.
//!
//! # Architecture
//!
//! [`RepoVerificationEngine`] owns three things:
//!
//! 1. **Plugin table**: entrypoint name -> [`EntrypointFactory`], plus the
//!    documentation recorded while plugins were applied
//! 2. **Declaration state**: pending [`TestDefinition`]s, the active source
//!    file, and the context arena
//! 3. **Defaults**: root, package manager, and default concurrency
//!
//! The lifecycle of a run:
//!
//! ```text
//! apply plugins -> declare (entrypoint -> context -> register)
//!               -> finalize_pending -> snapshot -> execute -> RunSummary
//! ```
//!
//! # Invariants
//!
//! - The entrypoint name `with` is never registered
//! - Malformed plugins fail at application time, before any entrypoint
//!   of that plugin becomes visible
//! - A run works from a snapshot; declarations made while it executes do
//!   not affect it
//! - Contexts created with auto-finalization are validated at the next
//!   [`RepoVerificationEngine::finalize_pending`] call
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::engine::{EngineConfig, RepoVerificationEngine};
//! use verify_repo::plugins;
//!
//! let engine = RepoVerificationEngine::new(EngineConfig {
//!     plugins: plugins::builtin(),
//!     root: Some(repo_root),
//!     ..Default::default()
//! })?;
//!
//! engine.entrypoint("file", Metadata::new())?
//!     .call(&["README.md".into()])?
//!     .into_entry("exists")?
//!     .invoke("exists", &[])?;
//!
//! let summary = engine.run(None).await?;
//! ```

pub mod check;
pub mod context;
pub mod entry;
pub mod errors;
pub mod exec;
pub mod plugin;

pub use check::{handler, CheckHandler, CheckOutcome, HandlerResult, Settle, TestDefinition};
pub use context::{ContextId, ContextState, VerificationContext};
pub use entry::{Arg, Chained, PluginEntry, RegexArg};
pub use errors::DeclarationError;
pub use exec::execute_tests;
pub use plugin::{
    collect_docs, plugin_fn, EntrypointFactory, FnPlugin, PluginApi, PluginDocEntry,
    PluginDocumentation, PluginOptions, RepoPlugin,
};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::core::types::{Concurrency, Metadata, PackageManager, RunSummary, TestId};
use context::{ContextArena, ContextInfo};

/// Name reserved for the metadata view on the façade.
pub const RESERVED_ENTRYPOINT: &str = "with";

/// Engine construction parameters.
#[derive(Clone, Default)]
pub struct EngineConfig {
    pub plugins: Vec<Arc<dyn RepoPlugin>>,
    pub root: Option<PathBuf>,
    pub default_concurrency: Option<Concurrency>,
    pub package_manager: PackageManager,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("plugins", &self.plugins.len())
            .field("root", &self.root)
            .field("default_concurrency", &self.default_concurrency)
            .field("package_manager", &self.package_manager)
            .finish()
    }
}

#[derive(Default)]
struct PluginTable {
    entrypoints: BTreeMap<String, EntrypointFactory>,
    docs: Vec<PluginDocumentation>,
}

#[derive(Default)]
pub(crate) struct DeclarationState {
    pub(crate) tests: Vec<TestDefinition>,
    pub(crate) next_id: TestId,
    pub(crate) active_source: Option<PathBuf>,
    pub(crate) contexts: ContextArena,
}

pub(crate) struct EngineInner {
    options: PluginOptions,
    default_concurrency: Option<Concurrency>,
    plugins: RwLock<PluginTable>,
    state: Mutex<DeclarationState>,
}

impl EngineInner {
    /// Lock the declaration state, recovering from poisoning.
    pub(crate) fn state(&self) -> MutexGuard<'_, DeclarationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The verification engine.
///
/// Cloning is cheap and shares the same plugin table and declarations.
#[derive(Clone)]
pub struct RepoVerificationEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for RepoVerificationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoVerificationEngine")
            .field("root", &self.inner.options.root)
            .field("entrypoints", &self.plugin_names())
            .field("planned_tests", &self.planned_tests())
            .finish()
    }
}

impl RepoVerificationEngine {
    /// Create an engine and apply every configured plugin, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first malformed plugin or reserved entrypoint name.
    pub fn new(config: EngineConfig) -> Result<Self, DeclarationError> {
        let engine = Self {
            inner: Arc::new(EngineInner {
                options: PluginOptions {
                    root: config.root,
                    package_manager: config.package_manager,
                },
                default_concurrency: config.default_concurrency,
                plugins: RwLock::new(PluginTable::default()),
                state: Mutex::new(DeclarationState::default()),
            }),
        };
        engine.extend(config.plugins)?;
        Ok(engine)
    }

    /// Apply additional plugins after construction.
    pub fn extend<I>(&self, plugins: I) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = Arc<dyn RepoPlugin>>,
    {
        for plugin in plugins {
            self.apply_plugin(plugin.as_ref())?;
        }
        Ok(())
    }

    /// Apply one plugin: build its API with the engine options, validate
    /// it, record its documentation, and register its entrypoints.
    ///
    /// An entrypoint name already registered by an earlier plugin is
    /// replaced.
    pub fn apply_plugin(&self, plugin: &dyn RepoPlugin) -> Result<(), DeclarationError> {
        let name = plugin.name();
        let api = plugin.api(&self.inner.options)?;

        let mut seen = HashSet::new();
        for entry_name in api.names() {
            if entry_name.trim().is_empty() {
                return Err(DeclarationError::malformed(name, "entrypoint name must not be empty"));
            }
            if entry_name == RESERVED_ENTRYPOINT {
                return Err(DeclarationError::ReservedName);
            }
            if !seen.insert(entry_name) {
                return Err(DeclarationError::malformed(
                    name,
                    format!("entrypoint \"{}\" is declared twice", entry_name),
                ));
            }
        }
        if plugin.docs().iter().any(|doc| doc.signature.trim().is_empty()) {
            return Err(DeclarationError::malformed(
                name,
                "documentation entries need a signature",
            ));
        }

        let mut table = self.plugins_write();
        if let Some(name) = name {
            if !plugin.docs().is_empty() {
                table.docs.push(PluginDocumentation {
                    name: name.to_string(),
                    description: plugin.description().map(str::to_string),
                    entries: plugin.docs().to_vec(),
                });
            }
        }
        for (entry_name, factory) in api.into_entries() {
            debug!(plugin = name.unwrap_or("<anonymous>"), entrypoint = %entry_name, "registered entrypoint");
            if table.entrypoints.insert(entry_name.clone(), factory).is_some() {
                warn!(entrypoint = %entry_name, "entrypoint replaced by a later plugin");
            }
        }
        Ok(())
    }

    /// Register a single entrypoint directly.
    pub fn define_entrypoint(
        &self,
        name: &str,
        factory: EntrypointFactory,
    ) -> Result<(), DeclarationError> {
        if name == RESERVED_ENTRYPOINT {
            return Err(DeclarationError::ReservedName);
        }
        if name.trim().is_empty() {
            return Err(DeclarationError::malformed(None, "entrypoint name must not be empty"));
        }
        if self
            .plugins_write()
            .entrypoints
            .insert(name.to_string(), factory)
            .is_some()
        {
            warn!(entrypoint = name, "entrypoint replaced");
        }
        Ok(())
    }

    pub fn root(&self) -> Option<&Path> {
        self.inner.options.root.as_deref()
    }

    pub fn options(&self) -> &PluginOptions {
        &self.inner.options
    }

    pub fn default_concurrency(&self) -> Option<Concurrency> {
        self.inner.default_concurrency
    }

    /// Look up an entrypoint factory.
    pub fn resolve(&self, name: &str) -> Option<EntrypointFactory> {
        self.plugins_read().entrypoints.get(name).cloned()
    }

    pub fn has_entrypoint(&self, name: &str) -> bool {
        self.plugins_read().entrypoints.contains_key(name)
    }

    /// Registered entrypoint names, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins_read().entrypoints.keys().cloned().collect()
    }

    /// Documentation recorded for named plugins with entries, in application order.
    pub fn plugin_documentation(&self) -> Vec<PluginDocumentation> {
        self.plugins_read().docs.clone()
    }

    /// Create a root verification context.
    ///
    /// The base directory is the parent of the file currently in scope.
    pub fn create_verification_context(
        &self,
        plugin_name: &str,
        metadata: Metadata,
        auto_finalize: bool,
    ) -> VerificationContext {
        let mut state = self.inner.state();
        let base_dir = state
            .active_source
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);
        let info = Arc::new(ContextInfo {
            plugin_name: plugin_name.to_string(),
            root: self.inner.options.root.clone(),
            base_dir,
            metadata,
        });
        let id = state.contexts.insert(Arc::clone(&info), None, auto_finalize);
        VerificationContext::new(Arc::clone(&self.inner), id, info)
    }

    /// Resolve `name`, create a fresh auto-finalizing root context, and
    /// build the entry for it.
    pub fn entrypoint(&self, name: &str, metadata: Metadata) -> Result<PluginEntry, DeclarationError> {
        let factory = self
            .resolve(name)
            .ok_or_else(|| DeclarationError::UnknownEntrypoint(name.to_string()))?;
        let context = self.create_verification_context(name, metadata, true);
        factory(context)
    }

    /// Make `source` the active file until the guard drops.
    pub fn enter_file_scope(&self, source: Option<PathBuf>) -> FileScopeGuard {
        let previous = std::mem::replace(&mut self.inner.state().active_source, source);
        FileScopeGuard {
            engine: Arc::clone(&self.inner),
            previous,
        }
    }

    /// Run `task` with `source` as the active file.
    pub fn with_file_scope<T>(&self, source: Option<PathBuf>, task: impl FnOnce() -> T) -> T {
        let _scope = self.enter_file_scope(source);
        task()
    }

    pub fn active_source(&self) -> Option<PathBuf> {
        self.inner.state().active_source.clone()
    }

    /// End of a declaration phase: finalize every auto-finalizing context
    /// created since the previous call.
    ///
    /// All pending contexts are finalized; the first error is returned.
    pub fn finalize_pending(&self) -> Result<(), DeclarationError> {
        let mut state = self.inner.state();
        let pending = state.contexts.take_pending();
        let mut first_error = None;
        for index in pending {
            if let Err(err) = state.contexts.finalize(index) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Number of declared checks.
    pub fn planned_tests(&self) -> usize {
        self.inner.state().tests.len()
    }

    /// Snapshot of the declared checks.
    pub fn definitions(&self) -> Vec<TestDefinition> {
        self.inner.state().tests.clone()
    }

    /// Drop declarations, reset ids, and invalidate every context.
    pub fn clear(&self) {
        let mut state = self.inner.state();
        state.tests.clear();
        state.next_id = 0;
        state.contexts.reset();
    }

    /// Finalize pending contexts and execute a snapshot of the declared checks.
    ///
    /// # Errors
    ///
    /// Only declaration errors surface here. Check failures are part of
    /// the returned summary.
    pub async fn run(&self, concurrency: Option<Concurrency>) -> Result<RunSummary, DeclarationError> {
        self.finalize_pending()?;
        let plan = self.definitions();
        let span = info_span!("run", run_id = %Uuid::new_v4(), planned = plan.len());
        Ok(execute_tests(plan, self.inner.default_concurrency, concurrency)
            .instrument(span)
            .await)
    }

    fn plugins_read(&self) -> std::sync::RwLockReadGuard<'_, PluginTable> {
        self.inner.plugins.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn plugins_write(&self) -> std::sync::RwLockWriteGuard<'_, PluginTable> {
        self.inner.plugins.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the previously active source file on drop.
pub struct FileScopeGuard {
    engine: Arc<EngineInner>,
    previous: Option<PathBuf>,
}

impl Drop for FileScopeGuard {
    fn drop(&mut self) {
        self.engine.state().active_source = self.previous.take();
    }
}
