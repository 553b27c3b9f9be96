//! engine::context
//!
//! Verification contexts and the single-check registration protocol.
//!
//! # Architecture
//!
//! Contexts live in an arena owned by the engine's declaration state. A
//! [`VerificationContext`] is a cheap handle (engine + [`ContextId`]) plus
//! the immutable data fixed at creation (plugin name, root, base directory,
//! metadata). Parent links are arena indices, so there are no reference
//! cycles, and `clear()` tears the whole arena down at once by bumping its
//! epoch.
//!
//! # Invariants
//!
//! - A context tree registers exactly one check before it finalizes
//! - Registering a second check anywhere in the tree fails immediately
//! - Registration marks the whole ancestor chain, up to the root access
//! - Finalization recurses into children first and is idempotent
//! - A child's metadata is a merged copy; the parent map is never touched
//!
//! # State Machine
//!
//! ```text
//! Open --lock/register--> CheckRegistered --finalize--> Finalized
//! Open --finalize--> error (no check registered)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::check::{CheckHandler, TestDefinition};
use super::errors::DeclarationError;
use super::EngineInner;
use crate::core::types::{Metadata, TestId};

/// Generation-tagged arena index of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId {
    epoch: u64,
    index: usize,
}

/// Observable lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Open,
    CheckRegistered,
    Finalized,
}

/// Data fixed when a context is created.
#[derive(Debug)]
pub(crate) struct ContextInfo {
    pub(crate) plugin_name: String,
    pub(crate) root: Option<PathBuf>,
    pub(crate) base_dir: Option<PathBuf>,
    pub(crate) metadata: Metadata,
}

#[derive(Debug)]
struct ContextNode {
    info: Arc<ContextInfo>,
    parent: Option<usize>,
    children: Vec<usize>,
    check_registered: bool,
    /// Set while a `lock` closure runs and no check has been registered yet.
    gate_open: bool,
    finalized: bool,
}

/// Arena of every context created since the last clear.
#[derive(Debug, Default)]
pub(crate) struct ContextArena {
    epoch: u64,
    nodes: Vec<ContextNode>,
    /// Auto-finalizing contexts awaiting the end of the declaration phase.
    pending: Vec<usize>,
}

impl ContextArena {
    pub(crate) fn insert(
        &mut self,
        info: Arc<ContextInfo>,
        parent: Option<usize>,
        auto_finalize: bool,
    ) -> ContextId {
        let index = self.nodes.len();
        self.nodes.push(ContextNode {
            info,
            parent,
            children: Vec::new(),
            check_registered: false,
            gate_open: false,
            finalized: false,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        if auto_finalize {
            self.pending.push(index);
        }
        ContextId {
            epoch: self.epoch,
            index,
        }
    }

    /// Drop every context and invalidate outstanding handles.
    pub(crate) fn reset(&mut self) {
        self.epoch += 1;
        self.nodes.clear();
        self.pending.clear();
    }

    /// Contexts awaiting auto-finalization, in creation order.
    pub(crate) fn take_pending(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    fn index_of(&self, id: ContextId) -> Result<usize, DeclarationError> {
        if id.epoch != self.epoch || id.index >= self.nodes.len() {
            return Err(DeclarationError::StaleContext);
        }
        Ok(id.index)
    }

    /// The node followed by its ancestors, nearest first.
    fn chain(&self, index: usize) -> Vec<usize> {
        let mut chain = vec![index];
        let mut current = self.nodes[index].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.nodes[parent].parent;
        }
        chain
    }

    /// Transition the whole chain to `CheckRegistered`.
    ///
    /// Nothing is mutated when the transition is refused.
    fn claim(&mut self, index: usize) -> Result<(), DeclarationError> {
        let chain = self.chain(index);
        if chain.iter().any(|&i| self.nodes[i].check_registered) {
            return Err(DeclarationError::DoubleRegistration {
                plugin: self.nodes[index].info.plugin_name.clone(),
            });
        }
        if let Some(&i) = chain.iter().find(|&&i| self.nodes[i].finalized) {
            return Err(DeclarationError::ContextFinalized {
                plugin: self.nodes[i].info.plugin_name.clone(),
            });
        }
        for i in chain {
            self.nodes[i].check_registered = true;
        }
        Ok(())
    }

    /// Consume the nearest open gate in the chain.
    ///
    /// Nodes between `index` and the gate were created inside the lock
    /// closure and are marked as registered too.
    fn consume_gate(&mut self, index: usize) -> bool {
        let chain = self.chain(index);
        let Some(pos) = chain.iter().position(|&i| self.nodes[i].gate_open) else {
            return false;
        };
        self.nodes[chain[pos]].gate_open = false;
        for &i in &chain[..pos] {
            self.nodes[i].check_registered = true;
        }
        true
    }

    pub(crate) fn finalize(&mut self, index: usize) -> Result<(), DeclarationError> {
        if self.nodes[index].finalized {
            return Ok(());
        }
        self.nodes[index].finalized = true;

        let children = self.nodes[index].children.clone();
        let mut first_error = None;
        for child in children {
            if let Err(err) = self.finalize(child) {
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let node = &self.nodes[index];
        if !node.check_registered {
            return Err(DeclarationError::MissingCheck {
                plugin: node.info.plugin_name.clone(),
                metadata: node.info.metadata.clone(),
            });
        }
        Ok(())
    }
}

/// Handle to a per-declaration bookkeeping node.
///
/// Plugin entrypoints receive one of these and schedule their check through
/// [`VerificationContext::lock`] or [`VerificationContext::register`].
#[derive(Clone)]
pub struct VerificationContext {
    engine: Arc<EngineInner>,
    id: ContextId,
    info: Arc<ContextInfo>,
}

impl std::fmt::Debug for VerificationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationContext")
            .field("id", &self.id)
            .field("plugin", &self.info.plugin_name)
            .field("metadata", &self.info.metadata)
            .finish()
    }
}

impl VerificationContext {
    pub(crate) fn new(engine: Arc<EngineInner>, id: ContextId, info: Arc<ContextInfo>) -> Self {
        Self { engine, id, info }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Entrypoint name this context tree was created for.
    pub fn plugin_name(&self) -> &str {
        &self.info.plugin_name
    }

    pub fn root(&self) -> Option<&Path> {
        self.info.root.as_deref()
    }

    /// Directory of the verify file that was loading when the root was created.
    pub fn base_dir(&self) -> Option<&Path> {
        self.info.base_dir.as_deref()
    }

    /// Directory relative paths resolve against: base dir, then root, then
    /// the process working directory.
    pub fn cwd(&self) -> PathBuf {
        self.base_dir()
            .or(self.root())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn metadata(&self) -> &Metadata {
        &self.info.metadata
    }

    pub fn state(&self) -> Result<ContextState, DeclarationError> {
        let state = self.engine.state();
        let index = state.contexts.index_of(self.id)?;
        let node = &state.contexts.nodes[index];
        Ok(if node.finalized {
            ContextState::Finalized
        } else if node.check_registered {
            ContextState::CheckRegistered
        } else {
            ContextState::Open
        })
    }

    /// Run `check` as the one check-producing call of this context tree.
    ///
    /// Fails with [`DeclarationError::DoubleRegistration`] before running
    /// `check` when this context or an ancestor already registered. The
    /// closure must register exactly one check through this context or a
    /// descendant created inside it.
    pub fn lock<T>(
        &self,
        check: impl FnOnce() -> Result<T, DeclarationError>,
    ) -> Result<T, DeclarationError> {
        {
            let mut state = self.engine.state();
            let index = state.contexts.index_of(self.id)?;
            state.contexts.claim(index)?;
            state.contexts.nodes[index].gate_open = true;
        }

        let outcome = check();

        let gate_left_open = {
            let mut state = self.engine.state();
            let index = state.contexts.index_of(self.id)?;
            std::mem::replace(&mut state.contexts.nodes[index].gate_open, false)
        };

        let value = outcome?;
        if gate_left_open {
            return Err(DeclarationError::NoCheckScheduled {
                plugin: self.info.plugin_name.clone(),
                metadata: self.info.metadata.clone(),
            });
        }
        Ok(value)
    }

    /// Append a check to the engine's pending list and return its id.
    ///
    /// Inside a [`lock`](Self::lock) closure this consumes the lock's gate.
    /// Outside one it performs the lock transition itself, so a tree still
    /// yields at most one check.
    pub fn register(
        &self,
        description: impl Into<String>,
        handler: Arc<dyn CheckHandler>,
    ) -> Result<TestId, DeclarationError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(DeclarationError::EmptyDescription);
        }

        let mut state = self.engine.state();
        let index = state.contexts.index_of(self.id)?;
        if !state.contexts.consume_gate(index) {
            state.contexts.claim(index)?;
        }

        let id = state.next_id;
        state.next_id += 1;
        let source = state.active_source.clone();
        debug!(plugin = %self.info.plugin_name, id, %description, "registered check");
        state.tests.push(TestDefinition {
            id,
            description,
            handler,
            source,
        });
        Ok(id)
    }

    /// Create a child context that inherits root and base dir and carries
    /// a merged copy of the metadata. Children do not auto-finalize; they
    /// are finalized through their root.
    pub fn extend(&self, metadata: Metadata) -> Result<VerificationContext, DeclarationError> {
        self.extend_with(metadata, false)
    }

    /// [`extend`](Self::extend) with explicit auto-finalization.
    pub fn extend_with(
        &self,
        metadata: Metadata,
        auto_finalize: bool,
    ) -> Result<VerificationContext, DeclarationError> {
        let mut merged = self.info.metadata.clone();
        merged.extend(metadata);
        let info = Arc::new(ContextInfo {
            plugin_name: self.info.plugin_name.clone(),
            root: self.info.root.clone(),
            base_dir: self.info.base_dir.clone(),
            metadata: merged,
        });

        let mut state = self.engine.state();
        let parent = state.contexts.index_of(self.id)?;
        let id = state
            .contexts
            .insert(Arc::clone(&info), Some(parent), auto_finalize);
        Ok(VerificationContext::new(Arc::clone(&self.engine), id, info))
    }

    /// Validate that this subtree registered a check.
    ///
    /// Children are finalized first. Calling this again is a no-op.
    pub fn finalize(&self) -> Result<(), DeclarationError> {
        let mut state = self.engine.state();
        let index = state.contexts.index_of(self.id)?;
        state.contexts.finalize(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::check::{handler, Settle};
    use crate::engine::{EngineConfig, RepoVerificationEngine};
    use serde_json::json;

    fn engine() -> RepoVerificationEngine {
        RepoVerificationEngine::new(EngineConfig::default()).unwrap()
    }

    fn noop() -> Arc<dyn CheckHandler> {
        handler(|settle: Settle| async move {
            settle.pass("ok");
            Ok::<_, anyhow::Error>(None)
        })
    }

    fn meta(key: &str, value: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert(key.to_string(), json!(value));
        m
    }

    #[test]
    fn lock_then_register_schedules_one_check() {
        let engine = engine();
        let ctx = engine.create_verification_context("file", Metadata::new(), true);

        let id = ctx.lock(|| ctx.register("exists", noop())).unwrap();

        assert_eq!(id, 0);
        assert_eq!(engine.planned_tests(), 1);
        assert_eq!(ctx.state().unwrap(), ContextState::CheckRegistered);
        ctx.finalize().unwrap();
        assert_eq!(ctx.state().unwrap(), ContextState::Finalized);
    }

    #[test]
    fn second_lock_fails_without_running_closure() {
        let engine = engine();
        let ctx = engine.create_verification_context("file", Metadata::new(), true);
        ctx.lock(|| ctx.register("first", noop())).unwrap();

        let mut ran = false;
        let err = ctx
            .lock(|| {
                ran = true;
                ctx.register("second", noop())
            })
            .unwrap_err();

        assert!(!ran);
        assert_eq!(
            err.to_string(),
            "Only one check can be registered for verify.file."
        );
        assert_eq!(engine.planned_tests(), 1);
    }

    #[test]
    fn sibling_children_share_one_check() {
        let engine = engine();
        let root = engine.create_verification_context("git", Metadata::new(), true);
        let a = root.extend(meta("branch", "main")).unwrap();
        let b = root.extend(meta("branch", "dev")).unwrap();

        a.lock(|| a.register("a", noop())).unwrap();
        let err = b.lock(|| b.register("b", noop())).unwrap_err();

        assert!(matches!(err, DeclarationError::DoubleRegistration { .. }));
    }

    #[test]
    fn register_without_lock_still_enforces_single_check() {
        let engine = engine();
        let ctx = engine.create_verification_context("custom", Metadata::new(), true);

        ctx.register("one", noop()).unwrap();
        let err = ctx.register("two", noop()).unwrap_err();

        assert!(matches!(err, DeclarationError::DoubleRegistration { .. }));
    }

    #[test]
    fn lock_without_register_is_an_error() {
        let engine = engine();
        let ctx = engine.create_verification_context("file", meta("path", "x"), true);

        let err = ctx.lock(|| Ok(())).unwrap_err();

        assert!(matches!(err, DeclarationError::NoCheckScheduled { .. }));
    }

    #[test]
    fn register_on_child_created_inside_lock() {
        let engine = engine();
        let root = engine.create_verification_context("command", Metadata::new(), true);

        root.lock(|| {
            let child = root.extend(meta("command", "ls"))?;
            child.register("ls runs", noop())
        })
        .unwrap();

        root.finalize().unwrap();
    }

    #[test]
    fn empty_description_rejected() {
        let engine = engine();
        let ctx = engine.create_verification_context("file", Metadata::new(), true);
        let err = ctx.register("   ", noop()).unwrap_err();
        assert_eq!(err, DeclarationError::EmptyDescription);
        assert_eq!(ctx.state().unwrap(), ContextState::Open);
    }

    #[test]
    fn finalize_without_check_reports_metadata() {
        let engine = engine();
        let root = engine.create_verification_context("file", Metadata::new(), true);
        let child = root.extend(meta("path", "README.md")).unwrap();

        let err = root.finalize().unwrap_err();

        assert_eq!(
            err.to_string(),
            "No check was registered for verify.file. Metadata: {\"path\":\"README.md\"}."
        );
        assert_eq!(child.state().unwrap(), ContextState::Finalized);
    }

    #[test]
    fn finalize_is_idempotent() {
        let engine = engine();
        let ctx = engine.create_verification_context("file", Metadata::new(), true);
        ctx.register("check", noop()).unwrap();

        ctx.finalize().unwrap();
        ctx.finalize().unwrap();

        assert_eq!(engine.planned_tests(), 1);
    }

    #[test]
    fn lock_after_finalize_is_rejected() {
        let engine = engine();
        let root = engine.create_verification_context("file", Metadata::new(), true);
        let _ = root.finalize();

        let err = root.register("late", noop()).unwrap_err();
        assert!(matches!(err, DeclarationError::ContextFinalized { .. }));
    }

    #[test]
    fn extend_merges_without_touching_parent() {
        let engine = engine();
        let root = engine.create_verification_context("file", meta("a", "1"), true);
        let child = root.extend(meta("b", "2")).unwrap();
        let grandchild = child.extend(meta("a", "3")).unwrap();

        assert_eq!(root.metadata().len(), 1);
        assert_eq!(child.metadata().len(), 2);
        assert_eq!(grandchild.metadata()["a"], json!("3"));
        assert_eq!(grandchild.plugin_name(), "file");
    }

    #[test]
    fn cleared_contexts_are_stale() {
        let engine = engine();
        let ctx = engine.create_verification_context("file", Metadata::new(), true);
        engine.clear();

        assert_eq!(ctx.state().unwrap_err(), DeclarationError::StaleContext);
        assert_eq!(
            ctx.register("x", noop()).unwrap_err(),
            DeclarationError::StaleContext
        );
    }

    #[test]
    fn cwd_prefers_base_dir_then_root() {
        let engine = RepoVerificationEngine::new(EngineConfig {
            root: Some(PathBuf::from("/repo")),
            ..Default::default()
        })
        .unwrap();

        let ctx = engine.create_verification_context("file", Metadata::new(), true);
        assert_eq!(ctx.cwd(), PathBuf::from("/repo"));

        let _scope = engine.enter_file_scope(Some(PathBuf::from("/repo/checks/a.verify")));
        let scoped = engine.create_verification_context("file", Metadata::new(), true);
        assert_eq!(scoped.cwd(), PathBuf::from("/repo/checks"));
        assert_eq!(scoped.extend(Metadata::new()).unwrap().cwd(), PathBuf::from("/repo/checks"));
    }
}
