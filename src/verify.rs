//! verify
//!
//! Process-wide convenience handle over one engine.
//!
//! # Overview
//!
//! Verify files and embedders that do not want to thread an engine through
//! their code use [`verify()`], which resolves every property against the
//! engine installed by [`configure`] (or a lazily built default engine with
//! the built-in plugins). Lookups are live: plugins added later through
//! [`RepoVerificationEngine::extend`] are visible immediately.
//!
//! # Concurrency
//!
//! The handle is process-wide state. Swapping it with [`configure`] or
//! [`reset`] while another logical run is declaring or executing checks is
//! not supported. Code that needs isolation constructs its own
//! [`RepoVerificationEngine`] and passes it explicitly, as
//! [`crate::runner::run`] does.
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::verify::{verify, Property};
//!
//! let v = verify().with(meta);
//! v.entry("file")?
//!     .call(&["README.md".into()])?
//!     .into_entry("exists")?
//!     .invoke("exists", &[])?;
//! ```

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::types::{Concurrency, Metadata, PackageManager};
use crate::engine::{
    DeclarationError, EngineConfig, EntrypointFactory, PluginEntry, RepoPlugin,
    RepoVerificationEngine, RESERVED_ENTRYPOINT,
};
use crate::plugins;

static INSTANCE: RwLock<Option<RepoVerificationEngine>> = RwLock::new(None);

/// Parameters for [`configure`].
#[derive(Clone, Default)]
pub struct VerifierConfig {
    pub root: Option<PathBuf>,
    /// Applied after the built-in plugins.
    pub plugins: Vec<Arc<dyn RepoPlugin>>,
    pub concurrency: Option<Concurrency>,
    pub package_manager: PackageManager,
}

/// Replace the process-wide engine.
pub fn configure(config: VerifierConfig) -> Result<RepoVerificationEngine, DeclarationError> {
    let mut all = plugins::builtin();
    all.extend(config.plugins);
    let engine = RepoVerificationEngine::new(EngineConfig {
        plugins: all,
        root: config.root,
        default_concurrency: config.concurrency,
        package_manager: config.package_manager,
    })?;
    *INSTANCE.write().unwrap_or_else(PoisonError::into_inner) = Some(engine.clone());
    Ok(engine)
}

/// The process-wide engine, built with defaults on first use.
pub fn instance() -> Result<RepoVerificationEngine, DeclarationError> {
    if let Some(engine) = INSTANCE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return Ok(engine.clone());
    }

    let mut slot = INSTANCE.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(engine) = slot.as_ref() {
        return Ok(engine.clone());
    }
    let engine = RepoVerificationEngine::new(EngineConfig {
        plugins: plugins::builtin(),
        ..Default::default()
    })?;
    *slot = Some(engine.clone());
    Ok(engine)
}

/// Drop the process-wide engine, returning it.
pub fn reset() -> Option<RepoVerificationEngine> {
    INSTANCE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// A view over the process-wide engine with no extra metadata.
pub fn verify() -> Verify {
    Verify::default()
}

/// Engine members reachable through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMember {
    Root,
    DefaultConcurrency,
    PackageManager,
    PlannedTests,
    Run,
    Clear,
    Extend,
    Resolve,
    PluginNames,
    PluginDocumentation,
    CreateVerificationContext,
    EnterFileScope,
    WithFileScope,
    FinalizePending,
}

impl EngineMember {
    pub const ALL: [EngineMember; 14] = [
        EngineMember::Root,
        EngineMember::DefaultConcurrency,
        EngineMember::PackageManager,
        EngineMember::PlannedTests,
        EngineMember::Run,
        EngineMember::Clear,
        EngineMember::Extend,
        EngineMember::Resolve,
        EngineMember::PluginNames,
        EngineMember::PluginDocumentation,
        EngineMember::CreateVerificationContext,
        EngineMember::EnterFileScope,
        EngineMember::WithFileScope,
        EngineMember::FinalizePending,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EngineMember::Root => "root",
            EngineMember::DefaultConcurrency => "default_concurrency",
            EngineMember::PackageManager => "package_manager",
            EngineMember::PlannedTests => "planned_tests",
            EngineMember::Run => "run",
            EngineMember::Clear => "clear",
            EngineMember::Extend => "extend",
            EngineMember::Resolve => "resolve",
            EngineMember::PluginNames => "plugin_names",
            EngineMember::PluginDocumentation => "plugin_documentation",
            EngineMember::CreateVerificationContext => "create_verification_context",
            EngineMember::EnterFileScope => "enter_file_scope",
            EngineMember::WithFileScope => "with_file_scope",
            EngineMember::FinalizePending => "finalize_pending",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Data members are listed by [`Verify::keys`]; methods are not.
    pub fn is_method(&self) -> bool {
        !matches!(
            self,
            EngineMember::Root
                | EngineMember::DefaultConcurrency
                | EngineMember::PackageManager
                | EngineMember::PlannedTests
        )
    }
}

/// Result of a property lookup.
#[derive(Debug, Clone)]
pub enum Property {
    /// The metadata view constructor; use [`Verify::with`].
    With,
    /// A plugin entry bound to a fresh root context.
    Entrypoint(PluginEntry),
    /// An engine member, bound to the current instance.
    Member {
        member: EngineMember,
        engine: RepoVerificationEngine,
    },
}

/// Enumeration flags of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub enumerable: bool,
    pub writable: bool,
}

/// Metadata-carrying view over the process-wide engine.
///
/// Views are cheap; [`Verify::with`] returns a new view sharing the same
/// engine.
#[derive(Debug, Clone, Default)]
pub struct Verify {
    metadata: Metadata,
}

impl Verify {
    /// A view whose root contexts carry `extra` merged over this view's metadata.
    pub fn with(&self, extra: Metadata) -> Verify {
        let mut metadata = self.metadata.clone();
        metadata.extend(extra);
        Verify { metadata }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The engine this view resolves against.
    pub fn engine(&self) -> Result<RepoVerificationEngine, DeclarationError> {
        instance()
    }

    /// Resolve a property: `with`, then live entrypoints, then engine members.
    pub fn get(&self, prop: &str) -> Result<Option<Property>, DeclarationError> {
        if prop == RESERVED_ENTRYPOINT {
            return Ok(Some(Property::With));
        }
        let engine = instance()?;
        if engine.has_entrypoint(prop) {
            let entry = engine.entrypoint(prop, self.metadata.clone())?;
            return Ok(Some(Property::Entrypoint(entry)));
        }
        Ok(EngineMember::from_name(prop).map(|member| Property::Member { member, engine }))
    }

    /// Resolve a plugin entrypoint, creating a fresh root context.
    pub fn entry(&self, prop: &str) -> Result<PluginEntry, DeclarationError> {
        instance()?.entrypoint(prop, self.metadata.clone())
    }

    /// Register `factory` under `prop`.
    ///
    /// `with` and engine member names cannot be assigned.
    pub fn set(&self, prop: &str, factory: EntrypointFactory) -> Result<(), DeclarationError> {
        if prop == RESERVED_ENTRYPOINT || EngineMember::from_name(prop).is_some() {
            return Err(DeclarationError::ReservedProperty(prop.to_string()));
        }
        instance()?.define_entrypoint(prop, factory)
    }

    pub fn has(&self, prop: &str) -> bool {
        if prop == RESERVED_ENTRYPOINT || EngineMember::from_name(prop).is_some() {
            return true;
        }
        instance()
            .map(|engine| engine.has_entrypoint(prop))
            .unwrap_or(false)
    }

    /// `with`, every live entrypoint, then engine data members.
    pub fn keys(&self) -> Result<Vec<String>, DeclarationError> {
        let mut keys = vec![RESERVED_ENTRYPOINT.to_string()];
        keys.extend(instance()?.plugin_names());
        keys.extend(
            EngineMember::ALL
                .iter()
                .filter(|m| !m.is_method())
                .map(|m| m.name().to_string()),
        );
        Ok(keys)
    }

    /// Descriptor of an own property, or `None` when `prop` is not one.
    pub fn descriptor(&self, prop: &str) -> Result<Option<PropertyDescriptor>, DeclarationError> {
        if prop == RESERVED_ENTRYPOINT {
            return Ok(Some(PropertyDescriptor {
                enumerable: false,
                writable: false,
            }));
        }
        if instance()?.has_entrypoint(prop) {
            return Ok(Some(PropertyDescriptor {
                enumerable: true,
                writable: false,
            }));
        }
        Ok(EngineMember::from_name(prop)
            .filter(|m| !m.is_method())
            .map(|_| PropertyDescriptor {
                enumerable: true,
                writable: false,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_merges_without_mutating_origin() {
        let mut a = Metadata::new();
        a.insert("team".into(), "core".into());
        let mut b = Metadata::new();
        b.insert("area".into(), "docs".into());

        let base = verify().with(a);
        let derived = base.with(b);

        assert_eq!(base.metadata().len(), 1);
        assert_eq!(derived.metadata().len(), 2);
    }

    #[test]
    fn member_names_round_trip() {
        for member in EngineMember::ALL {
            assert_eq!(EngineMember::from_name(member.name()), Some(member));
        }
        assert!(EngineMember::from_name("with").is_none());
    }
}
