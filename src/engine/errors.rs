//! engine::errors
//!
//! Declaration-time errors.
//!
//! Every variant is an authoring mistake detected while plugins are applied
//! or verify files are evaluated. They abort loading of the declaring file
//! and are never downgraded to test failures. Execution failures are not
//! represented here; they become failed [`crate::core::types::TestResult`]s.

use thiserror::Error;

use crate::core::types::Metadata;

/// Errors raised during plugin application and check declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// Plugin shape could not be applied.
    #[error("malformed plugin{}: {message}", plugin_suffix(.plugin))]
    MalformedPlugin {
        plugin: Option<String>,
        message: String,
    },

    /// An entrypoint tried to use the reserved `with` name.
    #[error("Plugin name \"with\" is reserved and cannot be used.")]
    ReservedName,

    /// A check was registered with a blank description.
    #[error("Repo test description must be a non-empty string.")]
    EmptyDescription,

    /// A second check was registered in one context tree.
    #[error("Only one check can be registered for verify.{plugin}.")]
    DoubleRegistration { plugin: String },

    /// A context tree finalized without registering a check.
    #[error("No check was registered for verify.{plugin}.{}", metadata_suffix(.metadata))]
    MissingCheck { plugin: String, metadata: Metadata },

    /// A locked call returned without registering a check.
    #[error("A call on verify.{plugin} returned without registering a check.{}", metadata_suffix(.metadata))]
    NoCheckScheduled { plugin: String, metadata: Metadata },

    /// Registration was attempted under an already finalized context.
    #[error("verify.{plugin} was already finalized; declare a new statement instead.")]
    ContextFinalized { plugin: String },

    /// A context handle outlived an engine `clear()`.
    #[error("verification context is stale; the engine was cleared")]
    StaleContext,

    /// No plugin registered this entrypoint.
    #[error("unknown plugin entrypoint \"{0}\"")]
    UnknownEntrypoint(String),

    /// The entry has no member with this name.
    #[error("verify.{plugin} has no member \"{member}\"")]
    UnknownMember { plugin: String, member: String },

    /// The entry cannot be called directly.
    #[error("verify.{plugin} is not callable")]
    NotCallable { plugin: String },

    /// Arguments did not match what the member expects.
    #[error("invalid arguments for {member}: {message}")]
    InvalidArguments { member: String, message: String },

    /// A chain continued after a check was already scheduled.
    #[error("cannot access \"{member}\" after a check was scheduled")]
    ChainAfterCheck { member: String },

    /// The façade refused to overwrite a reserved property.
    #[error("Cannot set reserved property \"{0}\".")]
    ReservedProperty(String),
}

impl DeclarationError {
    pub(crate) fn malformed(plugin: Option<&str>, message: impl Into<String>) -> Self {
        DeclarationError::MalformedPlugin {
            plugin: plugin.map(str::to_string),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_args(member: impl Into<String>, message: impl Into<String>) -> Self {
        DeclarationError::InvalidArguments {
            member: member.into(),
            message: message.into(),
        }
    }
}

fn plugin_suffix(plugin: &Option<String>) -> String {
    match plugin {
        Some(name) => format!(" \"{}\"", name),
        None => String::new(),
    }
}

fn metadata_suffix(metadata: &Metadata) -> String {
    if metadata.is_empty() {
        return String::new();
    }
    let json = serde_json::to_string(metadata).unwrap_or_default();
    format!(" Metadata: {}.", json)
}
