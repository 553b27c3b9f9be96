//! engine::entry
//!
//! Generic entry builder for plugin APIs.
//!
//! A [`PluginEntry`] is the value a fluent chain segment resolves to. It is
//! bound to one [`VerificationContext`] and exposes:
//!
//! - an optional callable (`verify.file("x")`)
//! - **check** members, wrapped through [`VerificationContext::lock`] so only
//!   one of them per context tree can schedule a check
//! - **method** members, unwrapped, which return another entry or schedule
//!   through a child context (`verify.git.branch("main")`)
//! - **properties**, evaluated on access (`verify.file("x").not`)
//!
//! Arguments arrive as dynamically typed [`Arg`] values; members validate
//! their shape with the `Arg` accessors and the `*_arg` helpers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use super::context::VerificationContext;
use super::errors::DeclarationError;
use crate::core::types::TestId;

/// A regex literal argument (`/pattern/flags`).
#[derive(Debug, Clone)]
pub struct RegexArg {
    regex: Regex,
    source: String,
    flags: String,
}

impl RegexArg {
    /// Compile `source` with inline `flags` (`i`, `m`, `s`, `x`).
    pub fn new(source: &str, flags: &str) -> Result<Self, regex::Error> {
        let pattern = if flags.is_empty() {
            source.to_string()
        } else {
            format!("(?{}){}", flags, source)
        };
        Ok(Self {
            regex: Regex::new(&pattern)?,
            source: source.to_string(),
            flags: flags.to_string(),
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Display for RegexArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

impl PartialEq for RegexArg {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.flags == other.flags
    }
}

/// A dynamically typed argument to a plugin member.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
    Regex(RegexArg),
    Options(BTreeMap<String, Arg>),
}

impl Arg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&RegexArg> {
        match self {
            Arg::Regex(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_options(&self) -> Option<&BTreeMap<String, Arg>> {
        match self {
            Arg::Options(map) => Some(map),
            _ => None,
        }
    }

    /// Short name of the argument's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Str(_) => "string",
            Arg::Int(_) => "integer",
            Arg::Bool(_) => "boolean",
            Arg::Regex(_) => "regex",
            Arg::Options(_) => "object",
        }
    }

    /// JSON form, used when an argument becomes context metadata.
    pub fn to_json(&self) -> Value {
        match self {
            Arg::Str(s) => Value::String(s.clone()),
            Arg::Int(n) => Value::from(*n),
            Arg::Bool(b) => Value::Bool(*b),
            Arg::Regex(r) => Value::String(r.to_string()),
            Arg::Options(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => write!(f, "{:?}", s),
            Arg::Int(n) => write!(f, "{}", n),
            Arg::Bool(b) => write!(f, "{}", b),
            Arg::Regex(r) => write!(f, "{}", r),
            Arg::Options(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<RegexArg> for Arg {
    fn from(value: RegexArg) -> Self {
        Arg::Regex(value)
    }
}

/// Required string argument at `index`.
pub fn str_arg<'a>(member: &str, args: &'a [Arg], index: usize) -> Result<&'a str, DeclarationError> {
    match args.get(index) {
        Some(Arg::Str(s)) if !s.is_empty() => Ok(s),
        Some(Arg::Str(_)) => Err(DeclarationError::invalid_args(
            member,
            format!("argument {} must be a non-empty string", index + 1),
        )),
        Some(other) => Err(DeclarationError::invalid_args(
            member,
            format!("argument {} must be a string, got {}", index + 1, other.kind()),
        )),
        None => Err(DeclarationError::invalid_args(
            member,
            format!("missing string argument {}", index + 1),
        )),
    }
}

/// Required regex argument at `index`.
pub fn regex_arg<'a>(
    member: &str,
    args: &'a [Arg],
    index: usize,
) -> Result<&'a RegexArg, DeclarationError> {
    match args.get(index) {
        Some(Arg::Regex(r)) => Ok(r),
        Some(other) => Err(DeclarationError::invalid_args(
            member,
            format!("argument {} must be a regex, got {}", index + 1, other.kind()),
        )),
        None => Err(DeclarationError::invalid_args(
            member,
            format!("missing regex argument {}", index + 1),
        )),
    }
}

/// Optional options-object argument at `index`.
pub fn options_arg<'a>(
    member: &str,
    args: &'a [Arg],
    index: usize,
) -> Result<Option<&'a BTreeMap<String, Arg>>, DeclarationError> {
    match args.get(index) {
        None => Ok(None),
        Some(Arg::Options(map)) => Ok(Some(map)),
        Some(other) => Err(DeclarationError::invalid_args(
            member,
            format!("argument {} must be an object, got {}", index + 1, other.kind()),
        )),
    }
}

/// Reject arguments past `max`.
pub fn max_args(member: &str, args: &[Arg], max: usize) -> Result<(), DeclarationError> {
    if args.len() > max {
        return Err(DeclarationError::invalid_args(
            member,
            format!("expected at most {} argument(s), got {}", max, args.len()),
        ));
    }
    Ok(())
}

/// What a chain segment produced.
#[derive(Debug, Clone)]
pub enum Chained {
    /// The chain continues.
    Entry(PluginEntry),
    /// A check was scheduled; the chain ends here.
    Scheduled(TestId),
}

impl Chained {
    /// Continue the chain at `member`, failing if a check was already scheduled.
    pub fn into_entry(self, member: &str) -> Result<PluginEntry, DeclarationError> {
        match self {
            Chained::Entry(entry) => Ok(entry),
            Chained::Scheduled(_) => Err(DeclarationError::ChainAfterCheck {
                member: member.to_string(),
            }),
        }
    }

    pub fn scheduled(&self) -> Option<TestId> {
        match self {
            Chained::Scheduled(id) => Some(*id),
            Chained::Entry(_) => None,
        }
    }
}

type CallFn =
    Arc<dyn Fn(&VerificationContext, &[Arg]) -> Result<Chained, DeclarationError> + Send + Sync>;
type CheckFn =
    Arc<dyn Fn(&VerificationContext, &[Arg]) -> Result<TestId, DeclarationError> + Send + Sync>;
type PropertyFn =
    Arc<dyn Fn(&VerificationContext) -> Result<PluginEntry, DeclarationError> + Send + Sync>;

#[derive(Clone)]
enum Member {
    Check(CheckFn),
    Method(CallFn),
    Property(PropertyFn),
}

/// A fluent API surface bound to one verification context.
#[derive(Clone)]
pub struct PluginEntry {
    context: VerificationContext,
    callable: Option<CallFn>,
    members: BTreeMap<String, Member>,
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("context", &self.context)
            .field("callable", &self.callable.is_some())
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginEntry {
    pub fn new(context: VerificationContext) -> Self {
        Self {
            context,
            callable: None,
            members: BTreeMap::new(),
        }
    }

    /// Make the entry callable.
    pub fn callable<F>(mut self, call: F) -> Self
    where
        F: Fn(&VerificationContext, &[Arg]) -> Result<Chained, DeclarationError>
            + Send
            + Sync
            + 'static,
    {
        self.callable = Some(Arc::new(call));
        self
    }

    /// Add a check member. Invocations run under the context's lock and
    /// must register exactly one check.
    pub fn check<F>(mut self, name: &str, check: F) -> Self
    where
        F: Fn(&VerificationContext, &[Arg]) -> Result<TestId, DeclarationError>
            + Send
            + Sync
            + 'static,
    {
        self.members
            .insert(name.to_string(), Member::Check(Arc::new(check)));
        self
    }

    /// Add an unwrapped method member.
    pub fn method<F>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&VerificationContext, &[Arg]) -> Result<Chained, DeclarationError>
            + Send
            + Sync
            + 'static,
    {
        self.members
            .insert(name.to_string(), Member::Method(Arc::new(method)));
        self
    }

    /// Add a property evaluated on access.
    pub fn property<F>(mut self, name: &str, property: F) -> Self
    where
        F: Fn(&VerificationContext) -> Result<PluginEntry, DeclarationError> + Send + Sync + 'static,
    {
        self.members
            .insert(name.to_string(), Member::Property(Arc::new(property)));
        self
    }

    pub fn context(&self) -> &VerificationContext {
        &self.context
    }

    pub fn is_callable(&self) -> bool {
        self.callable.is_some()
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Call the entry itself: `entry(args)`.
    pub fn call(&self, args: &[Arg]) -> Result<Chained, DeclarationError> {
        match &self.callable {
            Some(call) => call(&self.context, args),
            None => Err(DeclarationError::NotCallable {
                plugin: self.context.plugin_name().to_string(),
            }),
        }
    }

    /// Invoke a member: `entry.name(args)`.
    pub fn invoke(&self, name: &str, args: &[Arg]) -> Result<Chained, DeclarationError> {
        match self.member(name)? {
            Member::Check(check) => {
                let id = self.context.lock(|| check(&self.context, args))?;
                Ok(Chained::Scheduled(id))
            }
            Member::Method(method) => method(&self.context, args),
            Member::Property(_) => Err(DeclarationError::invalid_args(
                name,
                "is a property and cannot be called",
            )),
        }
    }

    /// Access a property: `entry.name`.
    pub fn get(&self, name: &str) -> Result<PluginEntry, DeclarationError> {
        match self.member(name)? {
            Member::Property(property) => property(&self.context),
            Member::Check(_) | Member::Method(_) => Err(DeclarationError::invalid_args(
                name,
                "is a method and must be called",
            )),
        }
    }

    fn member(&self, name: &str) -> Result<&Member, DeclarationError> {
        self.members
            .get(name)
            .ok_or_else(|| DeclarationError::UnknownMember {
                plugin: self.context.plugin_name().to_string(),
                member: name.to_string(),
            })
    }
}
