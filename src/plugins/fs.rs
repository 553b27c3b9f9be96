//! plugins::fs
//!
//! Filesystem assertions: `file`, `dir`, and `files`.
//!
//! Relative paths resolve against [`VerificationContext::cwd`], so checks
//! declared in a nested verify file target paths next to that file.
//!
//! # API
//!
//! ```text
//! file("README.md").exists()
//! file("README.md").contains("Install")
//! file("README.md").not.contains(/TODO/i)
//! dir("docs").not.exists()
//! files(/\.rs$/).lines({ max: 100 })
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::entry::{max_args, options_arg, regex_arg, str_arg};
use crate::engine::{
    plugin_fn, Arg, Chained, CheckOutcome, DeclarationError, FnPlugin, PluginApi, PluginEntry,
    RegexArg, VerificationContext,
};
use crate::plugins::{meta, outcome};

/// Directories `files(..)` never descends into.
pub const IGNORED_DIRS: [&str; 10] = [
    ".git",
    "node_modules",
    "dist",
    "build",
    "coverage",
    ".next",
    ".turbo",
    ".cache",
    "out",
    "target",
];

/// Violations collected before `lines` stops scanning.
const MAX_VIOLATIONS: usize = 50;
/// Violations quoted in the failure message.
const PREVIEW_VIOLATIONS: usize = 10;

pub fn plugin() -> FnPlugin {
    plugin_fn(|_options| {
        Ok(PluginApi::new()
            .entrypoint("file", |ctx| Ok(file_root(ctx)))
            .entrypoint("dir", |ctx| Ok(dir_root(ctx)))
            .entrypoint("files", |ctx| Ok(files_root(ctx))))
    })
    .named("Filesystem")
    .described("Assertions for files and directories relative to the verify file.")
    .doc(
        "verify.file(\"<path>\").exists()",
        "Passes when the target file exists relative to the current verify file (or repo root).",
    )
    .doc(
        "verify.file(\"<path>\").contains(textOrPattern)",
        "Ensures the file contents include the provided string or satisfy the regular expression.",
    )
    .doc(
        "verify.file(\"<path>\").not.exists()",
        "Passes only when the file is missing.",
    )
    .doc(
        "verify.file(\"<path>\").not.contains(textOrPattern)",
        "Fails if the file contains the provided string or matches the expression.",
    )
    .doc("verify.dir(\"<path>\").exists()", "Ensures the directory exists.")
    .doc(
        "verify.dir(\"<path>\").not.exists()",
        "Ensures the directory does not exist.",
    )
    .doc(
        "verify.files(/pattern/).lines({ min?, max? })",
        "Checks every line length in files whose repo-relative path matches the pattern.",
    )
}

/// A file or directory named in a chain, resolved once at declaration.
#[derive(Debug, Clone)]
struct Target {
    display: String,
    full: PathBuf,
}

impl Target {
    fn new(ctx: &VerificationContext, path: &str) -> Self {
        Self {
            display: path.to_string(),
            full: ctx.cwd().join(path),
        }
    }
}

/// Text or pattern searched for by `contains`.
#[derive(Debug, Clone)]
enum Needle {
    Text(String),
    Pattern(RegexArg),
}

impl Needle {
    fn from_args(member: &str, args: &[Arg]) -> Result<Self, DeclarationError> {
        max_args(member, args, 1)?;
        match args.first() {
            Some(Arg::Regex(re)) => Ok(Needle::Pattern(re.clone())),
            _ => Ok(Needle::Text(str_arg(member, args, 0)?.to_string())),
        }
    }

    fn is_found_in(&self, contents: &str) -> bool {
        match self {
            Needle::Text(text) => contents.contains(text.as_str()),
            Needle::Pattern(re) => re.is_match(contents),
        }
    }

    /// Quoted text or the regex literal.
    fn printable(&self) -> String {
        match self {
            Needle::Text(text) => format!("\"{}\"", text),
            Needle::Pattern(re) => re.to_string(),
        }
    }
}

impl fmt::Display for Needle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Needle::Text(text) => f.write_str(text),
            Needle::Pattern(re) => write!(f, "{}", re),
        }
    }
}

fn file_root(ctx: VerificationContext) -> PluginEntry {
    PluginEntry::new(ctx).callable(|ctx, args| {
        max_args("file", args, 1)?;
        let path = str_arg("file", args, 0)?;
        let child = ctx.extend(meta("file", path))?;
        let target = Target::new(&child, path);
        Ok(Chained::Entry(file_entry(child, target)))
    })
}

fn file_entry(ctx: VerificationContext, target: Target) -> PluginEntry {
    let exists = target.clone();
    let contains = target.clone();
    PluginEntry::new(ctx)
        .check("exists", move |ctx, args| {
            max_args("exists", args, 0)?;
            let target = exists.clone();
            ctx.register(
                format!("File \"{}\" should exist", target.display),
                outcome(move || {
                    let target = target.clone();
                    async move { file_exists(&target).await }
                }),
            )
        })
        .check("contains", move |ctx, args| {
            let needle = Needle::from_args("contains", args)?;
            let target = contains.clone();
            ctx.register(
                format!("File \"{}\" should contain {}", target.display, needle),
                outcome(move || {
                    let (target, needle) = (target.clone(), needle.clone());
                    async move { file_contains(&target, &needle).await }
                }),
            )
        })
        .property("not", move |ctx| Ok(file_negated(ctx.clone(), target.clone())))
}

fn file_negated(ctx: VerificationContext, target: Target) -> PluginEntry {
    let exists = target.clone();
    PluginEntry::new(ctx)
        .check("exists", move |ctx, args| {
            max_args("exists", args, 0)?;
            let target = exists.clone();
            ctx.register(
                format!("File \"{}\" should not exist", target.display),
                outcome(move || {
                    let target = target.clone();
                    async move {
                        if file_exists(&target).await.pass {
                            CheckOutcome::fail(format!(
                                "Expected file \"{}\" to not exist, but it does.",
                                target.display
                            ))
                        } else {
                            CheckOutcome::pass(format!("File \"{}\" does not exist.", target.display))
                        }
                    }
                }),
            )
        })
        .check("contains", move |ctx, args| {
            let needle = Needle::from_args("contains", args)?;
            let target = target.clone();
            ctx.register(
                format!("File \"{}\" should not contain {}", target.display, needle),
                outcome(move || {
                    let (target, needle) = (target.clone(), needle.clone());
                    async move {
                        if file_contains(&target, &needle).await.pass {
                            CheckOutcome::fail(format!(
                                "Expected file \"{}\" to not contain {}, but it does.",
                                target.display, needle
                            ))
                        } else {
                            CheckOutcome::pass(format!(
                                "File \"{}\" does not contain {}.",
                                target.display, needle
                            ))
                        }
                    }
                }),
            )
        })
}

fn dir_root(ctx: VerificationContext) -> PluginEntry {
    PluginEntry::new(ctx).callable(|ctx, args| {
        max_args("dir", args, 1)?;
        let path = str_arg("dir", args, 0)?;
        let child = ctx.extend(meta("dir", path))?;
        let target = Target::new(&child, path);
        Ok(Chained::Entry(dir_entry(child, target)))
    })
}

fn dir_entry(ctx: VerificationContext, target: Target) -> PluginEntry {
    let exists = target.clone();
    PluginEntry::new(ctx)
        .check("exists", move |ctx, args| {
            max_args("exists", args, 0)?;
            let target = exists.clone();
            ctx.register(
                format!("Directory \"{}\" should exist", target.display),
                outcome(move || {
                    let target = target.clone();
                    async move { dir_exists(&target).await }
                }),
            )
        })
        .property("not", move |ctx| {
            let target = target.clone();
            Ok(PluginEntry::new(ctx.clone()).check("exists", move |ctx, args| {
                max_args("exists", args, 0)?;
                let target = target.clone();
                ctx.register(
                    format!("Directory \"{}\" should not exist", target.display),
                    outcome(move || {
                        let target = target.clone();
                        async move {
                            if dir_exists(&target).await.pass {
                                CheckOutcome::fail(format!(
                                    "Expected directory \"{}\" to not exist, but it does.",
                                    target.display
                                ))
                            } else {
                                CheckOutcome::pass(format!(
                                    "Directory \"{}\" does not exist.",
                                    target.display
                                ))
                            }
                        }
                    }),
                )
            }))
        })
}

fn files_root(ctx: VerificationContext) -> PluginEntry {
    PluginEntry::new(ctx).callable(|ctx, args| {
        max_args("files", args, 1)?;
        let pattern = regex_arg("files", args, 0)?.clone();
        let child = ctx.extend(meta("files", pattern.to_string()))?;
        Ok(Chained::Entry(files_entry(child, pattern)))
    })
}

fn files_entry(ctx: VerificationContext, pattern: RegexArg) -> PluginEntry {
    PluginEntry::new(ctx).check("lines", move |ctx, args| {
        max_args("lines", args, 1)?;
        let bounds = LineBounds::from_args(args)?;
        let pattern = pattern.clone();
        let root = ctx.cwd();
        ctx.register(
            format!("Lines in files matching {} should satisfy {}", pattern, bounds),
            outcome(move || {
                let (pattern, bounds, root) = (pattern.clone(), bounds, root.clone());
                async move { check_line_lengths(&pattern, bounds, &root).await }
            }),
        )
    })
}

async fn file_exists(target: &Target) -> CheckOutcome {
    match tokio::fs::metadata(&target.full).await {
        Ok(_) => CheckOutcome::pass(format!("File \"{}\" exists.", target.display)),
        Err(_) => CheckOutcome::fail(format!(
            "Expected file \"{}\" to exist, but it was not found at {}.",
            target.display,
            target.full.display()
        )),
    }
}

async fn file_contains(target: &Target, needle: &Needle) -> CheckOutcome {
    let contents = match tokio::fs::read_to_string(&target.full).await {
        Ok(contents) => contents,
        Err(err) => {
            return CheckOutcome::fail(format!(
                "Failed to read \"{}\" while searching for {}: {}",
                target.display, needle, err
            ))
        }
    };

    if needle.is_found_in(&contents) {
        CheckOutcome::pass(format!(
            "File \"{}\" contains {}.",
            target.display,
            needle.printable()
        ))
    } else {
        CheckOutcome::fail(format!(
            "Expected file \"{}\" to contain {}, but it did not.",
            target.display,
            needle.printable()
        ))
    }
}

async fn dir_exists(target: &Target) -> CheckOutcome {
    match tokio::fs::metadata(&target.full).await {
        Ok(info) if info.is_dir() => {
            CheckOutcome::pass(format!("Directory \"{}\" exists.", target.display))
        }
        Ok(_) => CheckOutcome::fail(format!(
            "Expected directory \"{}\" to exist, but \"{}\" is not a directory.",
            target.display,
            target.full.display()
        )),
        Err(_) => CheckOutcome::fail(format!(
            "Expected directory \"{}\" to exist, but it was not found at {}.",
            target.display,
            target.full.display()
        )),
    }
}

/// `{ min?, max? }` passed to `lines`. Validated when the check runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineBounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl LineBounds {
    fn from_args(args: &[Arg]) -> Result<Self, DeclarationError> {
        let Some(options) = options_arg("lines", args, 0)? else {
            return Ok(Self::default());
        };
        let bound = |key: &str| match options.get(key) {
            None => Ok(None),
            Some(Arg::Int(n)) => Ok(Some(*n)),
            Some(other) => Err(DeclarationError::invalid_args(
                "lines",
                format!("{} must be an integer, got {}", key, other.kind()),
            )),
        };
        Ok(Self {
            min: bound("min")?,
            max: bound("max")?,
        })
    }

    /// Reject missing, negative, or inverted bounds.
    pub fn validate(&self) -> Result<(), String> {
        match (self.min, self.max) {
            (None, None) => Err("lines() requires at least one of { min, max }.".to_string()),
            (Some(min), _) if min < 0 => Err(format!(
                "lines().min must be a finite number >= 0. Received: {}",
                min
            )),
            (_, Some(max)) if max < 0 => Err(format!(
                "lines().max must be a finite number >= 0. Received: {}",
                max
            )),
            (Some(min), Some(max)) if min > max => Err(format!(
                "lines().min cannot be greater than lines().max. Received: min={}, max={}",
                min, max
            )),
            _ => Ok(()),
        }
    }

    pub fn violated_by(&self, length: usize) -> bool {
        let length = length as i64;
        self.min.is_some_and(|min| length < min) || self.max.is_some_and(|max| length > max)
    }
}

impl fmt::Display for LineBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            self.min.map(|min| format!("min={}", min)),
            self.max.map(|max| format!("max={}", max)),
        ]
        .into_iter()
        .flatten()
        .collect();
        if parts.is_empty() {
            f.write_str("no bounds")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Violation {
    file: String,
    line: usize,
    length: usize,
}

async fn check_line_lengths(pattern: &RegexArg, bounds: LineBounds, root: &Path) -> CheckOutcome {
    if let Err(message) = bounds.validate() {
        return CheckOutcome::fail(message);
    }

    let walk_root = root.to_path_buf();
    let files = match tokio::task::spawn_blocking(move || walk_files(&walk_root)).await {
        Ok(Ok(files)) => files,
        Ok(Err(err)) => {
            return CheckOutcome::fail_with(format!("Failed to scan {}", root.display()), err)
        }
        Err(err) => {
            return CheckOutcome::fail_with(format!("Failed to scan {}", root.display()), err)
        }
    };

    let matched: Vec<String> = files.into_iter().filter(|f| pattern.is_match(f)).collect();
    if matched.is_empty() {
        return CheckOutcome::fail(format!(
            "No files matched {} under {}.",
            pattern,
            root.display()
        ));
    }

    let mut violations = Vec::new();
    'files: for file in &matched {
        let contents = match tokio::fs::read_to_string(root.join(file)).await {
            Ok(contents) => contents,
            Err(err) => return CheckOutcome::fail(format!("Failed to read \"{}\": {}", file, err)),
        };

        for (index, raw) in contents.split('\n').enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let length = line.chars().count();
            if bounds.violated_by(length) {
                violations.push(Violation {
                    file: file.clone(),
                    line: index + 1,
                    length,
                });
                if violations.len() >= MAX_VIOLATIONS {
                    break 'files;
                }
            }
        }
    }

    if violations.is_empty() {
        return CheckOutcome::pass(format!(
            "All lines in {} file{} matched by {} satisfy {}.",
            matched.len(),
            if matched.len() == 1 { "" } else { "s" },
            pattern,
            bounds
        ));
    }

    let preview = violations
        .iter()
        .take(PREVIEW_VIOLATIONS)
        .map(|v| format!("{}:{} (len={})", v.file, v.line, v.length))
        .collect::<Vec<_>>()
        .join(", ");
    CheckOutcome::fail(format!(
        "Found {} line length violation{} for {} ({}). Examples: {}",
        violations.len(),
        if violations.len() == 1 { "" } else { "s" },
        pattern,
        bounds,
        preview
    ))
}

/// Regular files under `root`, as sorted `/`-separated relative paths.
fn walk_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                let name = entry.file_name();
                if !IGNORED_DIRS.iter().any(|ignored| name.to_str() == Some(*ignored)) {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    let parts: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
        }
    }

    files.sort();
    Ok(files)
}
