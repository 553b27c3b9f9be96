//! loader
//!
//! Discovery and evaluation of verify files.
//!
//! # Overview
//!
//! A verify file is a list of `verify.…` chains (see [`parser`]). Loading a
//! file evaluates every chain against an engine inside that file's scope,
//! so contexts resolve relative paths against the file's directory and
//! every declared check records the file as its source.
//!
//! After each statement the loader calls
//! [`RepoVerificationEngine::finalize_pending`]: a chain that ends without
//! scheduling a check is reported at its own line.
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::loader;
//!
//! let files = loader::discover(root, &["**/*.verify".into()], &[])?;
//! for file in &files {
//!     loader::load_file(&engine, file)?;
//! }
//! ```

pub mod parser;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::core::types::Metadata;
use crate::engine::{Chained, DeclarationError, RepoVerificationEngine, RESERVED_ENTRYPOINT};
use parser::{Segment, Statement};

/// Verify-file patterns used when none are configured.
pub const DEFAULT_PATTERNS: &[&str] = &["**/*.verify"];

/// Paths never searched for verify files.
pub const DEFAULT_IGNORE: &[&str] = &[
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.git/**",
];

/// Errors from discovering or loading verify files.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A discovery or ignore pattern is not a valid glob.
    #[error("invalid pattern \"{pattern}\": {message}")]
    Pattern { pattern: String, message: String },

    /// Failed to read a verify file or walk a directory.
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Syntax error.
    #[error("{}:{line}:{column}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    /// A statement parsed but could not be declared.
    #[error("{}:{line}: invalid declaration", path.display())]
    Declaration {
        path: PathBuf,
        line: usize,
        #[source]
        source: DeclarationError,
    },
}

/// Default patterns as owned strings.
pub fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect()
}

/// Default ignore patterns as owned strings.
pub fn default_ignore() -> Vec<String> {
    DEFAULT_IGNORE.iter().map(|p| p.to_string()).collect()
}

/// Find verify files under `root`.
///
/// Patterns are relative to `root`. A file matching any ignore pattern
/// (tested against its `/`-separated path relative to `root`) is skipped.
/// The result is deduplicated and sorted.
pub fn discover(root: &Path, patterns: &[String], ignore: &[String]) -> Result<Vec<PathBuf>, LoadError> {
    let ignore = ignore
        .iter()
        .map(|pattern| {
            glob::Pattern::new(pattern).map_err(|err| LoadError::Pattern {
                pattern: pattern.clone(),
                message: err.msg.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let full = format!("{}/{}", escaped_root.trim_end_matches('/'), pattern);
        let entries = glob::glob(&full).map_err(|err| LoadError::Pattern {
            pattern: pattern.clone(),
            message: err.msg.to_string(),
        })?;

        for entry in entries {
            let path = entry.map_err(|err| LoadError::Io {
                path: err.path().to_path_buf(),
                source: err.into_error(),
            })?;
            if !path.is_file() {
                continue;
            }
            let relative = relative_slash_path(root, &path);
            if ignore.iter().any(|p| p.matches(&relative)) {
                debug!(path = %relative, "ignoring verify file");
                continue;
            }
            found.insert(path);
        }
    }

    Ok(found.into_iter().collect())
}

/// Read and evaluate one verify file. Returns the number of checks declared.
pub fn load_file(engine: &RepoVerificationEngine, path: &Path) -> Result<usize, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_source(engine, &source, path)
}

/// Evaluate verify-file text as if it were read from `path`.
pub fn load_source(
    engine: &RepoVerificationEngine,
    source: &str,
    path: &Path,
) -> Result<usize, LoadError> {
    let statements = parser::parse(source).map_err(|err| LoadError::Parse {
        path: path.to_path_buf(),
        line: err.line,
        column: err.column,
        message: err.message,
    })?;

    let before = engine.planned_tests();
    engine.with_file_scope(Some(path.to_path_buf()), || {
        for statement in &statements {
            let declared = evaluate(engine, statement).and_then(|()| engine.finalize_pending());
            if let Err(source) = declared {
                // Discard contexts left behind by the failed chain.
                if let Err(extra) = engine.finalize_pending() {
                    debug!(error = %extra, "discarded unfinished contexts");
                }
                return Err(LoadError::Declaration {
                    path: path.to_path_buf(),
                    line: statement.line,
                    source,
                });
            }
        }
        Ok(())
    })?;

    let declared = engine.planned_tests() - before;
    debug!(path = %path.display(), declared, "loaded verify file");
    Ok(declared)
}

/// Evaluate one chain against `engine`.
///
/// Leading `with({...})` segments merge metadata; the next segment names
/// the entrypoint. Later segments are property reads without parentheses
/// and member calls with them.
pub fn evaluate(engine: &RepoVerificationEngine, statement: &Statement) -> Result<(), DeclarationError> {
    let mut segments = statement.segments.iter().peekable();
    let mut metadata = Metadata::new();

    while let Some(segment) = segments.next_if(|s| s.name == RESERVED_ENTRYPOINT) {
        metadata.extend(with_metadata(segment)?);
    }

    let Some(first) = segments.next() else {
        return Err(DeclarationError::invalid_args(
            RESERVED_ENTRYPOINT,
            "expected a plugin entrypoint after with(...)",
        ));
    };

    let entry = engine.entrypoint(&first.name, metadata)?;
    let mut chained = match &first.args {
        Some(args) => entry.call(args)?,
        None => Chained::Entry(entry),
    };

    for segment in segments {
        let entry = chained.into_entry(&segment.name)?;
        chained = match &segment.args {
            Some(args) => entry.invoke(&segment.name, args)?,
            None => Chained::Entry(entry.get(&segment.name)?),
        };
    }
    Ok(())
}

fn with_metadata(segment: &Segment) -> Result<Metadata, DeclarationError> {
    let args = segment.args.as_deref().unwrap_or_default();
    match args {
        [arg] => match arg.to_json() {
            serde_json::Value::Object(map) if arg.as_options().is_some() => Ok(map),
            _ => Err(DeclarationError::invalid_args(
                RESERVED_ENTRYPOINT,
                format!("metadata must be an object, got {}", arg.kind()),
            )),
        },
        _ => Err(DeclarationError::invalid_args(
            RESERVED_ENTRYPOINT,
            "expected exactly one metadata object",
        )),
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::plugins;
    use tempfile::TempDir;

    fn engine(root: &Path) -> RepoVerificationEngine {
        RepoVerificationEngine::new(EngineConfig {
            plugins: plugins::builtin(),
            root: Some(root.to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn discover_sorts_and_ignores() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.verify", "");
        write(dir.path(), "a/nested.verify", "");
        write(dir.path(), "node_modules/pkg/skip.verify", "");
        write(dir.path(), "notes.txt", "");

        let files = discover(dir.path(), &default_patterns(), &default_ignore()).unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|p| relative_slash_path(dir.path(), p))
            .collect();

        assert_eq!(relative, vec!["a/nested.verify", "b.verify"]);
    }

    #[test]
    fn discover_dedupes_overlapping_patterns() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "x.verify", "");
        let patterns = vec!["*.verify".to_string(), "**/*.verify".to_string()];

        let files = discover(dir.path(), &patterns, &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn invalid_ignore_pattern() {
        let dir = TempDir::new().unwrap();
        let err = discover(dir.path(), &default_patterns(), &["[".to_string()]).unwrap_err();
        assert!(matches!(err, LoadError::Pattern { .. }));
    }

    #[test]
    fn statements_declare_with_file_source() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "pkg/checks.verify",
            "verify.file(\"a\").exists();\nverify.with({ team: \"core\" }).dir(\"b\").not.exists();",
        );
        let engine = engine(dir.path());

        assert_eq!(load_file(&engine, &path).unwrap(), 2);
        let definitions = engine.definitions();
        assert!(definitions.iter().all(|d| d.source.as_deref() == Some(path.as_path())));
        assert_eq!(engine.active_source(), None);
    }

    #[test]
    fn chain_without_check_reports_line() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path());
        let source = "verify.file(\"a\").exists();\n\nverify.file(\"b\");\n";

        let err = load_source(&engine, source, Path::new("x.verify")).unwrap_err();
        match err {
            LoadError::Declaration { line, source, .. } => {
                assert_eq!(line, 3);
                assert!(matches!(source, DeclarationError::MissingCheck { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn double_check_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path());
        let statement = &parser::parse("verify.git.isClean().hasNoConflicts()").unwrap()[0];

        let err = evaluate(&engine, statement).unwrap_err();
        assert!(matches!(err, DeclarationError::ChainAfterCheck { .. }));
    }

    #[test]
    fn with_requires_object() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path());
        let statement = &parser::parse("verify.with(\"x\").file(\"a\").exists()").unwrap()[0];

        let err = evaluate(&engine, statement).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments for with: metadata must be an object, got string"
        );
    }

    #[test]
    fn parse_errors_carry_path() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path());
        let err = load_source(&engine, "verify.file(", Path::new("bad.verify")).unwrap_err();
        assert!(err.to_string().starts_with("bad.verify:1:13:"));
    }
}
