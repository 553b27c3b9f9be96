//! plugins::package
//!
//! `package.json` dependency assertions.
//!
//! # API
//!
//! ```text
//! package("packages/app").dependencies.includes("react")
//! package("@acme/web").dependencies.notIncludes("lodash")
//! ```
//!
//! # Resolution
//!
//! The target is resolved against [`VerificationContext::cwd`]:
//!
//! 1. An existing path: a `package.json`, a directory containing one, or
//!    any other existing file read as a manifest
//! 2. Otherwise a workspace package name. The nearest ancestor manifest
//!    with a non-empty `workspaces` list (or `workspaces.packages`) is the
//!    monorepo root; its workspace globs are expanded and the first
//!    manifest whose `name` matches wins.
//!
//! Declared dependencies are the union of `dependencies`,
//! `devDependencies`, `peerDependencies`, and `optionalDependencies`.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::core::types::TestId;
use crate::engine::entry::{max_args, str_arg};
use crate::engine::{
    plugin_fn, Arg, Chained, CheckOutcome, DeclarationError, FnPlugin, PluginApi, PluginEntry,
    VerificationContext,
};
use crate::plugins::{meta, outcome};

const MANIFEST: &str = "package.json";

/// Manifest sections that declare dependencies.
pub const DEPENDENCY_SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

/// Directories never searched for workspace manifests.
const IGNORED_DIRS: [&str; 5] = ["node_modules", ".git", "dist", "build", "coverage"];

/// Errors resolving or reading a package manifest.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Could not find package.json at {}", .0.display())]
    MissingManifest(PathBuf),

    #[error("Directory {} does not contain a package.json", .0.display())]
    EmptyDirectory(PathBuf),

    #[error(
        "Could not find a monorepo root with \"workspaces\" in package.json starting from {}.",
        .0.display()
    )]
    NoMonorepoRoot(PathBuf),

    #[error(
        "Could not find workspace package named \"{name}\". Searched workspaces from {} using patterns: {}",
        root.display(),
        patterns.join(", ")
    )]
    UnknownWorkspace {
        name: String,
        root: PathBuf,
        patterns: Vec<String>,
    },

    #[error("invalid workspace pattern \"{pattern}\"")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse JSON at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn plugin() -> FnPlugin {
    plugin_fn(|_options| {
        Ok(PluginApi::new().entrypoint("package", |ctx| Ok(package_root(ctx))))
    })
    .named("Package")
    .described("Assertions for package.json metadata and workspace dependencies.")
    .doc(
        "verify.package(\"<nameOrPath>\").dependencies.includes(\"<dep>\")",
        "Resolves a package by workspace name or relative path (dir or package.json) and passes when the dependency is declared.",
    )
    .doc(
        "verify.package(\"<nameOrPath>\").dependencies.notIncludes(\"<dep>\")",
        "Resolves a package by workspace name or relative path (dir or package.json) and passes when the dependency is not declared.",
    )
}

fn package_root(ctx: VerificationContext) -> PluginEntry {
    PluginEntry::new(ctx).callable(|ctx, args| {
        max_args("package", args, 1)?;
        let target = str_arg("package", args, 0)?.to_string();
        let child = ctx.extend(meta("package", target.as_str()))?;
        Ok(Chained::Entry(package_entry(child, target)))
    })
}

fn package_entry(ctx: VerificationContext, target: String) -> PluginEntry {
    PluginEntry::new(ctx).property("dependencies", move |ctx| {
        Ok(dependencies_entry(ctx.clone(), target.clone()))
    })
}

fn dependencies_entry(ctx: VerificationContext, target: String) -> PluginEntry {
    let excluded = target.clone();
    PluginEntry::new(ctx)
        .check("includes", move |ctx, args| {
            register_dependency(ctx, "includes", args, target.clone(), true)
        })
        .check("notIncludes", move |ctx, args| {
            register_dependency(ctx, "notIncludes", args, excluded.clone(), false)
        })
}

fn register_dependency(
    ctx: &VerificationContext,
    member: &str,
    args: &[Arg],
    target: String,
    expected: bool,
) -> Result<TestId, DeclarationError> {
    max_args(member, args, 1)?;
    let dependency = str_arg(member, args, 0)?.to_string();
    let description = if expected {
        format!("Package \"{}\" should include dependency \"{}\"", target, dependency)
    } else {
        format!("Package \"{}\" should not include dependency \"{}\"", target, dependency)
    };
    let base = ctx.cwd();

    ctx.register(
        description,
        outcome(move || {
            let (base, target, dependency) = (base.clone(), target.clone(), dependency.clone());
            async move { check_dependency(base, target, dependency, expected).await }
        }),
    )
}

async fn check_dependency(
    base: PathBuf,
    target: String,
    dependency: String,
    expected: bool,
) -> CheckOutcome {
    let failure = format!("Failed to inspect dependencies for \"{}\".", target);
    let lookup = target.clone();
    let joined = tokio::task::spawn_blocking(move || load_manifest(&base, &lookup)).await;
    let (path, manifest) = match joined {
        Ok(Ok(found)) => found,
        Ok(Err(err)) => return CheckOutcome::fail_with(failure, err),
        Err(err) => return CheckOutcome::fail_with(failure, err),
    };

    let declared = declared_dependencies(&manifest).contains(&dependency);
    match (expected, declared) {
        (true, true) => CheckOutcome::pass(format!(
            "Package \"{}\" declares \"{}\".",
            target, dependency
        )),
        (true, false) => CheckOutcome::fail(format!(
            "Expected package \"{}\" to declare \"{}\", but it does not. (package.json: {})",
            target,
            dependency,
            path.display()
        )),
        (false, false) => CheckOutcome::pass(format!(
            "Package \"{}\" does not declare \"{}\".",
            target, dependency
        )),
        (false, true) => CheckOutcome::fail(format!(
            "Expected package \"{}\" to not declare \"{}\", but it does. (package.json: {})",
            target,
            dependency,
            path.display()
        )),
    }
}

/// Resolve `name_or_path` from `base` and parse its manifest.
pub fn load_manifest(base: &Path, name_or_path: &str) -> Result<(PathBuf, Value), PackageError> {
    let path = resolve_manifest(base, name_or_path)?;
    let manifest = read_json(&path)?;
    Ok((path, manifest))
}

/// Union of every dependency section's keys.
pub fn declared_dependencies(manifest: &Value) -> BTreeSet<String> {
    DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| manifest.get(section).and_then(Value::as_object))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn resolve_manifest(base: &Path, name_or_path: &str) -> Result<PathBuf, PackageError> {
    let as_path = base.join(name_or_path);
    if as_path.exists() {
        return manifest_at(as_path);
    }

    let (root, workspaces) = find_monorepo_root(base)?;
    find_workspace_manifest(&root, &workspaces, name_or_path)
}

fn manifest_at(path: PathBuf) -> Result<PathBuf, PackageError> {
    if path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST) {
        return if path.is_file() {
            Ok(path)
        } else {
            Err(PackageError::MissingManifest(path))
        };
    }

    if path.is_dir() {
        let manifest = path.join(MANIFEST);
        return if manifest.is_file() {
            Ok(manifest)
        } else {
            Err(PackageError::EmptyDirectory(path))
        };
    }

    Ok(path)
}

/// Walk up from `start` to the first manifest declaring workspaces.
fn find_monorepo_root(start: &Path) -> Result<(PathBuf, Vec<String>), PackageError> {
    for dir in start.ancestors() {
        let manifest = dir.join(MANIFEST);
        if !manifest.is_file() {
            continue;
        }
        // Unparseable manifests are skipped while searching.
        let Ok(json) = read_json(&manifest) else {
            continue;
        };
        let workspaces = workspace_globs(&json);
        if !workspaces.is_empty() {
            return Ok((dir.to_path_buf(), workspaces));
        }
    }
    Err(PackageError::NoMonorepoRoot(start.to_path_buf()))
}

/// `workspaces: [..]` or `workspaces: { packages: [..] }`.
fn workspace_globs(manifest: &Value) -> Vec<String> {
    let list = match manifest.get("workspaces") {
        Some(Value::Array(list)) => list,
        Some(Value::Object(map)) => match map.get("packages") {
            Some(Value::Array(list)) => list,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter()
        .filter_map(Value::as_str)
        .filter(|glob| !glob.is_empty())
        .map(str::to_string)
        .collect()
}

/// `packages/*` → `packages/*/package.json`.
fn manifest_pattern(workspace: &str) -> String {
    let normalized = workspace.replace('\\', "/");
    if normalized.ends_with(MANIFEST) {
        normalized
    } else {
        format!("{}/{}", normalized.trim_end_matches('/'), MANIFEST)
    }
}

fn find_workspace_manifest(
    root: &Path,
    workspaces: &[String],
    name: &str,
) -> Result<PathBuf, PackageError> {
    let patterns: Vec<String> = workspaces.iter().map(|w| manifest_pattern(w)).collect();

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut candidates = BTreeSet::new();
    for pattern in &patterns {
        let full = format!("{}/{}", escaped_root.trim_end_matches('/'), pattern);
        let paths = glob::glob(&full).map_err(|source| PackageError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        for path in paths.flatten() {
            if path.is_file() && !is_ignored(root, &path) {
                candidates.insert(path);
            }
        }
    }

    for candidate in candidates {
        let Ok(json) = read_json(&candidate) else {
            continue;
        };
        if json.get("name").and_then(Value::as_str) == Some(name) {
            return Ok(candidate);
        }
    }

    Err(PackageError::UnknownWorkspace {
        name: name.to_string(),
        root: root.to_path_buf(),
        patterns,
    })
}

fn is_ignored(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| IGNORED_DIRS.iter().any(|ignored| c.as_os_str() == *ignored))
}

fn read_json(path: &Path) -> Result<Value, PackageError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PackageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| PackageError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestStatus;
    use crate::engine::{EngineConfig, RepoVerificationEngine};
    use serde_json::json;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// A monorepo with `packages/web` (named `@acme/web`) and `packages/api`.
    fn monorepo() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{ "name": "root", "workspaces": ["packages/*"] }"#,
        );
        write(
            dir.path(),
            "packages/web/package.json",
            r#"{ "name": "@acme/web", "dependencies": { "react": "^18" }, "devDependencies": { "vite": "^5" } }"#,
        );
        write(
            dir.path(),
            "packages/api/package.json",
            r#"{ "name": "@acme/api", "peerDependencies": { "zod": "^3" } }"#,
        );
        write(
            dir.path(),
            "node_modules/@acme/web/package.json",
            r#"{ "name": "@acme/web", "dependencies": {} }"#,
        );
        dir
    }

    fn engine(root: &Path) -> RepoVerificationEngine {
        RepoVerificationEngine::new(EngineConfig {
            plugins: vec![plugin().into_plugin()],
            root: Some(root.to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }

    fn dependency_check(engine: &RepoVerificationEngine, target: &str, member: &str, dep: &str) {
        engine
            .entrypoint("package", Default::default())
            .unwrap()
            .call(&[target.into()])
            .unwrap()
            .into_entry("package")
            .unwrap()
            .get("dependencies")
            .unwrap()
            .invoke(member, &[dep.into()])
            .unwrap();
    }

    #[test]
    fn declared_dependencies_merge_every_section() {
        let manifest = json!({
            "dependencies": { "a": "1" },
            "devDependencies": { "b": "1" },
            "peerDependencies": { "c": "1" },
            "optionalDependencies": { "d": "1" },
            "bundledDependencies": ["e"],
        });

        let declared: Vec<_> = declared_dependencies(&manifest).into_iter().collect();
        assert_eq!(declared, vec!["a", "b", "c", "d"]);
        assert!(declared_dependencies(&json!({ "dependencies": [] })).is_empty());
    }

    #[test]
    fn workspace_globs_accept_both_shapes() {
        assert_eq!(
            workspace_globs(&json!({ "workspaces": ["apps/*", "", 3] })),
            vec!["apps/*"]
        );
        assert_eq!(
            workspace_globs(&json!({ "workspaces": { "packages": ["libs/*"] } })),
            vec!["libs/*"]
        );
        assert!(workspace_globs(&json!({ "workspaces": "apps/*" })).is_empty());
        assert_eq!(manifest_pattern("apps/*/"), "apps/*/package.json");
        assert_eq!(manifest_pattern("apps\\web\\package.json"), "apps/web/package.json");
    }

    #[test]
    fn resolves_paths_before_workspace_names() {
        let repo = monorepo();
        let root = repo.path();

        assert_eq!(
            resolve_manifest(root, "packages/web").unwrap(),
            root.join("packages/web/package.json")
        );
        assert_eq!(
            resolve_manifest(root, "packages/api/package.json").unwrap(),
            root.join("packages/api/package.json")
        );
        assert_eq!(
            resolve_manifest(root, "@acme/web").unwrap(),
            root.join("packages/web/package.json")
        );
        // Workspace lookup also works from inside a package.
        assert_eq!(
            resolve_manifest(&root.join("packages/api"), "@acme/web").unwrap(),
            root.join("packages/web/package.json")
        );
    }

    #[test]
    fn resolution_errors_explain_themselves() {
        let repo = monorepo();
        let root = repo.path();
        std::fs::create_dir_all(root.join("empty")).unwrap();

        let err = resolve_manifest(root, "empty").unwrap_err();
        assert!(matches!(err, PackageError::EmptyDirectory(_)));

        let err = resolve_manifest(root, "@acme/missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Could not find workspace package named \"@acme/missing\". Searched workspaces from {} using patterns: packages/*/package.json",
                root.display()
            )
        );

        let plain = TempDir::new().unwrap();
        let err = resolve_manifest(plain.path(), "left-pad").unwrap_err();
        assert!(matches!(err, PackageError::NoMonorepoRoot(_)));
    }

    #[tokio::test]
    async fn dependency_checks_pass_and_fail() {
        let repo = monorepo();
        let engine = engine(repo.path());
        dependency_check(&engine, "@acme/web", "includes", "react");
        dependency_check(&engine, "packages/web", "includes", "vite");
        dependency_check(&engine, "@acme/api", "notIncludes", "react");
        dependency_check(&engine, "@acme/api", "includes", "react");
        dependency_check(&engine, "@acme/web", "notIncludes", "react");

        let summary = engine.run(None).await.unwrap();

        let statuses: Vec<_> = summary.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                TestStatus::Passed,
                TestStatus::Passed,
                TestStatus::Passed,
                TestStatus::Failed,
                TestStatus::Failed,
            ]
        );
        assert_eq!(
            summary.results[0].description,
            "Package \"@acme/web\" should include dependency \"react\""
        );
        assert_eq!(
            summary.results[0].message.as_deref(),
            Some("Package \"@acme/web\" declares \"react\".")
        );
        let message = summary.results[3].message.as_deref().unwrap();
        assert!(message.starts_with(
            "Expected package \"@acme/api\" to declare \"react\", but it does not. (package.json: "
        ));
    }

    #[tokio::test]
    async fn unreadable_manifest_fails_with_cause() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "broken/package.json", "{ not json");
        let engine = engine(dir.path());
        dependency_check(&engine, "broken", "includes", "react");

        let summary = engine.run(None).await.unwrap();

        let result = &summary.results[0];
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(
            result.message.as_deref(),
            Some("Failed to inspect dependencies for \"broken\".")
        );
        let error = result.error.as_deref().unwrap();
        assert!(error.starts_with("Failed to parse JSON at "), "{}", error);
        assert!(error.contains("package.json: "), "{}", error);
    }

    #[test]
    fn dependencies_must_be_accessed_before_checking() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path());
        let entry = engine
            .entrypoint("package", Default::default())
            .unwrap()
            .call(&["app".into()])
            .unwrap()
            .into_entry("package")
            .unwrap();

        let err = entry.invoke("includes", &["react".into()]).unwrap_err();
        assert!(matches!(err, DeclarationError::UnknownMember { .. }));
        let _ = engine.finalize_pending();
    }
}
