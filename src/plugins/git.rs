//! plugins::git
//!
//! Repository state assertions through [`crate::git::Git`].
//!
//! The repository is discovered from the engine root, falling back to the
//! context's working directory. git2 calls are blocking, so every check
//! runs its inspection on the blocking pool.
//!
//! # API
//!
//! ```text
//! git.isClean()
//! git.hasNoConflicts()
//! git.hasStaged("src/lib.rs")
//! git.isOnBranch("main")
//! git.branch("main").isClean()
//! git.branch("main").isCurrent()
//! ```

use std::path::{Component, Path, PathBuf};

use crate::core::types::TestId;
use crate::engine::entry::{max_args, str_arg};
use crate::engine::{
    plugin_fn, Chained, CheckOutcome, DeclarationError, FnPlugin, PluginApi, PluginEntry,
    VerificationContext,
};
use crate::git::{Git, GitError, WorktreeStatus};
use crate::plugins::{meta, outcome};

pub fn plugin() -> FnPlugin {
    plugin_fn(|_options| Ok(PluginApi::new().entrypoint("git", |ctx| Ok(git_entry(ctx)))))
        .named("Git")
        .described("Assert repository cleanliness, conflicts, branches, and staged files.")
        .doc(
            "verify.git.isClean()",
            "Fails if `git status` reports untracked, unstaged, or staged changes.",
        )
        .doc(
            "verify.git.hasNoConflicts()",
            "Ensures there are no files listed in `git status --short` as conflicted.",
        )
        .doc(
            "verify.git.hasStaged(\"<path>\")",
            "Asserts that the given file is staged (non-empty index status).",
        )
        .doc(
            "verify.git.isOnBranch(\"<branch>\")",
            "Checks that the current HEAD is on the expected branch.",
        )
        .doc(
            "verify.git.branch(\"<branch>\").isClean()",
            "Asserts that the branch is checked out and has no dirty files.",
        )
        .doc(
            "verify.git.branch(\"<branch>\").isCurrent()",
            "Only verifies that the target branch is checked out.",
        )
}

fn git_entry(ctx: VerificationContext) -> PluginEntry {
    PluginEntry::new(ctx)
        .check("isClean", |ctx, args| {
            max_args("isClean", args, 0)?;
            let dir = repo_dir(ctx);
            ctx.register(
                "git status should be clean",
                outcome(move || {
                    inspect(dir.clone(), "Failed to determine git status.".to_string(), |git| {
                        let status = git.worktree_status()?;
                        Ok(if status.is_clean() {
                            CheckOutcome::pass("repository is clean")
                        } else {
                            CheckOutcome::fail(format!(
                                "repository has dirty files:\n{}",
                                dirty_listing(&status)
                            ))
                        })
                    })
                }),
            )
        })
        .check("hasNoConflicts", |ctx, args| {
            max_args("hasNoConflicts", args, 0)?;
            let dir = repo_dir(ctx);
            ctx.register(
                "git should have no conflicts",
                outcome(move || {
                    inspect(dir.clone(), "Failed to inspect git conflicts.".to_string(), |git| {
                        if !git.has_conflicts()? {
                            return Ok(CheckOutcome::pass("no conflicted files"));
                        }
                        let status = git.worktree_status()?;
                        let conflicted: Vec<&str> =
                            status.conflicted().map(|e| e.path.as_str()).collect();
                        Ok(CheckOutcome::fail(format!(
                            "conflicted files detected:\n{}",
                            conflicted.join("\n")
                        )))
                    })
                }),
            )
        })
        .check("hasStaged", |ctx, args| {
            max_args("hasStaged", args, 1)?;
            let path = str_arg("hasStaged", args, 0)?.to_string();
            let dir = repo_dir(ctx);
            let full = ctx.cwd().join(&path);
            ctx.register(
                format!("git should have staged changes for \"{}\"", path),
                outcome(move || {
                    let (path, full) = (path.clone(), full.clone());
                    let failure = format!("Failed to inspect staged status for \"{}\".", path);
                    inspect(dir.clone(), failure, move |git| {
                        let relative = relative_to(git.work_dir()?, &full);
                        let status = git.worktree_status()?;
                        Ok(match status.find(&relative) {
                            None => CheckOutcome::fail(format!(
                                "File \"{}\" not found in git status output.",
                                path
                            )),
                            Some(entry) if entry.is_staged() => CheckOutcome::pass(format!(
                                "\"{}\" is staged with status {}.",
                                path, entry.index
                            )),
                            Some(entry) => CheckOutcome::fail(format!(
                                "\"{}\" is not staged (index status: \"{}\").",
                                path, entry.index
                            )),
                        })
                    })
                }),
            )
        })
        .check("isOnBranch", |ctx, args| {
            max_args("isOnBranch", args, 1)?;
            let branch = str_arg("isOnBranch", args, 0)?.to_string();
            register_is_current(ctx, branch)
        })
        .method("branch", |ctx, args| {
            max_args("branch", args, 1)?;
            let branch = str_arg("branch", args, 0)?.to_string();
            let child = ctx.extend(meta("branch", branch.as_str()))?;
            Ok(Chained::Entry(branch_entry(child, branch)))
        })
}

fn branch_entry(ctx: VerificationContext, branch: String) -> PluginEntry {
    let current = branch.clone();
    PluginEntry::new(ctx)
        .check("isClean", move |ctx, args| {
            max_args("isClean", args, 0)?;
            let dir = repo_dir(ctx);
            let branch = branch.clone();
            ctx.register(
                format!("branch \"{}\" should be current and clean", branch),
                outcome(move || {
                    let branch = branch.clone();
                    let failure = format!("Failed to inspect cleanliness of branch \"{}\".", branch);
                    inspect(dir.clone(), failure, move |git| {
                        let checked_out = git.current_branch()?;
                        if checked_out.as_deref() != Some(branch.as_str()) {
                            return Ok(wrong_branch(&branch, checked_out.as_deref()));
                        }
                        let status = git.worktree_status()?;
                        Ok(if status.is_clean() {
                            CheckOutcome::pass(format!("branch \"{}\" is clean.", branch))
                        } else {
                            CheckOutcome::fail(format!(
                                "branch \"{}\" has dirty files:\n{}",
                                branch,
                                dirty_listing(&status)
                            ))
                        })
                    })
                }),
            )
        })
        .check("isCurrent", move |ctx, args| {
            max_args("isCurrent", args, 0)?;
            register_is_current(ctx, current.clone())
        })
}

fn register_is_current(
    ctx: &VerificationContext,
    branch: String,
) -> Result<TestId, DeclarationError> {
    let dir = repo_dir(ctx);
    ctx.register(
        format!("git should be on branch \"{}\"", branch),
        outcome(move || {
            let branch = branch.clone();
            inspect(
                dir.clone(),
                "Failed to read current git branch.".to_string(),
                move |git| {
                    let checked_out = git.current_branch()?;
                    Ok(if checked_out.as_deref() == Some(branch.as_str()) {
                        CheckOutcome::pass(format!("checked-out branch is \"{}\".", branch))
                    } else {
                        wrong_branch(&branch, checked_out.as_deref())
                    })
                },
            )
        }),
    )
}

fn wrong_branch(expected: &str, actual: Option<&str>) -> CheckOutcome {
    CheckOutcome::fail(format!(
        "expected branch \"{}\" but was on \"{}\".",
        expected,
        actual.unwrap_or("unknown")
    ))
}

fn repo_dir(ctx: &VerificationContext) -> PathBuf {
    ctx.root().map(Path::to_path_buf).unwrap_or_else(|| ctx.cwd())
}

/// Open the repository at `dir` on the blocking pool and run `inspect`.
async fn inspect<F>(dir: PathBuf, failure: String, inspect: F) -> CheckOutcome
where
    F: FnOnce(&Git) -> Result<CheckOutcome, GitError> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let git = Git::open(&dir)?;
        inspect(&git)
    })
    .await;

    match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => CheckOutcome::fail_with(failure, err),
        Err(err) => CheckOutcome::fail_with(failure, err),
    }
}

fn dirty_listing(status: &WorktreeStatus) -> String {
    status
        .entries
        .iter()
        .map(|e| e.short())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `full` relative to the working directory, `/`-separated.
///
/// Falls back to canonical paths when the two spellings differ (symlinked
/// temp dirs), and to `full` itself when it lies outside the repository.
fn relative_to(work_dir: &Path, full: &Path) -> String {
    let full = normalize(full);
    let relative = full
        .strip_prefix(work_dir)
        .map(Path::to_path_buf)
        .or_else(|_| {
            let work_dir = work_dir.canonicalize().unwrap_or_else(|_| work_dir.to_path_buf());
            canonical_lenient(&full)
                .strip_prefix(&work_dir)
                .map(Path::to_path_buf)
        })
        .unwrap_or(full);

    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonicalize the parent directory, keeping a possibly deleted file name.
fn canonical_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Lexically resolve `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_use_forward_slashes() {
        let work = Path::new("/repo/");
        assert_eq!(relative_to(work, Path::new("/repo/src/./lib.rs")), "src/lib.rs");
        assert_eq!(relative_to(work, Path::new("/repo/docs/../a.md")), "a.md");
    }

    #[test]
    fn wrong_branch_message() {
        assert_eq!(
            wrong_branch("main", None).message,
            "expected branch \"main\" but was on \"unknown\"."
        );
        assert_eq!(
            wrong_branch("main", Some("dev")).message,
            "expected branch \"main\" but was on \"dev\"."
        );
    }
}
