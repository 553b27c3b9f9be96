//! Integration tests for the git doorway and the Git plugin.
//!
//! These tests use real git repositories created via tempfile and the
//! `git` CLI, then inspect them through `Git` and through declared checks.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use verify_repo::core::types::{Metadata, RunSummary, TestStatus};
use verify_repo::engine::{Arg, EngineConfig, RepoVerificationEngine};
use verify_repo::git::{Git, GitError};
use verify_repo::plugins;

// =============================================================================
// Test Fixtures
// =============================================================================

/// Test fixture that creates a real git repository.
struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Create a new test repository with an initial commit on main.
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");

        run_git(dir.path(), &["init", "-b", "main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);

        std::fs::write(dir.path().join("README.md"), "# Test Repo\n").unwrap();
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "-m", "Initial commit"]);

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn git(&self) -> Git {
        Git::open(self.path()).expect("failed to open test repo")
    }

    fn write(&self, path: &str, content: &str) {
        std::fs::write(self.path().join(path), content).unwrap();
    }

    fn engine(&self) -> RepoVerificationEngine {
        RepoVerificationEngine::new(EngineConfig {
            plugins: plugins::builtin(),
            root: Some(self.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap()
    }
}

/// Run a git command in the given directory.
fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git {:?} failed", args);
}

/// Declare `verify.git.<check>(args)` on `engine`.
fn git_check(engine: &RepoVerificationEngine, check: &str, args: &[Arg]) {
    engine
        .entrypoint("git", Metadata::new())
        .unwrap()
        .invoke(check, args)
        .unwrap();
}

/// Declare `verify.git.branch(name).<check>()` on `engine`.
fn branch_check(engine: &RepoVerificationEngine, name: &str, check: &str) {
    engine
        .entrypoint("git", Metadata::new())
        .unwrap()
        .invoke("branch", &[name.into()])
        .unwrap()
        .into_entry(check)
        .unwrap()
        .invoke(check, &[])
        .unwrap();
}

fn message(summary: &RunSummary, index: usize) -> &str {
    summary.results[index].message.as_deref().unwrap_or_default()
}

// =============================================================================
// Git doorway
// =============================================================================

#[test]
fn open_reports_branch_and_clean_status() {
    let repo = TestRepo::new();
    let git = repo.git();

    assert_eq!(git.current_branch().unwrap().as_deref(), Some("main"));
    assert!(git.worktree_status().unwrap().is_clean());
    assert!(!git.has_conflicts().unwrap());
}

#[test]
fn status_lists_untracked_and_staged_files() {
    let repo = TestRepo::new();
    repo.write("new.txt", "new\n");
    repo.write("README.md", "# Changed\n");
    run_git(repo.path(), &["add", "README.md"]);

    let status = repo.git().worktree_status().unwrap();

    let untracked = status.find("new.txt").unwrap();
    assert_eq!(untracked.short(), "?? new.txt");
    assert!(!untracked.is_staged());
    let staged = status.find("README.md").unwrap();
    assert_eq!(staged.index, 'M');
    assert!(staged.is_staged());
}

#[test]
fn unborn_branch_has_a_name() {
    let dir = TempDir::new().unwrap();
    run_git(dir.path(), &["init", "-b", "trunk"]);

    let git = Git::open(dir.path()).unwrap();
    assert_eq!(git.current_branch().unwrap().as_deref(), Some("trunk"));
}

#[test]
fn detached_head_has_no_branch() {
    let repo = TestRepo::new();
    run_git(repo.path(), &["checkout", "--detach"]);

    assert_eq!(repo.git().current_branch().unwrap(), None);
}

#[test]
fn open_outside_repository_fails() {
    let dir = TempDir::new().unwrap();
    let result = Git::open(dir.path());
    assert!(matches!(result, Err(GitError::NotARepo { .. })));
}

// =============================================================================
// Git plugin
// =============================================================================

#[tokio::test]
async fn clean_repository_passes_every_check() {
    let repo = TestRepo::new();
    let engine = repo.engine();
    git_check(&engine, "isClean", &[]);
    git_check(&engine, "hasNoConflicts", &[]);
    git_check(&engine, "isOnBranch", &["main".into()]);
    branch_check(&engine, "main", "isCurrent");
    branch_check(&engine, "main", "isClean");

    let summary = engine.run(None).await.unwrap();

    assert_eq!(summary.passed, 5, "{:#?}", summary.results);
    assert_eq!(message(&summary, 0), "repository is clean");
    assert_eq!(message(&summary, 2), "checked-out branch is \"main\".");
    assert_eq!(message(&summary, 4), "branch \"main\" is clean.");
}

#[tokio::test]
async fn dirty_repository_lists_files() {
    let repo = TestRepo::new();
    repo.write("scratch.txt", "x\n");
    let engine = repo.engine();
    git_check(&engine, "isClean", &[]);
    branch_check(&engine, "main", "isClean");

    let summary = engine.run(None).await.unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(message(&summary, 0), "repository has dirty files:\n?? scratch.txt");
    assert_eq!(
        message(&summary, 1),
        "branch \"main\" has dirty files:\n?? scratch.txt"
    );
}

#[tokio::test]
async fn staged_checks_resolve_paths_against_the_root() {
    let repo = TestRepo::new();
    repo.write("staged.txt", "a\n");
    repo.write("loose.txt", "b\n");
    run_git(repo.path(), &["add", "staged.txt"]);
    let engine = repo.engine();
    git_check(&engine, "hasStaged", &["staged.txt".into()]);
    git_check(&engine, "hasStaged", &["loose.txt".into()]);
    git_check(&engine, "hasStaged", &["absent.txt".into()]);

    let summary = engine.run(None).await.unwrap();

    assert_eq!(summary.results[0].status, TestStatus::Passed);
    assert_eq!(message(&summary, 0), "\"staged.txt\" is staged with status A.");
    assert_eq!(message(&summary, 1), "\"loose.txt\" is not staged (index status: \"?\").");
    assert_eq!(message(&summary, 2), "File \"absent.txt\" not found in git status output.");
}

#[tokio::test]
async fn wrong_branch_fails() {
    let repo = TestRepo::new();
    run_git(repo.path(), &["checkout", "-b", "feature"]);
    let engine = repo.engine();
    git_check(&engine, "isOnBranch", &["main".into()]);
    branch_check(&engine, "main", "isClean");

    let summary = engine.run(None).await.unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(
        message(&summary, 0),
        "expected branch \"main\" but was on \"feature\"."
    );
    assert_eq!(message(&summary, 0), message(&summary, 1));
}

#[tokio::test]
async fn outside_a_repository_is_a_check_failure() {
    let dir = TempDir::new().unwrap();
    let engine = RepoVerificationEngine::new(EngineConfig {
        plugins: plugins::builtin(),
        root: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();
    git_check(&engine, "isClean", &[]);

    let summary = engine.run(None).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(message(&summary, 0), "Failed to determine git status.");
    let error = summary.results[0].error.as_deref().unwrap();
    assert!(error.starts_with("not a git repository: "), "{}", error);
}
