//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module is the **single doorway** to Git. The git plugin reads
//! repository state exclusively through [`Git`]; no other module imports
//! `git2`.
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: Not inside a Git repository
//! - [`GitError::BareRepo`]: Repository has no working directory
//! - [`GitError::Internal`]: Anything git2 reported
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("."))?;
//! let status = git.worktree_status()?;
//! println!("clean: {}", status.is_clean());
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not inside a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was searched
        path: PathBuf,
    },

    /// Repository is bare (no working directory).
    #[error("bare repository not supported")]
    BareRepo,

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        GitError::Internal {
            message: err.message().to_string(),
        }
    }
}

/// One path reported by `git status`, in porcelain short form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Path relative to the working directory, `/`-separated.
    pub path: String,
    /// Index column: `M`, `A`, `D`, `R`, `T`, `?`, or space.
    pub index: char,
    /// Worktree column: `M`, `D`, `R`, `T`, `?`, or space.
    pub worktree: char,
    pub conflicted: bool,
}

impl StatusEntry {
    /// Whether the index holds a change for this path.
    pub fn is_staged(&self) -> bool {
        self.index != ' ' && self.index != '?'
    }

    /// `XY path`, as `git status --short` prints it.
    pub fn short(&self) -> String {
        format!("{}{} {}", self.index, self.worktree, self.path)
            .trim()
            .to_string()
    }
}

/// Summary of working tree status, untracked files included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    pub entries: Vec<StatusEntry>,
}

impl WorktreeStatus {
    /// No staged, unstaged, untracked, or conflicted paths.
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn conflicted(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| e.conflicted)
    }

    pub fn find(&self, path: &str) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// The Git interface.
///
/// Read-only: the git plugin only inspects repository state.
pub struct Git {
    /// The underlying git2 repository
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    /// Open a repository at the given path.
    ///
    /// Uses `git2::Repository::discover`, so `path` can be any directory
    /// within the repository.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if no repository is found
    /// - [`GitError::BareRepo`] if the repository has no working directory
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::discover(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;

        if repo.is_bare() {
            return Err(GitError::BareRepo);
        }

        Ok(Self { repo })
    }

    /// Path to the working directory.
    pub fn work_dir(&self) -> Result<&Path, GitError> {
        self.repo.workdir().ok_or(GitError::BareRepo)
    }

    /// Check if there are unresolved conflicts in the index.
    pub fn has_conflicts(&self) -> Result<bool, GitError> {
        Ok(self.repo.index()?.has_conflicts())
    }

    /// Working tree status, including untracked files.
    pub fn worktree_status(&self) -> Result<WorktreeStatus, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;

        let entries = statuses
            .iter()
            .filter_map(|entry| {
                let path = entry.path()?.to_string();
                Some(status_entry(path, entry.status()))
            })
            .collect();

        Ok(WorktreeStatus { entries })
    }

    /// Get the current branch name, if on a branch.
    ///
    /// An unborn branch (fresh repository) reports its configured name;
    /// a detached HEAD returns `None`.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                return Ok(self.unborn_branch_name());
            }
            Err(e) => return Err(e.into()),
        };

        if head.is_branch() {
            return Ok(head.shorthand().map(str::to_string));
        }

        Ok(None)
    }

    fn unborn_branch_name(&self) -> Option<String> {
        let head = self.repo.find_reference("HEAD").ok()?;
        let target = head.symbolic_target()?;
        target.strip_prefix("refs/heads/").map(str::to_string)
    }
}

fn status_entry(path: String, status: git2::Status) -> StatusEntry {
    if status.is_conflicted() {
        return StatusEntry {
            path,
            index: 'U',
            worktree: 'U',
            conflicted: true,
        };
    }
    if status.is_wt_new() && !status.intersects(index_flags()) {
        return StatusEntry {
            path,
            index: '?',
            worktree: '?',
            conflicted: false,
        };
    }

    let index = if status.is_index_new() {
        'A'
    } else if status.is_index_modified() {
        'M'
    } else if status.is_index_deleted() {
        'D'
    } else if status.is_index_renamed() {
        'R'
    } else if status.is_index_typechange() {
        'T'
    } else {
        ' '
    };

    let worktree = if status.is_wt_modified() {
        'M'
    } else if status.is_wt_deleted() {
        'D'
    } else if status.is_wt_renamed() {
        'R'
    } else if status.is_wt_typechange() {
        'T'
    } else {
        ' '
    };

    StatusEntry {
        path,
        index,
        worktree,
        conflicted: false,
    }
}

fn index_flags() -> git2::Status {
    git2::Status::INDEX_NEW
        | git2::Status::INDEX_MODIFIED
        | git2::Status::INDEX_DELETED
        | git2::Status::INDEX_RENAMED
        | git2::Status::INDEX_TYPECHANGE
}
