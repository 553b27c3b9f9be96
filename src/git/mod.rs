//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **only doorway** to Git. The git plugin reads status,
//! conflicts, and the current branch through [`Git`]; no other module
//! imports `git2`.
//!
//! # Responsibilities
//!
//! - Repository discovery and opening
//! - Status and conflict detection
//! - Current branch lookup
//!
//! # Invariants
//!
//! - Every operation is read-only
//! - No other module calls git2 directly
//!
//! # Example
//!
//! ```ignore
//! use verify_repo::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("."))?;
//! if git.has_conflicts()? {
//!     println!("conflicts on {:?}", git.current_branch()?);
//! }
//! ```

mod interface;

pub use interface::{Git, GitError, StatusEntry, WorktreeStatus};
