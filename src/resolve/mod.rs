//! Conflict resolution strategies.
//!
//! After a step's squash merge, the quarantine worktree may hold conflicts.
//! A [`Resolver`] turns that worktree into a consistent, fully staged state,
//! or signals that the rebase should be deliberately abandoned. The engine
//! only ever calls the trait; which strategy runs is chosen at construction.

pub mod shell;
pub mod textual;

use thiserror::Error;

use crate::git::{GitError, Workspace};

pub use shell::ShellResolver;
pub use textual::{Preference, TextualResolver};

/// Errors from a resolution attempt. Distinct from [`Resolution::Abort`],
/// which is a deliberate outcome, not a failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Underlying git failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// IO error (shell spawn, file rewrite).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a resolution attempt decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The worktree is consistent and staged; proceed to validation.
    Resolved,

    /// Abandon the rebase deliberately.
    Abort,
}

/// Turns a conflicted worktree into a consistent one, or signals abort.
pub trait Resolver {
    fn resolve(&self, workspace: &Workspace) -> Result<Resolution, ResolveError>;
}

/// Always signals abort. Deterministic failure for tests and automation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortResolver;

impl Resolver for AbortResolver {
    fn resolve(&self, _workspace: &Workspace) -> Result<Resolution, ResolveError> {
        Ok(Resolution::Abort)
    }
}

/// Stages every changed path unconditionally; the caller trusts whatever
/// the merge produced, conflict markers and all.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlindResolver;

impl Resolver for BlindResolver {
    fn resolve(&self, workspace: &Workspace) -> Result<Resolution, ResolveError> {
        workspace.stage_all()?;
        Ok(Resolution::Resolved)
    }
}
