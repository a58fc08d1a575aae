//! The rebase orchestration engine and its satellites.
//!
//! This module implements the multi-branch state machine that brings a
//! patched chart package forward to a new upstream:
//!
//! - **Branch lifecycle**: all mutation happens on an ephemeral quarantine
//!   branch, with a short-lived staging branch per step holding the freshly
//!   pulled snapshot; the operator's branch is untouched until the final
//!   replay, and both ephemeral branches are removed on every exit path.
//! - **Per-step merge**: each snapshot is squash-merged into quarantine
//!   uncommitted, resolved and validated, then committed.
//! - **Finalization**: the stored patch is regenerated and the upstream
//!   metadata persisted, as automation-authored commits.
//! - **Replay**: the operator-attributable commits of the session are
//!   cherry-picked, in order, onto the original branch.
//!
//! # Key invariants
//!
//! 1. A fatal error before the replay leaves the original branch unmodified;
//!    the blast radius of failure is the disposable branches.
//! 2. Staging and quarantine never outlive one [`engine::Rebase::run`] call.
//! 3. Automation-authored commits (baseline preparation, patch, metadata)
//!    never appear in the replayed commit list.

pub mod backup;
pub mod engine;
pub mod validate;


pub use backup::{Backup, FsBackup, NoopBackup};
pub use engine::{Rebase, RebaseError, RebaseOptions, RebasePhase, RebaseSummary};
pub use validate::{
    default_validators, ChartLinter, HelmLinter, LintValidator, MarkerAbsenceValidator,
    ValidateError, ValidationFailure, Validator, WorktreeScopeValidator,
};

use crate::git::CommitIdentity;

/// The branch on which all rebase mutation happens before folding back.
pub const QUARANTINE_BRANCH: &str = "rebase/quarantine";

/// The disposable branch holding exactly one upstream snapshot per step.
pub const STAGING_BRANCH: &str = "rebase/staging";

/// Fixed hidden top-level directory the optional backup lives under.
pub const BACKUP_DIR: &str = ".rebase-backup";

/// Author name for automation commits; the replay filter keys off it.
pub const AUTOMATION_NAME: &str = "chartshift";

/// Author email for automation commits.
pub const AUTOMATION_EMAIL: &str = "chartshift@localhost";

/// The identity automation commits are created with.
pub fn automation_identity() -> CommitIdentity {
    CommitIdentity::new(AUTOMATION_NAME, AUTOMATION_EMAIL)
}
