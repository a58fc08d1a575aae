//! The rebase orchestration engine.
//!
//! One engine instance runs one rebase: preflight, quarantine preparation,
//! the per-step merge/resolve/validate loop, finalization, and the final
//! cherry-pick replay onto the original branch. The engine is the sole
//! mutator of the working tree and the ephemeral branches, and it enforces
//! ordering by never starting a step before the previous step's commit has
//! landed.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::git::{CommitId, CommitIdentity, GitError, SquashOutcome, Workspace};
use crate::iter::{IterError, Step, StepIter};
use crate::package::{Package, PackageError};
use crate::puller::PullError;
use crate::resolve::{Resolution, ResolveError, Resolver, ShellResolver};
use crate::upstream::UpstreamRef;

use super::backup::{backup_destination, Backup, FsBackup, NoopBackup};
use super::validate::{default_validators, ValidateError, Validator};
use super::{automation_identity, AUTOMATION_NAME, BACKUP_DIR, QUARANTINE_BRANCH, STAGING_BRANCH};

/// Where the state machine currently is. `Aborted` and `Failed` are
/// reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebasePhase {
    NotStarted,
    Preparing,
    Merging,
    Resolving,
    Validating,
    Finalizing,
    Replaying,
    Done,
    Aborted,
    Failed,
}

/// Errors terminating a rebase.
#[derive(Debug, Error)]
pub enum RebaseError {
    /// An engine instance runs exactly one rebase.
    #[error("rebase already ran (phase: {phase:?}); create a new engine")]
    AlreadyRan { phase: RebasePhase },

    /// Precondition: the worktree must be clean before any mutation.
    #[error("charts worktree is not clean; commit or stash changes first")]
    DirtyWorktree,

    /// The package declares no chart working directory.
    #[error("package declares no chart working directory")]
    NoChartDirs,

    /// A rebase that traverses nothing is a bug, not a success.
    #[error("step iterator produced no steps; a no-op rebase is a bug")]
    NoSteps,

    /// Nothing operator-attributable was committed during the session.
    #[error("no commits to replay onto the original branch")]
    NothingToReplay,

    /// The resolver deliberately abandoned the rebase. Distinct from
    /// failure: in-progress quarantine changes were discarded first.
    #[error("rebase aborted by resolver")]
    Aborted,

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Iter(#[from] IterError),

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A validator failed fatally (recoverable failures loop back into
    /// resolution and never surface here).
    #[error(transparent)]
    Validate(#[from] ValidateError),
}

/// Behavioral configuration for one rebase.
pub struct RebaseOptions {
    /// Conflict resolution strategy; defaults to the interactive shell.
    pub resolver: Option<Box<dyn Resolver>>,

    /// Validator pipeline; `None` selects the standard pipeline, an
    /// explicit empty vector disables validation entirely.
    pub validators: Option<Vec<Box<dyn Validator>>>,

    /// Refresh a best-effort backup of the chart working directories after
    /// each step.
    pub enable_backup: bool,

    /// Identity for the operator-attributable step commits; `None` uses
    /// the repository's own configuration.
    pub committer: Option<CommitIdentity>,
}

impl Default for RebaseOptions {
    fn default() -> Self {
        RebaseOptions {
            resolver: None,
            validators: None,
            enable_backup: false,
            committer: None,
        }
    }
}

/// What a completed rebase did.
#[derive(Debug, Clone)]
pub struct RebaseSummary {
    /// Upstream snapshots traversed.
    pub steps: usize,

    /// Commits replayed onto the original branch.
    pub replayed: usize,

    /// The reference the package is now based on.
    pub reference: UpstreamRef,
}

/// Orchestrates one rebase of one package. Single caller, single in-flight
/// rebase per instance.
pub struct Rebase {
    package: Box<dyn Package>,
    workspace: Workspace,
    steps: Box<dyn StepIter>,
    resolver: Box<dyn Resolver>,
    validators: Vec<Box<dyn Validator>>,
    backup_enabled: bool,
    committer: Option<CommitIdentity>,
    phase: RebasePhase,
}

impl Rebase {
    pub fn new(
        package: Box<dyn Package>,
        workspace: Workspace,
        steps: Box<dyn StepIter>,
        options: RebaseOptions,
    ) -> Self {
        let resolver = options
            .resolver
            .unwrap_or_else(|| Box::new(ShellResolver::new(package.tracked_paths())));
        let validators = options.validators.unwrap_or_else(default_validators);

        Rebase {
            package,
            workspace,
            steps,
            resolver,
            validators,
            backup_enabled: options.enable_backup,
            committer: options.committer,
            phase: RebasePhase::NotStarted,
        }
    }

    /// The phase the engine is in (or ended in).
    pub fn phase(&self) -> RebasePhase {
        self.phase
    }

    /// Run the rebase to completion.
    ///
    /// On every exit path (success, failure or abort) the ephemeral
    /// branches are removed and the original branch is checked out again.
    /// A fatal error before the replay leaves the original branch
    /// unmodified.
    pub fn run(&mut self) -> Result<RebaseSummary, RebaseError> {
        if self.phase != RebasePhase::NotStarted {
            return Err(RebaseError::AlreadyRan { phase: self.phase });
        }

        let (original_branch, session_start) = match self.preflight() {
            Ok(state) => state,
            Err(err) => {
                self.phase = RebasePhase::Failed;
                return Err(err);
            }
        };

        info!(branch = %original_branch, start = %session_start, "starting rebase");
        let result = self.run_inner(&original_branch, &session_start);
        self.teardown(&original_branch);

        match result {
            Ok(summary) => {
                self.phase = RebasePhase::Done;
                info!(
                    steps = summary.steps,
                    replayed = summary.replayed,
                    reference = %summary.reference,
                    "rebase complete"
                );
                Ok(summary)
            }
            Err(err) => {
                self.phase = if matches!(err, RebaseError::Aborted) {
                    RebasePhase::Aborted
                } else {
                    RebasePhase::Failed
                };
                Err(err)
            }
        }
    }

    /// Fail fast, before any mutation.
    fn preflight(&self) -> Result<(String, CommitId), RebaseError> {
        let original_branch = self.workspace.current_branch()?;

        if !self.workspace.is_clean_except(&[BACKUP_DIR])? {
            return Err(RebaseError::DirtyWorktree);
        }

        let session_start = self.workspace.rev_parse("HEAD")?;
        Ok((original_branch, session_start))
    }

    fn run_inner(
        &mut self,
        original_branch: &str,
        session_start: &CommitId,
    ) -> Result<RebaseSummary, RebaseError> {
        self.phase = RebasePhase::Preparing;
        self.workspace
            .create_branch(QUARANTINE_BRANCH, session_start)?;
        self.workspace.checkout(QUARANTINE_BRANCH)?;

        info!("preparing package");
        self.package.prepare()?;
        let tracked = tracked_strings(self.package.as_ref());
        self.workspace.commit_paths(
            "prepare package charts",
            &as_refs(&tracked),
            Some(&automation_identity()),
            true,
        )?;

        let mut backup: Box<dyn Backup> = if self.backup_enabled {
            let sources: Vec<PathBuf> = self
                .package
                .chart_dirs()
                .iter()
                .map(|dir| self.workspace.root().join(dir))
                .collect();
            Box::new(FsBackup::new(
                sources,
                backup_destination(self.workspace.root()),
            ))
        } else {
            Box::new(NoopBackup)
        };

        let mut steps_completed = 0usize;
        let mut last_reference: Option<UpstreamRef> = None;

        loop {
            let Some(step) = self.steps.next_step()? else {
                break;
            };

            info!(reference = %step.reference(), "bringing charts to next upstream");
            self.handle_step(&step, session_start)?;

            steps_completed += 1;
            last_reference = Some(step.reference().clone());

            if let Err(err) = backup.refresh() {
                warn!(error = %err, "failed to refresh backup");
            }
        }

        let last = last_reference.ok_or(RebaseError::NoSteps)?;

        self.phase = RebasePhase::Finalizing;
        self.finalize_quarantine(&last)?;

        self.phase = RebasePhase::Replaying;
        let commits = self.workspace.commits_since(session_start)?;
        let picks: Vec<CommitId> = commits
            .into_iter()
            .filter(|(_, author)| author.as_str() != AUTOMATION_NAME)
            .map(|(id, _)| id)
            .collect();
        if picks.is_empty() {
            return Err(RebaseError::NothingToReplay);
        }

        info!(
            count = picks.len(),
            branch = original_branch,
            "replaying session commits onto original branch"
        );
        self.workspace.checkout(original_branch)?;
        self.workspace.cherry_pick(&picks)?;

        self.adopt_finalization(&last)?;

        Ok(RebaseSummary {
            steps: steps_completed,
            replayed: picks.len(),
            reference: last,
        })
    }

    /// One step: stage the snapshot, squash-merge it into quarantine,
    /// resolve and validate if needed, commit. The staging branch never
    /// survives this call.
    fn handle_step(&mut self, step: &Step, session_start: &CommitId) -> Result<(), RebaseError> {
        // Staging starts at the original baseline, not quarantine, so the
        // staged commit is exactly the upstream snapshot.
        self.workspace.delete_branch(STAGING_BRANCH)?;
        self.workspace.create_branch(STAGING_BRANCH, session_start)?;

        let result = self.stage_and_merge(step);

        if let Err(err) = self
            .workspace
            .checkout_force(QUARANTINE_BRANCH)
            .and_then(|_| self.workspace.delete_branch(STAGING_BRANCH))
        {
            warn!(error = %err, "failed to remove staging branch");
        }

        result
    }

    fn stage_and_merge(&mut self, step: &Step) -> Result<(), RebaseError> {
        let reference = step.reference().clone();
        let Some(chart_dir) = self.package.chart_dirs().into_iter().next() else {
            return Err(RebaseError::NoChartDirs);
        };
        let tracked = tracked_strings(self.package.as_ref());

        self.phase = RebasePhase::Merging;
        self.workspace.checkout(STAGING_BRANCH)?;
        step.pull(self.workspace.root(), &chart_dir)?;
        self.workspace.commit_paths(
            &format!("save upstream snapshot {}", reference.relevant_change()),
            &as_refs(&tracked),
            Some(&automation_identity()),
            true,
        )?;

        self.workspace.checkout(QUARANTINE_BRANCH)?;
        let outcome = self.workspace.squash_merge(STAGING_BRANCH)?;

        let needs_resolution = match &outcome {
            SquashOutcome::Conflicted { files } => {
                info!(conflicts = files.len(), "merge left conflicts, running resolver");
                true
            }
            SquashOutcome::Merged | SquashOutcome::UpToDate => self
                .workspace
                .status()?
                .iter()
                .any(|entry| entry.has_unstaged()),
        };

        if needs_resolution {
            self.resolve_loop()?;
        }

        self.workspace.commit_paths(
            &format!("bringing charts to {}", reference.relevant_change()),
            &as_refs(&tracked),
            self.committer.as_ref(),
            true,
        )?;
        info!(reference = %reference, "step committed");

        Ok(())
    }

    /// Resolve, then validate; a recoverable validation failure re-enters
    /// the resolver. Deliberately unbounded: the interactive resolver is
    /// bounded by operator patience, and capping an automated strategy
    /// would hide a permanently failing validator instead of surfacing it
    /// in the logs.
    fn resolve_loop(&mut self) -> Result<(), RebaseError> {
        let mut attempt = 0u32;

        'resolve: loop {
            attempt += 1;
            if attempt > 1 {
                warn!(attempt, "re-entering resolver after failed validation");
            }

            self.phase = RebasePhase::Resolving;
            match self.resolver.resolve(&self.workspace)? {
                Resolution::Resolved => {}
                Resolution::Abort => {
                    warn!("resolver requested abort; discarding in-progress changes");
                    self.workspace.hard_reset()?;
                    return Err(RebaseError::Aborted);
                }
            }

            self.phase = RebasePhase::Validating;
            for validator in &self.validators {
                match validator.validate(self.package.as_ref(), &self.workspace) {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => {
                        tracing::error!(validator = validator.name(), error = %err, "failed validation");
                        continue 'resolve;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            info!("worktree has passed all validators");
            break;
        }

        info!("all conflicts resolved");
        Ok(())
    }

    /// Persist the last reference and regenerate the patch, committed on
    /// quarantine first so any failure here surfaces while the original
    /// branch is still untouched.
    fn finalize_quarantine(&mut self, reference: &UpstreamRef) -> Result<(), RebaseError> {
        info!(reference = %reference, "updating package metadata");
        self.package.set_upstream(reference.clone())?;

        info!("generating patch");
        self.package.generate_patch()?;

        let patch_dir = self.package.patch_dir().to_string_lossy().to_string();
        self.workspace.commit_paths(
            &patch_message(self.package.name(), reference),
            &[patch_dir.as_str()],
            Some(&automation_identity()),
            true,
        )?;

        let metadata = self.package.metadata_path().to_string_lossy().to_string();
        self.workspace.commit_paths(
            METADATA_MESSAGE,
            &[metadata.as_str()],
            Some(&automation_identity()),
            true,
        )?;

        Ok(())
    }

    /// Land the finalization products on the original branch as fresh
    /// automation commits. The quarantine versions are not cherry-picked:
    /// replaying regenerable commits can conflict, and no conflict
    /// resolution happens during replay.
    fn adopt_finalization(&mut self, reference: &UpstreamRef) -> Result<(), RebaseError> {
        let patch_dir = self.package.patch_dir().to_string_lossy().to_string();
        self.workspace
            .checkout_paths_from(QUARANTINE_BRANCH, &[patch_dir.as_str()])?;
        self.workspace.commit_paths(
            &patch_message(self.package.name(), reference),
            &[patch_dir.as_str()],
            Some(&automation_identity()),
            true,
        )?;

        let metadata = self.package.metadata_path().to_string_lossy().to_string();
        self.workspace
            .checkout_paths_from(QUARANTINE_BRANCH, &[metadata.as_str()])?;
        self.workspace.commit_paths(
            METADATA_MESSAGE,
            &[metadata.as_str()],
            Some(&automation_identity()),
            true,
        )?;

        Ok(())
    }

    /// Remove the ephemeral branches and restore the original branch.
    /// Invoked on every exit path; failures are logged, never propagated.
    fn teardown(&mut self, original_branch: &str) {
        if let Err(err) = self.workspace.checkout_force(original_branch) {
            warn!(branch = original_branch, error = %err, "failed to restore original branch");
        }

        for branch in [STAGING_BRANCH, QUARANTINE_BRANCH] {
            if let Err(err) = self.workspace.delete_branch(branch) {
                warn!(branch, error = %err, "failed to delete branch");
            }
        }
    }
}

const METADATA_MESSAGE: &str = "update package.yaml";

fn patch_message(package: &str, reference: &UpstreamRef) -> String {
    format!(
        "update {} to new base {}",
        package,
        reference.relevant_change()
    )
}

fn tracked_strings(package: &dyn Package) -> Vec<String> {
    package
        .tracked_paths()
        .iter()
        .map(|path| path.to_string_lossy().to_string())
        .collect()
}

fn as_refs(paths: &[String]) -> Vec<&str> {
    paths.iter().map(String::as_str).collect()
}
