//! Step iterators: the ordered, finite sequence of upstream snapshots a
//! rebase traverses.
//!
//! A [`Step`] is an opaque handle bound to one upstream reference; the
//! engine consumes each step exactly once by pulling its snapshot into the
//! chart working directory. Two iterator shapes exist:
//!
//! - [`SingleStepIter`]: one final step straight to the target ("direct");
//! - [`incremental::IncrementalIter`]: one step per intervening upstream
//!   revision, computed from upstream history.

pub mod incremental;

use std::path::Path;

use thiserror::Error;

use crate::git::GitError;
use crate::puller::{puller_for, PullError, Puller};
use crate::upstream::{UpstreamDelta, UpstreamRef};

pub use incremental::IncrementalIter;

/// Errors from constructing or advancing a step iterator.
#[derive(Debug, Error)]
pub enum IterError {
    /// Incremental stepping needs to know where the package currently is.
    #[error("incremental stepping requires the current upstream revision")]
    MissingCurrentRevision,

    /// Incremental stepping needs an explicit target revision.
    #[error("incremental stepping requires a target revision")]
    MissingTargetRevision,

    /// Per-revision granularity has no meaning across a subpath change.
    #[error("incremental stepping does not support subpath changes")]
    SubpathChange,

    /// A commit timestamp could not be parsed.
    #[error("unparsable commit timestamp '{value}' for revision {revision}")]
    BadTimestamp {
        revision: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Setting up the upstream clone failed.
    #[error(transparent)]
    Pull(#[from] PullError),

    /// Underlying git failure while enumerating history.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// One upstream snapshot to bring the chart to.
pub struct Step {
    puller: Box<dyn Puller>,
}

impl Step {
    pub fn new(puller: Box<dyn Puller>) -> Self {
        Step { puller }
    }

    /// The snapshot this step is bound to.
    pub fn reference(&self) -> &UpstreamRef {
        self.puller.reference()
    }

    /// Materialize the snapshot into `root`/`chart_dir`.
    pub fn pull(&self, root: &Path, chart_dir: &Path) -> Result<(), PullError> {
        self.puller.pull(&root.join(chart_dir))
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("reference", self.reference())
            .finish()
    }
}

/// Lazy, ordered, finite sequence of steps.
pub trait StepIter {
    /// The next step, or `None` when the sequence is exhausted.
    fn next_step(&mut self) -> Result<Option<Step>, IterError>;
}

/// How to traverse from the current reference to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// One final step straight to the target.
    Direct,

    /// One step per intervening upstream revision.
    Incremental,
}

/// Build the iterator for a traversal from `current` under `delta`.
pub fn step_iter_for(
    current: &UpstreamRef,
    delta: &UpstreamDelta,
    mode: StepMode,
) -> Result<Box<dyn StepIter>, IterError> {
    match mode {
        StepMode::Direct => Ok(Box::new(SingleStepIter::new(current, delta))),
        StepMode::Incremental => Ok(Box::new(IncrementalIter::new(current, delta)?)),
    }
}

/// Yields exactly one step: the current reference with the delta applied.
pub struct SingleStepIter {
    reference: Option<UpstreamRef>,
}

impl SingleStepIter {
    pub fn new(current: &UpstreamRef, delta: &UpstreamDelta) -> Self {
        SingleStepIter {
            reference: Some(delta.apply(current)),
        }
    }
}

impl StepIter for SingleStepIter {
    fn next_step(&mut self) -> Result<Option<Step>, IterError> {
        let Some(reference) = self.reference.take() else {
            return Ok(None);
        };

        let puller = puller_for(&reference)?;
        Ok(Some(Step::new(puller)))
    }
}
