//! Incremental stepping over a version-controlled upstream's history.
//!
//! The revision list is computed once, on first use: clone the upstream,
//! check out the current revision, then take every revision reachable from
//! the target whose commit time is strictly after the current revision's;
//! the starting point itself never appears. When the reference tracks a
//! subpath the list is narrowed to revisions touching it, with the explicit
//! target pinned in regardless. Revisions are consumed oldest-first, each
//! step checking out its revision in the one shared clone.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::puller::{CheckoutPuller, UpstreamClone};
use crate::upstream::{UpstreamDelta, UpstreamRef};

use super::{IterError, Step, StepIter};

pub struct IncrementalIter {
    current: UpstreamRef,
    target: UpstreamRef,
    state: Option<WalkState>,
}

struct WalkState {
    repo: Arc<UpstreamClone>,
    pending: VecDeque<String>,
}

impl IncrementalIter {
    /// Construction fails fast on inputs the walk cannot honor: a missing
    /// current or target revision, or a delta that moves the subpath.
    pub fn new(current: &UpstreamRef, delta: &UpstreamDelta) -> Result<Self, IterError> {
        if current.revision.is_none() {
            return Err(IterError::MissingCurrentRevision);
        }
        if delta.subpath.is_some() {
            return Err(IterError::SubpathChange);
        }
        if delta.revision.is_none() {
            return Err(IterError::MissingTargetRevision);
        }

        Ok(IncrementalIter {
            current: current.clone(),
            target: delta.apply(current),
            state: None,
        })
    }

    fn init(&mut self) -> Result<&mut WalkState, IterError> {
        if self.state.is_none() {
            self.state = Some(self.compute_walk()?);
        }
        Ok(self.state.as_mut().expect("state was just set"))
    }

    fn compute_walk(&self) -> Result<WalkState, IterError> {
        let current_revision = self
            .current
            .revision
            .as_deref()
            .ok_or(IterError::MissingCurrentRevision)?;
        let target_revision = self
            .target
            .revision
            .as_deref()
            .ok_or(IterError::MissingTargetRevision)?;

        let clone = Arc::new(UpstreamClone::open(&self.current.location)?);
        clone.checkout(current_revision)?;

        let current_time = commit_time(&clone, current_revision)?;

        // History reachable from the target, newest first, optionally
        // narrowed to the tracked subpath.
        let mut args: Vec<&str> = vec!["log", "--format=%H%x09%cI", target_revision];
        if let Some(subpath) = &self.current.subpath {
            args.push("--");
            args.push(subpath.as_str());
        }
        let log = clone.stdout(&args)?;

        let mut revisions = Vec::new();
        for line in log.lines().filter(|line| !line.is_empty()) {
            let Some((sha, stamp)) = line.split_once('\t') else {
                continue;
            };
            let time = parse_commit_time(sha, stamp)?;
            if time > current_time {
                revisions.push(sha.to_string());
            }
        }
        revisions.reverse();

        // A subpath filter can drop the explicit target; it must still be
        // the final step.
        if !revisions.iter().any(|sha| sha.as_str() == target_revision) {
            let resolved = clone.stdout(&["rev-parse", target_revision])?;
            if !revisions.iter().any(|sha| *sha == resolved) {
                revisions.push(resolved);
            }
        }

        tracing::debug!(
            count = revisions.len(),
            target = target_revision,
            "computed incremental revision walk"
        );

        Ok(WalkState {
            repo: clone,
            pending: revisions.into(),
        })
    }
}

impl StepIter for IncrementalIter {
    fn next_step(&mut self) -> Result<Option<Step>, IterError> {
        let target = self.target.clone();
        let state = self.init()?;

        let Some(revision) = state.pending.pop_front() else {
            return Ok(None);
        };

        let mut reference = target;
        reference.revision = Some(revision);

        let puller = CheckoutPuller::new(Arc::clone(&state.repo), reference);
        Ok(Some(Step::new(Box::new(puller))))
    }
}

fn commit_time(
    clone: &UpstreamClone,
    revision: &str,
) -> Result<DateTime<FixedOffset>, IterError> {
    let stamp = clone.stdout(&["show", "-s", "--format=%cI", revision])?;
    parse_commit_time(revision, stamp.trim())
}

fn parse_commit_time(revision: &str, stamp: &str) -> Result<DateTime<FixedOffset>, IterError> {
    DateTime::parse_from_rfc3339(stamp).map_err(|source| IterError::BadTimestamp {
        revision: revision.to_string(),
        value: stamp.to_string(),
        source,
    })
}
