//! Version-controlled content providers.
//!
//! [`UpstreamClone`] owns one scratch clone of an upstream repository.
//! [`GitPuller`] clones on demand for a single pull; [`CheckoutPuller`]
//! shares a pre-existing clone so an incremental walk over many revisions
//! clones exactly once.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::fsutil;
use crate::git;
use crate::upstream::UpstreamRef;

use super::{source_dir, PullError, Puller};

/// A scratch clone of an upstream repository.
///
/// The clone lives in a temporary directory and disappears with the last
/// handle to it. Checkouts mutate the shared worktree, which is safe here
/// because the whole pipeline is sequential.
#[derive(Debug)]
pub struct UpstreamClone {
    dir: TempDir,
}

impl UpstreamClone {
    /// Clone `location` into a fresh scratch directory.
    pub fn open(location: &str) -> Result<Self, PullError> {
        let dir = TempDir::with_prefix("chartshift-upstream-")?;
        let clone_path = dir.path().join("upstream");
        git::clone(location, &clone_path)?;
        Ok(UpstreamClone { dir })
    }

    /// Path of the cloned worktree.
    pub fn worktree(&self) -> std::path::PathBuf {
        self.dir.path().join("upstream")
    }

    /// Check out `revision`, discarding any leftover worktree state.
    pub fn checkout(&self, revision: &str) -> Result<(), PullError> {
        git::run_git(&self.worktree(), &["checkout", "--force", revision])?;
        Ok(())
    }

    /// Run `git log` style queries against the clone.
    pub fn stdout(&self, args: &[&str]) -> Result<String, PullError> {
        Ok(git::run_git_stdout(&self.worktree(), args)?)
    }

    fn export(&self, reference: &UpstreamRef, dest: &Path) -> Result<(), PullError> {
        let worktree = self.worktree();
        let src = source_dir(&worktree, reference)?;
        fsutil::replace_tree(&src, dest)?;
        Ok(())
    }
}

/// Pulls one revision of a version-controlled upstream, cloning on demand.
#[derive(Debug)]
pub struct GitPuller {
    reference: UpstreamRef,
}

impl GitPuller {
    /// The reference must carry a revision; version-controlled pulls have
    /// no meaning without one.
    pub fn new(reference: UpstreamRef) -> Result<Self, PullError> {
        if reference.revision.is_none() {
            return Err(PullError::MissingRevision {
                location: reference.location.clone(),
            });
        }
        Ok(GitPuller { reference })
    }
}

impl Puller for GitPuller {
    fn reference(&self) -> &UpstreamRef {
        &self.reference
    }

    fn pull(&self, dest: &Path) -> Result<(), PullError> {
        let revision = self.reference.revision.as_deref().ok_or_else(|| {
            PullError::MissingRevision {
                location: self.reference.location.clone(),
            }
        })?;

        let clone = UpstreamClone::open(&self.reference.location)?;
        clone.checkout(revision)?;
        clone.export(&self.reference, dest)
    }
}

/// Pulls one revision out of a shared, already-open clone.
#[derive(Debug, Clone)]
pub struct CheckoutPuller {
    clone: Arc<UpstreamClone>,
    reference: UpstreamRef,
}

impl CheckoutPuller {
    pub fn new(clone: Arc<UpstreamClone>, reference: UpstreamRef) -> Self {
        CheckoutPuller { clone, reference }
    }
}

impl Puller for CheckoutPuller {
    fn reference(&self) -> &UpstreamRef {
        &self.reference
    }

    fn pull(&self, dest: &Path) -> Result<(), PullError> {
        let revision = self.reference.revision.as_deref().ok_or_else(|| {
            PullError::MissingRevision {
                location: self.reference.location.clone(),
            }
        })?;

        self.clone.checkout(revision)?;
        self.clone.export(&self.reference, dest)
    }
}
