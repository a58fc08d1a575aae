//! Content providers: materialize one exact upstream snapshot into a
//! destination directory.
//!
//! A [`Puller`] is bound to a single [`UpstreamRef`] and knows how to place
//! that snapshot's tracked content (the subpath, minus version-control
//! metadata) at a destination path. Version-controlled locations are served
//! by [`git::GitPuller`]; non-versioned sources (archives, plain
//! directories) by [`archive::ArchivePuller`]. The engine never inspects
//! which it got; it only calls the trait.

pub mod archive;
pub mod git;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::git::GitError;
use crate::upstream::UpstreamRef;

pub use archive::ArchivePuller;
pub use git::{CheckoutPuller, GitPuller, UpstreamClone};

/// Errors from materializing an upstream snapshot.
#[derive(Debug, Error)]
pub enum PullError {
    /// A version-controlled reference is missing its mandatory revision.
    #[error("upstream reference for {location} has no revision")]
    MissingRevision { location: String },

    /// The tracked subpath does not exist in the upstream tree.
    #[error("subpath '{subpath}' not found in upstream {location}")]
    MissingSubpath { location: String, subpath: String },

    /// Downloading a non-versioned source failed.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Unpacking a downloaded archive failed.
    #[error("failed to unpack archive {path}: {source}")]
    Unpack {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying git failure (clone, checkout).
    #[error(transparent)]
    Git(#[from] GitError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Materializes one exact upstream snapshot.
pub trait Puller {
    /// The snapshot this provider is bound to.
    fn reference(&self) -> &UpstreamRef;

    /// Place the snapshot's tracked content at `dest`, replacing whatever
    /// is there. Version-control metadata is never copied.
    fn pull(&self, dest: &Path) -> Result<(), PullError>;
}

/// Choose a provider for `reference`: a revision means a version-controlled
/// location, its absence a one-shot non-versioned source.
pub fn puller_for(reference: &UpstreamRef) -> Result<Box<dyn Puller>, PullError> {
    if reference.is_versioned() {
        Ok(Box::new(GitPuller::new(reference.clone())?))
    } else {
        Ok(Box::new(ArchivePuller::new(reference.clone())))
    }
}

/// Resolve the directory the tracked content lives in: the tree root, or
/// the subpath beneath it when one is set.
pub(crate) fn source_dir(
    tree: &Path,
    reference: &UpstreamRef,
) -> Result<PathBuf, PullError> {
    let src = match &reference.subpath {
        Some(subpath) => tree.join(subpath),
        None => tree.to_path_buf(),
    };

    if !src.is_dir() {
        return Err(PullError::MissingSubpath {
            location: reference.location.clone(),
            subpath: reference.subpath.clone().unwrap_or_default(),
        });
    }

    Ok(src)
}
