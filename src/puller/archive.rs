//! One-shot provider for non-versioned upstream sources.
//!
//! The location is either an HTTP(S) URL or a local filesystem path, naming
//! a gzip tarball, a plain tarball, or a directory. Archives conventionally
//! wrap their content in a single top-level directory; that layer is peeled
//! off before the subpath is resolved.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::fsutil;
use crate::upstream::UpstreamRef;

use super::{source_dir, PullError, Puller};

/// Fetches a non-versioned source once and exports its tracked content.
#[derive(Debug)]
pub struct ArchivePuller {
    reference: UpstreamRef,
}

impl ArchivePuller {
    pub fn new(reference: UpstreamRef) -> Self {
        ArchivePuller { reference }
    }

    fn fetch(&self, scratch: &Path) -> Result<PathBuf, PullError> {
        let location = &self.reference.location;

        if location.starts_with("http://") || location.starts_with("https://") {
            let name = location.rsplit('/').next().unwrap_or("upstream-archive");
            let local = scratch.join(name);

            let mut response = reqwest::blocking::get(location)
                .and_then(|r| r.error_for_status())
                .map_err(|source| PullError::Fetch {
                    url: location.clone(),
                    source,
                })?;

            let mut file = File::create(&local)?;
            io::copy(&mut response, &mut file).map_err(|source| PullError::Unpack {
                path: local.clone(),
                source,
            })?;

            Ok(local)
        } else {
            Ok(PathBuf::from(location))
        }
    }

    fn unpack(&self, archive: &Path, scratch: &Path) -> Result<PathBuf, PullError> {
        if archive.is_dir() {
            return Ok(archive.to_path_buf());
        }

        let name = archive.to_string_lossy();
        let out = scratch.join("unpacked");
        std::fs::create_dir_all(&out)?;

        let file = File::open(archive)?;
        let result = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(&out)
        } else {
            tar::Archive::new(file).unpack(&out)
        };
        result.map_err(|source| PullError::Unpack {
            path: archive.to_path_buf(),
            source,
        })?;

        Ok(flatten_single_dir(out))
    }
}

impl Puller for ArchivePuller {
    fn reference(&self) -> &UpstreamRef {
        &self.reference
    }

    fn pull(&self, dest: &Path) -> Result<(), PullError> {
        let scratch = TempDir::with_prefix("chartshift-archive-")?;

        let archive = self.fetch(scratch.path())?;
        let tree = self.unpack(&archive, scratch.path())?;
        let src = source_dir(&tree, &self.reference)?;
        fsutil::replace_tree(&src, dest)?;

        Ok(())
    }
}

/// Peel off the conventional single top-level directory of an archive.
fn flatten_single_dir(root: PathBuf) -> PathBuf {
    let mut entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries.flatten(),
        Err(_) => return root,
    };

    let (first, second) = (entries.next(), entries.next());
    match (first, second) {
        (Some(only), None) if only.path().is_dir() => only.path(),
        _ => root,
    }
}
