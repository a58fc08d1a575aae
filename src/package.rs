//! The package collaborator: the on-disk representation of a chart package
//! the engine rebases.
//!
//! The engine only consumes the [`Package`] trait: name, tracked subtrees,
//! upstream metadata, baseline materialization and patch regeneration.
//! [`FsPackage`] is the file-backed implementation: a package lives under
//! `packages/<name>/` with a `package.yaml` metadata document, a stored
//! patch under `generated-changes/`, and the chart working directory the
//! rebase rewrites.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsutil;
use crate::git::{self, GitError};
use crate::puller::{puller_for, PullError};
use crate::upstream::UpstreamRef;

/// Directory under the repository root holding all packages.
pub const PACKAGES_DIR: &str = "packages";

/// Per-package directory holding the stored patch.
pub const GENERATED_CHANGES_DIR: &str = "generated-changes";

/// The stored patch file name.
pub const PATCH_FILE: &str = "package.patch";

/// The per-package metadata document.
pub const METADATA_FILE: &str = "package.yaml";

/// Errors from package operations.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The metadata document could not be read or parsed.
    #[error("invalid package metadata at {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Applying the stored patch to the fresh baseline failed.
    #[error("failed to apply stored patch:\n{stderr}")]
    PatchApply { stderr: String },

    /// Regenerating the patch failed.
    #[error("failed to diff working directory against baseline: {stderr}")]
    Diff { stderr: String },

    /// Pulling the upstream snapshot failed.
    #[error(transparent)]
    Pull(#[from] PullError),

    /// Underlying git failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The persisted `package.yaml` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Chart working directory, relative to the package directory.
    pub working_dir: String,

    /// Additional chart working directories (sub-charts), relative to the
    /// package directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_charts: Vec<String>,

    /// The upstream snapshot the stored patch applies to.
    pub upstream: UpstreamRef,
}

/// What the engine needs from a chart package.
pub trait Package {
    /// The package name.
    fn name(&self) -> &str;

    /// The upstream reference the package is currently based on.
    fn upstream(&self) -> &UpstreamRef;

    /// Persist a new upstream reference into the metadata document.
    fn set_upstream(&mut self, reference: UpstreamRef) -> Result<(), PackageError>;

    /// Chart working directories (main first), relative to the repository
    /// root.
    fn chart_dirs(&self) -> Vec<PathBuf>;

    /// The stored-patch directory, relative to the repository root.
    fn patch_dir(&self) -> PathBuf;

    /// The metadata document path, relative to the repository root.
    fn metadata_path(&self) -> PathBuf;

    /// The subtrees a rebase is allowed to touch: every chart working
    /// directory plus the stored-patch directory.
    fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.chart_dirs();
        paths.push(self.patch_dir());
        paths
    }

    /// Materialize the chart working directory: the clean upstream snapshot
    /// named by the current metadata, with the stored patch applied on top.
    fn prepare(&self) -> Result<(), PackageError>;

    /// Rewrite the stored patch from the current working directory, diffed
    /// against the clean upstream snapshot named by the current metadata.
    fn generate_patch(&self) -> Result<(), PackageError>;
}

/// File-backed [`Package`] under `<repo>/packages/<name>/`.
#[derive(Debug, Clone)]
pub struct FsPackage {
    root: PathBuf,
    name: String,
    manifest: PackageManifest,
}

impl FsPackage {
    /// Load `packages/<name>/package.yaml` under `root`.
    pub fn load(root: impl Into<PathBuf>, name: &str) -> Result<Self, PackageError> {
        let root = root.into();
        let metadata = root.join(PACKAGES_DIR).join(name).join(METADATA_FILE);

        let raw = std::fs::read_to_string(&metadata)?;
        let manifest: PackageManifest =
            serde_yaml::from_str(&raw).map_err(|source| PackageError::Metadata {
                path: metadata,
                source,
            })?;

        Ok(FsPackage {
            root,
            name: name.to_string(),
            manifest,
        })
    }

    fn pkg_dir(&self) -> PathBuf {
        Path::new(PACKAGES_DIR).join(&self.name)
    }

    fn working_dir(&self) -> PathBuf {
        self.pkg_dir().join(&self.manifest.working_dir)
    }

    fn patch_file(&self) -> PathBuf {
        self.root
            .join(self.patch_dir())
            .join(PATCH_FILE)
    }

    /// Pull the clean upstream snapshot named by the metadata into `dest`.
    fn pull_baseline(&self, dest: &Path) -> Result<(), PackageError> {
        let puller = puller_for(&self.manifest.upstream)?;
        puller.pull(dest)?;
        Ok(())
    }
}

impl Package for FsPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn upstream(&self) -> &UpstreamRef {
        &self.manifest.upstream
    }

    fn set_upstream(&mut self, reference: UpstreamRef) -> Result<(), PackageError> {
        self.manifest.upstream = reference;

        let path = self.root.join(self.metadata_path());
        let raw = serde_yaml::to_string(&self.manifest).map_err(|source| {
            PackageError::Metadata {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(&path, raw)?;

        Ok(())
    }

    fn chart_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.working_dir()];
        for chart in &self.manifest.additional_charts {
            dirs.push(self.pkg_dir().join(chart));
        }
        dirs
    }

    fn patch_dir(&self) -> PathBuf {
        self.pkg_dir().join(GENERATED_CHANGES_DIR)
    }

    fn metadata_path(&self) -> PathBuf {
        self.pkg_dir().join(METADATA_FILE)
    }

    fn prepare(&self) -> Result<(), PackageError> {
        let working_dir = self.root.join(self.working_dir());
        self.pull_baseline(&working_dir)?;

        let patch_file = self.patch_file();
        let patch_is_empty = match std::fs::metadata(&patch_file) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        if patch_is_empty {
            return Ok(());
        }

        let directory = self.working_dir();
        let directory = directory.to_string_lossy();
        let patch = patch_file.to_string_lossy();
        let output = git::run_git(
            &self.root,
            &["apply", "-p1", "--directory", directory.as_ref(), patch.as_ref()],
        );

        match output {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) => {
                Err(PackageError::PatchApply { stderr })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn generate_patch(&self) -> Result<(), PackageError> {
        let scratch = tempfile::TempDir::with_prefix("chartshift-patch-")?;
        let baseline = scratch.path().join("a");
        let working = scratch.path().join("b");

        self.pull_baseline(&baseline)?;
        std::fs::create_dir_all(&working)?;
        fsutil::copy_tree(&self.root.join(self.working_dir()), &working)?;

        // `--no-prefix` plus directories literally named `a` and `b` yields
        // a conventional-looking patch that applies with `-p1`. Exit code 1
        // means "differences found", not failure.
        let output = Command::new("git")
            .current_dir(scratch.path())
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(["diff", "--no-index", "--no-prefix", "a", "b"])
            .output()?;

        let patch = match output.status.code() {
            Some(0) | Some(1) => output.stdout,
            _ => {
                return Err(PackageError::Diff {
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                })
            }
        };

        let patch_file = self.patch_file();
        if let Some(parent) = patch_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&patch_file, patch)?;

        tracing::info!(package = %self.name, patch = %patch_file.display(), "regenerated patch");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{commit_all, init_repo};
    use tempfile::TempDir;

    /// An upstream repo plus a chart repo with one package tracking it.
    fn package_fixture() -> (TempDir, TempDir, FsPackage) {
        let upstream = TempDir::new().unwrap();
        init_repo(upstream.path());
        std::fs::create_dir_all(upstream.path().join("charts/demo")).unwrap();
        std::fs::write(
            upstream.path().join("charts/demo/values.yaml"),
            "replicas: 1\n",
        )
        .unwrap();
        let r1 = commit_all(upstream.path(), "r1");

        let repo = TempDir::new().unwrap();
        init_repo(repo.path());
        let pkg_dir = repo.path().join("packages/demo");
        std::fs::create_dir_all(&pkg_dir).unwrap();

        let manifest = PackageManifest {
            working_dir: "charts".to_string(),
            additional_charts: vec![],
            upstream: UpstreamRef::new(upstream.path().to_string_lossy())
                .with_revision(r1.as_str())
                .with_subpath("charts/demo"),
        };
        std::fs::write(
            pkg_dir.join(METADATA_FILE),
            serde_yaml::to_string(&manifest).unwrap(),
        )
        .unwrap();
        commit_all(repo.path(), "add package");

        let pkg = FsPackage::load(repo.path(), "demo").unwrap();
        (upstream, repo, pkg)
    }

    #[test]
    fn load_reads_manifest() {
        let (_upstream, _repo, pkg) = package_fixture();

        assert_eq!(pkg.name(), "demo");
        assert_eq!(pkg.upstream().subpath.as_deref(), Some("charts/demo"));
        assert_eq!(
            pkg.chart_dirs(),
            vec![PathBuf::from("packages/demo/charts")]
        );
        assert_eq!(
            pkg.patch_dir(),
            PathBuf::from("packages/demo/generated-changes")
        );
    }

    #[test]
    fn prepare_without_patch_is_the_clean_baseline() {
        let (_upstream, repo, pkg) = package_fixture();

        pkg.prepare().unwrap();

        let values = repo.path().join("packages/demo/charts/values.yaml");
        assert_eq!(std::fs::read_to_string(values).unwrap(), "replicas: 1\n");
    }

    #[test]
    fn patch_round_trip_preserves_customizations() {
        let (_upstream, repo, pkg) = package_fixture();

        pkg.prepare().unwrap();

        // Customize the chart, record the patch.
        let values = repo.path().join("packages/demo/charts/values.yaml");
        std::fs::write(&values, "replicas: 3\n").unwrap();
        std::fs::write(
            repo.path().join("packages/demo/charts/local.yaml"),
            "local: true\n",
        )
        .unwrap();
        pkg.generate_patch().unwrap();

        let patch = std::fs::read_to_string(
            repo.path().join("packages/demo/generated-changes/package.patch"),
        )
        .unwrap();
        assert!(patch.contains("replicas: 3"));

        // A fresh prepare replays the customizations over the baseline.
        pkg.prepare().unwrap();
        assert_eq!(std::fs::read_to_string(&values).unwrap(), "replicas: 3\n");
        assert_eq!(
            std::fs::read_to_string(repo.path().join("packages/demo/charts/local.yaml"))
                .unwrap(),
            "local: true\n"
        );
    }

    #[test]
    fn generate_patch_with_no_changes_writes_empty_patch() {
        let (_upstream, repo, pkg) = package_fixture();

        pkg.prepare().unwrap();
        pkg.generate_patch().unwrap();

        let patch = repo.path().join("packages/demo/generated-changes/package.patch");
        assert_eq!(std::fs::metadata(patch).unwrap().len(), 0);
    }

    #[test]
    fn set_upstream_persists_metadata() {
        let (_upstream, repo, mut pkg) = package_fixture();

        let mut updated = pkg.upstream().clone();
        updated.revision = Some("ffff".to_string());
        pkg.set_upstream(updated.clone()).unwrap();

        let reloaded = FsPackage::load(repo.path(), "demo").unwrap();
        assert_eq!(reloaded.upstream(), &updated);
    }
}
