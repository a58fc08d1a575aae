//! Best-effort snapshots of the chart working directories.
//!
//! The backup is refreshed after each completed step and replaced wholesale
//! and never merged, so it always mirrors the most recently completed step.
//! It is explicitly non-transactional: there is no exclusivity against
//! concurrent external readers, and failures are the caller's to log, not
//! to die on.

use std::io;
use std::path::{Path, PathBuf};

use crate::fsutil;

/// A refreshable snapshot of working files.
pub trait Backup {
    /// Replace the snapshot with the current state of the sources.
    fn refresh(&mut self) -> io::Result<()>;
}

/// Backup used when backups are disabled.
#[derive(Debug, Default)]
pub struct NoopBackup;

impl Backup for NoopBackup {
    fn refresh(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copies source directories under a destination directory, swapping the
/// whole destination on every refresh.
#[derive(Debug)]
pub struct FsBackup {
    sources: Vec<PathBuf>,
    destination: PathBuf,
}

impl FsBackup {
    pub fn new(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        FsBackup {
            sources,
            destination: destination.into(),
        }
    }

    fn stage_dir(&self) -> PathBuf {
        let mut name = self
            .destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| ".backup".into());
        name.push(".tmp");
        self.destination.with_file_name(name)
    }
}

impl Backup for FsBackup {
    fn refresh(&mut self) -> io::Result<()> {
        let stage = self.stage_dir();
        if stage.exists() {
            std::fs::remove_dir_all(&stage)?;
        }
        std::fs::create_dir_all(&stage)?;

        for source in &self.sources {
            let name = source
                .file_name()
                .ok_or_else(|| io::Error::other(format!("unnamed source: {}", source.display())))?;
            fsutil::copy_tree(source, &stage.join(name))?;
        }

        // Swap the staged copy in; the stage sits next to the destination so
        // the rename stays on one filesystem.
        if self.destination.exists() {
            std::fs::remove_dir_all(&self.destination)?;
        }
        std::fs::rename(&stage, &self.destination)?;

        Ok(())
    }
}

/// Absolute backup destination for a repository root.
pub fn backup_destination(repo_root: &Path) -> PathBuf {
    repo_root.join(super::BACKUP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn refresh_copies_sources_under_destination() {
        let dir = TempDir::new().unwrap();
        let charts = dir.path().join("charts");
        std::fs::create_dir_all(&charts).unwrap();
        std::fs::write(charts.join("app.yaml"), "v: 1\n").unwrap();

        let dest = dir.path().join(".rebase-backup");
        let mut backup = FsBackup::new(vec![charts.clone()], &dest);
        backup.refresh().unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("charts/app.yaml")).unwrap(),
            "v: 1\n"
        );
    }

    #[test]
    fn refresh_replaces_wholesale() {
        let dir = TempDir::new().unwrap();
        let charts = dir.path().join("charts");
        std::fs::create_dir_all(&charts).unwrap();
        std::fs::write(charts.join("old.yaml"), "old\n").unwrap();

        let dest = dir.path().join(".rebase-backup");
        let mut backup = FsBackup::new(vec![charts.clone()], &dest);
        backup.refresh().unwrap();

        std::fs::remove_file(charts.join("old.yaml")).unwrap();
        std::fs::write(charts.join("new.yaml"), "new\n").unwrap();
        backup.refresh().unwrap();

        assert!(dest.join("charts/new.yaml").exists());
        // The stale file is gone: the snapshot is replaced, not merged.
        assert!(!dest.join("charts/old.yaml").exists());
    }

    #[test]
    fn noop_backup_does_nothing() {
        NoopBackup.refresh().unwrap();
    }
}
