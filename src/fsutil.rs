//! Filesystem helpers shared by pullers, backups and the package layer.

use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, skipping version-control metadata.
///
/// `dst` is created if missing. Existing files are overwritten; files present
/// only in `dst` are left alone (callers that need replace-wholesale
/// semantics remove `dst` first).
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.path().components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        let dst_path = dst.join(rel);
        copy_file(entry.path(), &dst_path)?;
    }

    Ok(())
}

/// Copy one file, creating parent directories as needed.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

/// Remove `dst` if present and replace it with a copy of `src`.
pub fn replace_tree(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst)?;
    }
    std::fs::create_dir_all(dst)?;
    copy_tree(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_tree_skips_git_metadata() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join(".git")).unwrap();
        std::fs::write(src.path().join(".git/config"), "x").unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/file.txt"), "content").unwrap();

        let dst = TempDir::new().unwrap();
        copy_tree(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("sub/file.txt").exists());
        assert!(!dst.path().join(".git").exists());
    }

    #[test]
    fn replace_tree_drops_stale_files() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("keep.txt"), "new").unwrap();

        let dst = TempDir::new().unwrap();
        let dst_dir = dst.path().join("snapshot");
        std::fs::create_dir_all(&dst_dir).unwrap();
        std::fs::write(dst_dir.join("stale.txt"), "old").unwrap();

        replace_tree(src.path(), &dst_dir).unwrap();

        assert!(dst_dir.join("keep.txt").exists());
        assert!(!dst_dir.join("stale.txt").exists());
    }
}
