//! Shared fixture helpers: small real git repositories built through the
//! subprocess layer, with deterministic identities and timestamps.

use std::path::Path;
use std::process::Command;

use crate::git::CommitId;

/// Initialize a repository on a `main` branch with a local test identity.
pub fn init_repo(path: &Path) {
    git(path, &["init", "--initial-branch=main"], None);
    git(path, &["config", "user.name", "Test Operator"], None);
    git(path, &["config", "user.email", "operator@example.com"], None);
}

/// Stage everything and commit, returning the new commit id.
pub fn commit_all(path: &Path, message: &str) -> CommitId {
    git(path, &["add", "-A"], None);
    git(path, &["commit", "-m", message], None);
    head(path)
}

/// Like [`commit_all`] but with pinned author/committer timestamps, for
/// fixtures whose history must have a known time ordering.
pub fn commit_all_dated(path: &Path, message: &str, date: &str) -> CommitId {
    git(path, &["add", "-A"], None);
    git(path, &["commit", "-m", message], Some(date));
    head(path)
}

/// The current HEAD commit id.
pub fn head(path: &Path) -> CommitId {
    let output = Command::new("git")
        .current_dir(path)
        .args(["rev-parse", "HEAD"])
        .output()
        .expect("run git rev-parse");
    assert!(output.status.success(), "git rev-parse failed");
    CommitId::new(String::from_utf8(output.stdout).unwrap().trim().to_string())
}

fn git(path: &Path, args: &[&str], date: Option<&str>) {
    let mut cmd = Command::new("git");
    cmd.current_dir(path).args(args);
    if let Some(date) = date {
        cmd.env("GIT_AUTHOR_DATE", date);
        cmd.env("GIT_COMMITTER_DATE", date);
    }
    let output = cmd.output().expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}
