//! Subprocess git plumbing for the rebase engine.
//!
//! Everything here shells out to the `git` binary. The library-level merge
//! machinery git exposes through plumbing commands is not reimplemented:
//! squash-merge and cherry-pick in particular are invoked as external
//! processes, with their combined output captured and surfaced on failure.
//!
//! All commands run with terminal prompts disabled so a rebase can never
//! hang on a hidden credential prompt. Commit identity, when it must be
//! explicit (automation-authored commits), is passed per-command via `-c`
//! flags rather than written into any config file.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Cherry-pick failed; `output` is the tool's raw combined output.
    #[error("cherry-pick failed:\n{output}")]
    CherryPickFailed { output: String },

    /// The repository is not on a named branch.
    #[error("HEAD is detached; a named branch is required")]
    DetachedHead,

    /// Could not decode command output as UTF-8.
    #[error("invalid utf-8 in git output for: {command}")]
    InvalidOutput { command: String },

    /// IO error spawning or talking to the subprocess.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// A commit identifier (abbreviated or full).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        CommitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity used for creating commits.
///
/// Passed via `-c` flags so no repository or user config is modified. The
/// engine uses a fixed automation identity for the commits it must later
/// filter out of the replay list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// `user.name` for the commit.
    pub name: String,

    /// `user.email` for the commit.
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        CommitIdentity {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Index (staged) state letter.
    pub index: char,

    /// Worktree (unstaged) state letter.
    pub worktree: char,

    /// Path relative to the repository root. For renames this is the new
    /// path.
    pub path: String,
}

impl StatusEntry {
    /// The path is not tracked at all.
    pub fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }

    /// There are changes not reflected in the index (this includes
    /// untracked files).
    pub fn has_unstaged(&self) -> bool {
        self.worktree != ' '
    }

    /// The path is in an unmerged (conflicted) state.
    pub fn is_unmerged(&self) -> bool {
        self.index == 'U'
            || self.worktree == 'U'
            || (self.index == 'A' && self.worktree == 'A')
            || (self.index == 'D' && self.worktree == 'D')
    }
}

/// Outcome of a squash merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SquashOutcome {
    /// The merge staged changes cleanly.
    Merged,

    /// Nothing to merge; the tree is unchanged.
    UpToDate,

    /// The merge left conflicts in the worktree.
    Conflicted { files: Vec<String> },
}

/// Create a git `Command` with prompt hygiene applied.
fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

/// Run a git command in the given working directory.
pub fn run_git(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(command_failed(args, &output))
    }
}

/// Run a git command and return trimmed stdout.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git(workdir, args)?;
    let stdout = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidOutput {
        command: format!("git {}", args.join(" ")),
    })?;
    Ok(stdout.trim().to_string())
}

/// Clone `location` into `dest`.
pub fn clone(location: &str, dest: &Path) -> GitResult<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let dest_str = dest.to_string_lossy();
    run_git(parent, &["clone", "--", location, dest_str.as_ref()])?;
    Ok(())
}

/// A handle on one repository working tree.
///
/// The engine, resolvers and validators all act through this type.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Workspace { root: root.into() }
    }

    /// The repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The SHA of `rev`.
    pub fn rev_parse(&self, rev: &str) -> GitResult<CommitId> {
        let sha = run_git_stdout(&self.root, &["rev-parse", rev])?;
        Ok(CommitId::new(sha))
    }

    /// The name of the currently checked-out branch.
    pub fn current_branch(&self) -> GitResult<String> {
        let name = run_git_stdout(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if name == "HEAD" {
            return Err(GitError::DetachedHead);
        }
        Ok(name)
    }

    /// Create `branch` pointing at `at`.
    pub fn create_branch(&self, branch: &str, at: &CommitId) -> GitResult<()> {
        run_git(&self.root, &["branch", branch, at.as_str()])?;
        Ok(())
    }

    /// True when a local branch of that name exists.
    pub fn branch_exists(&self, branch: &str) -> bool {
        let refname = format!("refs/heads/{}", branch);
        run_git(&self.root, &["show-ref", "--verify", "--quiet", &refname]).is_ok()
    }

    /// Delete `branch`. Idempotent: a missing branch is not an error.
    pub fn delete_branch(&self, branch: &str) -> GitResult<()> {
        if !self.branch_exists(branch) {
            return Ok(());
        }
        run_git(&self.root, &["branch", "-D", branch])?;
        Ok(())
    }

    /// Check out `target` (a branch name).
    pub fn checkout(&self, target: &str) -> GitResult<()> {
        run_git(&self.root, &["checkout", target])?;
        Ok(())
    }

    /// Check out `target`, throwing away local changes that would block a
    /// plain checkout. Used on cleanup paths where the worktree state is
    /// disposable by definition.
    pub fn checkout_force(&self, target: &str) -> GitResult<()> {
        run_git(&self.root, &["checkout", "--force", target])?;
        Ok(())
    }

    /// Restore `paths` (worktree and index) from another branch's tree.
    pub fn checkout_paths_from(&self, source: &str, paths: &[&str]) -> GitResult<()> {
        let mut args = vec!["checkout", source, "--"];
        args.extend(paths);
        run_git(&self.root, &args)?;
        Ok(())
    }

    /// Discard every uncommitted change, staged or not.
    pub fn hard_reset(&self) -> GitResult<()> {
        run_git(&self.root, &["reset", "--hard", "HEAD"])?;
        Ok(())
    }

    /// Parsed `git status --porcelain`.
    pub fn status(&self) -> GitResult<Vec<StatusEntry>> {
        let output = run_git_stdout(&self.root, &["status", "--porcelain"])?;
        Ok(parse_porcelain(&output))
    }

    /// True when the worktree has no changes at all, ignoring untracked
    /// paths under any of `allowed_untracked`.
    pub fn is_clean_except(&self, allowed_untracked: &[&str]) -> GitResult<bool> {
        let status = self.status()?;
        Ok(status.iter().all(|entry| {
            entry.is_untracked()
                && allowed_untracked
                    .iter()
                    .any(|allowed| path_is_under(&entry.path, allowed))
        }))
    }

    /// Stage one path.
    pub fn stage(&self, path: &str) -> GitResult<()> {
        run_git(&self.root, &["add", "--", path])?;
        Ok(())
    }

    /// Stage every change in the worktree.
    pub fn stage_all(&self) -> GitResult<()> {
        run_git(&self.root, &["add", "-A"])?;
        Ok(())
    }

    /// Stage `paths` and commit the index.
    ///
    /// With `identity` set, both author and committer are overridden via
    /// per-command config; otherwise the repository's own configuration
    /// applies. `allow_empty` permits a commit that changes nothing, which
    /// the engine needs so a no-net-change step still appears in history.
    pub fn commit_paths(
        &self,
        message: &str,
        paths: &[&str],
        identity: Option<&CommitIdentity>,
        allow_empty: bool,
    ) -> GitResult<CommitId> {
        if !paths.is_empty() {
            let mut args = vec!["add", "-A", "--"];
            args.extend(paths);
            run_git(&self.root, &args)?;
        }

        let mut cmd = git_command(&self.root);
        if let Some(identity) = identity {
            cmd.arg("-c").arg(format!("user.name={}", identity.name));
            cmd.arg("-c").arg(format!("user.email={}", identity.email));
        }
        cmd.args(["commit", "-m", message]);
        if allow_empty {
            cmd.arg("--allow-empty");
        }

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git commit -m {:?}", message),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        self.rev_parse("HEAD")
    }

    /// Squash-merge `branch` into the current branch without committing.
    ///
    /// The staged result is left in the index for the caller to resolve
    /// and/or commit. Conflicts are reported, not propagated as errors;
    /// they are an expected outcome the resolve loop handles.
    pub fn squash_merge(&self, branch: &str) -> GitResult<SquashOutcome> {
        let args = ["merge", "--squash", "--no-commit", branch];
        let output = git_command(&self.root).args(args).output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if stdout.contains("Already up to date") {
                return Ok(SquashOutcome::UpToDate);
            }
            return Ok(SquashOutcome::Merged);
        }

        // git reports CONFLICT on stdout, not stderr.
        let combined = format!("{}{}", stdout, stderr);
        if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
            let files = self.conflicting_files()?;
            return Ok(SquashOutcome::Conflicted { files });
        }

        Err(command_failed(&args, &output))
    }

    /// Paths currently in an unmerged state.
    pub fn conflicting_files(&self) -> GitResult<Vec<String>> {
        let output = run_git_stdout(&self.root, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(output
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Commits in `from..HEAD`, oldest first, with their author names.
    pub fn commits_since(&self, from: &CommitId) -> GitResult<Vec<(CommitId, String)>> {
        let range = format!("{}..HEAD", from);
        let output = run_git_stdout(
            &self.root,
            &["log", "--reverse", "--format=%H%x09%an", &range],
        )?;

        Ok(output
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let (sha, author) = line.split_once('\t')?;
                Some((CommitId::new(sha), author.to_string()))
            })
            .collect())
    }

    /// The author name of a commit.
    pub fn author_of(&self, commit: &CommitId) -> GitResult<String> {
        run_git_stdout(&self.root, &["show", "-s", "--format=%an", commit.as_str()])
    }

    /// Replay `commits`, in order, onto the current branch.
    ///
    /// Empty commits are allowed so no-net-change steps keep their place in
    /// history. On failure the cherry-pick is aborted to leave the tree
    /// usable and the tool's raw combined output is returned verbatim; the
    /// engine never attempts conflict resolution here.
    pub fn cherry_pick(&self, commits: &[CommitId]) -> GitResult<()> {
        let mut args: Vec<&str> = vec!["cherry-pick", "--allow-empty"];
        args.extend(commits.iter().map(CommitId::as_str));

        let output = git_command(&self.root).args(&args).output()?;
        if output.status.success() {
            return Ok(());
        }

        let raw = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        let _ = run_git(&self.root, &["cherry-pick", "--abort"]);

        Err(GitError::CherryPickFailed { output: raw })
    }
}

fn parse_porcelain(output: &str) -> Vec<StatusEntry> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let mut chars = line.chars();
            let index = chars.next().unwrap_or(' ');
            let worktree = chars.next().unwrap_or(' ');

            let raw_path = &line[3..];
            // Renames are reported as "old -> new"; keep the new path.
            let path = match raw_path.split_once(" -> ") {
                Some((_, new)) => new,
                None => raw_path,
            };

            StatusEntry {
                index,
                worktree,
                path: unquote(path),
            }
        })
        .collect()
}

/// Porcelain quotes paths containing special characters; strip the quotes
/// (escape sequences inside are left as-is, which is fine for the prefix
/// checks done on these paths).
fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

/// True when `path` equals `base` or sits beneath it.
pub fn path_is_under(path: &str, base: &str) -> bool {
    let base = base.trim_end_matches('/');
    path == base || path.starts_with(&format!("{}/", base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{commit_all, init_repo};
    use tempfile::TempDir;

    #[test]
    fn parse_porcelain_entries() {
        let parsed = parse_porcelain(" M charts/app.yaml\n?? .rebase-backup/x\nUU conflicted.txt\n");

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].index, ' ');
        assert_eq!(parsed[0].worktree, 'M');
        assert_eq!(parsed[0].path, "charts/app.yaml");
        assert!(parsed[1].is_untracked());
        assert!(parsed[2].is_unmerged());
    }

    #[test]
    fn parse_porcelain_rename_keeps_new_path() {
        let parsed = parse_porcelain("R  old.txt -> new.txt\n");
        assert_eq!(parsed[0].path, "new.txt");
    }

    #[test]
    fn path_is_under_requires_component_boundary() {
        assert!(path_is_under("packages/demo/charts/x", "packages/demo/charts"));
        assert!(path_is_under("packages/demo/charts", "packages/demo/charts"));
        assert!(!path_is_under("packages/demo/charts-crd/x", "packages/demo/charts"));
    }

    #[test]
    fn branch_lifecycle() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("file.txt"), "one").unwrap();
        commit_all(dir.path(), "initial");

        let ws = Workspace::open(dir.path());
        let head = ws.rev_parse("HEAD").unwrap();

        ws.create_branch("rebase/staging", &head).unwrap();
        assert!(ws.branch_exists("rebase/staging"));

        ws.delete_branch("rebase/staging").unwrap();
        assert!(!ws.branch_exists("rebase/staging"));

        // Deleting again is not an error.
        ws.delete_branch("rebase/staging").unwrap();
    }

    #[test]
    fn commit_with_identity_sets_author() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("file.txt"), "one").unwrap();
        commit_all(dir.path(), "initial");

        let ws = Workspace::open(dir.path());
        std::fs::write(dir.path().join("file.txt"), "two").unwrap();

        let identity = CommitIdentity::new("chartshift", "chartshift@localhost");
        let id = ws
            .commit_paths("automated change", &["file.txt"], Some(&identity), false)
            .unwrap();

        assert_eq!(ws.author_of(&id).unwrap(), "chartshift");
    }

    #[test]
    fn squash_merge_reports_conflicts() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("file.txt"), "base\n").unwrap();
        commit_all(dir.path(), "base");

        let ws = Workspace::open(dir.path());
        let base = ws.rev_parse("HEAD").unwrap();
        let original = ws.current_branch().unwrap();

        ws.create_branch("other", &base).unwrap();
        ws.checkout("other").unwrap();
        std::fs::write(dir.path().join("file.txt"), "theirs\n").unwrap();
        commit_all(dir.path(), "their change");

        ws.checkout(&original).unwrap();
        std::fs::write(dir.path().join("file.txt"), "ours\n").unwrap();
        commit_all(dir.path(), "our change");

        let outcome = ws.squash_merge("other").unwrap();
        match outcome {
            SquashOutcome::Conflicted { files } => assert_eq!(files, vec!["file.txt"]),
            other => panic!("expected conflict, got {:?}", other),
        }

        ws.hard_reset().unwrap();
    }

    #[test]
    fn squash_merge_clean_stages_changes() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("file.txt"), "base\n").unwrap();
        commit_all(dir.path(), "base");

        let ws = Workspace::open(dir.path());
        let base = ws.rev_parse("HEAD").unwrap();
        let original = ws.current_branch().unwrap();

        ws.create_branch("other", &base).unwrap();
        ws.checkout("other").unwrap();
        std::fs::write(dir.path().join("new.txt"), "added\n").unwrap();
        commit_all(dir.path(), "add file");
        ws.checkout(&original).unwrap();

        assert_eq!(ws.squash_merge("other").unwrap(), SquashOutcome::Merged);

        // The change is staged but not committed.
        let status = ws.status().unwrap();
        assert!(status.iter().any(|e| e.path == "new.txt" && e.index == 'A'));
    }

    #[test]
    fn commits_since_is_oldest_first() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("file.txt"), "one").unwrap();
        commit_all(dir.path(), "first");

        let ws = Workspace::open(dir.path());
        let start = ws.rev_parse("HEAD").unwrap();

        std::fs::write(dir.path().join("file.txt"), "two").unwrap();
        let second = commit_all(dir.path(), "second");
        std::fs::write(dir.path().join("file.txt"), "three").unwrap();
        let third = commit_all(dir.path(), "third");

        let commits = ws.commits_since(&start).unwrap();
        let shas: Vec<&str> = commits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(shas, vec![second.as_str(), third.as_str()]);
    }
}
