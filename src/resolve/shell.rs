//! Interactive resolution in an operator shell.
//!
//! Drops the operator into a shell rooted at the repository, with a banner
//! explaining the state and an `abort` alias that marks the session for
//! abort before exiting. The pipeline is suspended until the shell exits;
//! cancellation is cooperative: the abort marker is checked only after the
//! shell returns, never preemptively.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use crate::git::{path_is_under, Workspace};

use super::{Resolution, ResolveError, Resolver};

/// Marker file the `abort` alias creates at the repository root.
pub const ABORT_FILE: &str = ".abort-rebase";

const WELCOME: &str = r#"Welcome to the interactive rebase shell!
< = = = = = = = = = = >

The changes from the current upstream have been loaded into the current
branch. Look through the changed files, resolve any conflicts, and stage
the result. Once the index is in the desired state run 'exit'!

To abort the rebase at any time run 'abort'!"#;

/// Interactive [`Resolver`] backed by an operator shell.
#[derive(Debug, Clone)]
pub struct ShellResolver {
    /// Repo-relative subtrees the operator is allowed to change.
    allowed: Vec<PathBuf>,

    /// The shell binary. Overridable for tests.
    shell: String,
}

impl ShellResolver {
    pub fn new(allowed: Vec<PathBuf>) -> Self {
        ShellResolver {
            allowed,
            shell: "bash".to_string(),
        }
    }

    #[cfg(test)]
    fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn rc_contents(&self, workspace: &Workspace) -> String {
        let abort_path = workspace.root().join(ABORT_FILE);
        format!(
            "PS1=\"(rebase-shell)> \"; alias abort='touch {} && exit'; cat <<'CHARTSHIFT_EOF'\n{}\nCHARTSHIFT_EOF\n",
            abort_path.display(),
            WELCOME
        )
    }

    fn abort_requested(&self, workspace: &Workspace) -> bool {
        workspace.root().join(ABORT_FILE).exists()
    }

    /// Why the worktree is not acceptable yet, if anything.
    fn worktree_diagnostic(&self, workspace: &Workspace) -> Result<Option<String>, ResolveError> {
        for entry in workspace.status()? {
            if entry.has_unstaged() {
                return Ok(Some("there are unstaged changes in the worktree".to_string()));
            }

            let allowed = self.allowed.iter().any(|base| {
                path_is_under(&entry.path, &base.to_string_lossy())
            });
            if !allowed {
                return Ok(Some(format!(
                    "only changes under the package's tracked directories are allowed, found '{}'",
                    entry.path
                )));
            }
        }

        Ok(None)
    }
}

impl Resolver for ShellResolver {
    fn resolve(&self, workspace: &Workspace) -> Result<Resolution, ResolveError> {
        let mut rc = tempfile::Builder::new()
            .prefix("rebase-shell-rc-")
            .tempfile()?;
        rc.write_all(self.rc_contents(workspace).as_bytes())?;
        rc.flush()?;

        loop {
            // A non-zero exit from the shell is the operator's business, not
            // an error; spawn failures are.
            let _ = Command::new(&self.shell)
                .arg("--rcfile")
                .arg(rc.path())
                .arg("-i")
                .current_dir(workspace.root())
                .status()?;

            if self.abort_requested(workspace) {
                if let Err(err) = std::fs::remove_file(workspace.root().join(ABORT_FILE)) {
                    tracing::error!(error = %err, "failed to remove abort marker");
                }
                return Ok(Resolution::Abort);
            }

            match self.worktree_diagnostic(workspace)? {
                None => break,
                Some(diagnostic) => {
                    tracing::error!(%diagnostic, "worktree failed pre-commit checks");
                    tracing::warn!("re-running shell...");
                }
            }
        }

        Ok(Resolution::Resolved)
    }
}
