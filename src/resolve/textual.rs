//! Textual conflict-marker resolution.
//!
//! Rewrites each conflicted file by scanning for the standard three-part
//! markers and keeping only the preferred section; marker lines themselves
//! are never emitted. No merge algorithm is involved; this is a blunt
//! instrument for charts where one side is always right.

use std::path::Path;

use crate::git::Workspace;

use super::{Resolution, ResolveError, Resolver};

/// Which side of a conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// The section between `<<<<<<<` and `=======`.
    Ours,

    /// The section between `=======` and `>>>>>>>`.
    Theirs,
}

/// Resolves conflicts by keeping one side of every marker block.
#[derive(Debug, Clone, Copy)]
pub struct TextualResolver {
    preference: Preference,
}

impl TextualResolver {
    pub fn new(preference: Preference) -> Self {
        TextualResolver { preference }
    }

    pub fn ours() -> Self {
        TextualResolver::new(Preference::Ours)
    }

    pub fn theirs() -> Self {
        TextualResolver::new(Preference::Theirs)
    }

    fn resolve_file(&self, path: &Path) -> Result<(), ResolveError> {
        let content = std::fs::read_to_string(path)?;
        let resolved = resolve_markers(&content, self.preference);
        if resolved != content {
            std::fs::write(path, resolved)?;
        }
        Ok(())
    }
}

impl Resolver for TextualResolver {
    fn resolve(&self, workspace: &Workspace) -> Result<Resolution, ResolveError> {
        for entry in workspace.status()? {
            let rewrite = entry.is_unmerged() || entry.worktree == 'M';
            if rewrite {
                let path = workspace.root().join(&entry.path);
                // A path can be unmerged with no file on disk (deleted on
                // one side); staging it records the deletion.
                if path.is_file() {
                    self.resolve_file(&path)?;
                }
            }

            if entry.has_unstaged() {
                workspace.stage(&entry.path)?;
            }
        }

        Ok(Resolution::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Ours,
    Theirs,
}

/// Keep only the preferred side of every conflict block in `content`.
fn resolve_markers(content: &str, preference: Preference) -> String {
    let mut out = String::with_capacity(content.len());
    let mut section = Section::None;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);

        match section {
            Section::None if trimmed.starts_with("<<<<<<<") => {
                section = Section::Ours;
                continue;
            }
            Section::Ours if trimmed.starts_with("=======") => {
                section = Section::Theirs;
                continue;
            }
            Section::Theirs if trimmed.starts_with(">>>>>>>") => {
                section = Section::None;
                continue;
            }
            _ => {}
        }

        let keep = match section {
            Section::None => true,
            Section::Ours => preference == Preference::Ours,
            Section::Theirs => preference == Preference::Theirs,
        };
        if keep {
            out.push_str(line);
        }
    }

    out
}
