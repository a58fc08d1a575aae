//! Post-resolution validation.
//!
//! After each resolution attempt the engine runs every configured validator
//! in order over every chart the package owns. A structured failure is
//! recoverable (it sends the engine back into the resolve loop); any
//! other error is fatal. An empty pipeline is valid and skips straight to
//! commit.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use walkdir::WalkDir;

use crate::git::{path_is_under, GitError, Workspace};
use crate::package::Package;

/// The conflict-marker prefix the marker-absence validator scans for.
pub const CONFLICT_MARKER: &str = "<<<<<<<";

/// A structured, recoverable validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// The chart (or package subtree) that failed.
    pub chart: PathBuf,

    /// Human-readable cause.
    pub cause: String,
}

/// Errors from a validator run.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// The worktree is not acceptable yet; resolution should continue.
    #[error("chart '{}' failed validation: {}", .0.chart.display(), .0.cause)]
    Failed(ValidationFailure),

    /// The external lint tool itself could not be run.
    #[error("lint tool failed: {0}")]
    LintTool(String),

    /// Underlying git failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// IO error while scanning chart trees.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ValidateError {
    fn failed(chart: impl Into<PathBuf>, cause: impl Into<String>) -> Self {
        ValidateError::Failed(ValidationFailure {
            chart: chart.into(),
            cause: cause.into(),
        })
    }

    /// True for the recoverable outcome that re-enters the resolve loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ValidateError::Failed(_))
    }
}

/// One check run over the package after each resolution attempt.
pub trait Validator {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn validate(&self, package: &dyn Package, workspace: &Workspace) -> Result<(), ValidateError>;
}

/// Every changed path must fall under the package's tracked subtrees, and
/// nothing may be left unstaged.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorktreeScopeValidator;

impl Validator for WorktreeScopeValidator {
    fn name(&self) -> &'static str {
        "worktree-scope"
    }

    fn validate(&self, package: &dyn Package, workspace: &Workspace) -> Result<(), ValidateError> {
        let tracked = package.tracked_paths();
        let main_chart = package
            .chart_dirs()
            .into_iter()
            .next()
            .unwrap_or_else(|| PathBuf::from("."));

        for entry in workspace.status()? {
            if entry.has_unstaged() {
                return Err(ValidateError::failed(
                    &main_chart,
                    "worktree has unstaged changes",
                ));
            }

            let allowed = tracked
                .iter()
                .any(|base| path_is_under(&entry.path, &base.to_string_lossy()));
            if !allowed {
                return Err(ValidateError::failed(
                    &main_chart,
                    format!(
                        "only changes under the package's tracked directories are allowed, found '{}'",
                        entry.path
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// No leftover conflict markers anywhere in the chart trees.
#[derive(Debug, Clone)]
pub struct MarkerAbsenceValidator {
    pattern: String,
}

impl Default for MarkerAbsenceValidator {
    fn default() -> Self {
        MarkerAbsenceValidator {
            pattern: CONFLICT_MARKER.to_string(),
        }
    }
}

impl MarkerAbsenceValidator {
    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        MarkerAbsenceValidator {
            pattern: pattern.into(),
        }
    }
}

impl Validator for MarkerAbsenceValidator {
    fn name(&self) -> &'static str {
        "marker-absence"
    }

    fn validate(&self, package: &dyn Package, workspace: &Workspace) -> Result<(), ValidateError> {
        for chart in package.chart_dirs() {
            let chart_root = workspace.root().join(&chart);
            if !chart_root.exists() {
                continue;
            }

            for entry in WalkDir::new(&chart_root).follow_links(false) {
                let entry = entry.map_err(std::io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let bytes = std::fs::read(entry.path())?;
                let content = String::from_utf8_lossy(&bytes);
                if content.lines().any(|line| line.contains(&self.pattern)) {
                    return Err(ValidateError::failed(
                        &chart,
                        format!(
                            "found conflict marker '{}' in '{}'",
                            self.pattern,
                            entry.path().display()
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// External chart-linting collaborator: given a chart directory, a
/// (possibly empty) list of reported errors.
pub trait ChartLinter {
    fn lint(&self, chart_dir: &Path) -> Result<Vec<String>, ValidateError>;
}

/// Lints by shelling out to `helm lint`.
#[derive(Debug, Clone)]
pub struct HelmLinter {
    binary: String,
}

impl Default for HelmLinter {
    fn default() -> Self {
        HelmLinter {
            binary: "helm".to_string(),
        }
    }
}

impl HelmLinter {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        HelmLinter {
            binary: binary.into(),
        }
    }
}

impl ChartLinter for HelmLinter {
    fn lint(&self, chart_dir: &Path) -> Result<Vec<String>, ValidateError> {
        let output = Command::new(&self.binary)
            .arg("lint")
            .arg(chart_dir)
            .output()
            .map_err(|err| ValidateError::LintTool(format!("{}: {}", self.binary, err)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let errors: Vec<String> = stdout
            .lines()
            .filter(|line| line.contains("[ERROR]"))
            .map(str::to_string)
            .collect();

        if errors.is_empty() && !output.status.success() {
            // The tool failed without reporting structured errors.
            return Err(ValidateError::LintTool(format!(
                "{} lint exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(errors)
    }
}

/// Runs a [`ChartLinter`] over every chart; any reported error fails.
pub struct LintValidator {
    linter: Box<dyn ChartLinter>,
}

impl LintValidator {
    pub fn new(linter: Box<dyn ChartLinter>) -> Self {
        LintValidator { linter }
    }
}

impl Validator for LintValidator {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn validate(&self, package: &dyn Package, workspace: &Workspace) -> Result<(), ValidateError> {
        for chart in package.chart_dirs() {
            let chart_root = workspace.root().join(&chart);
            let errors = self.linter.lint(&chart_root)?;
            if !errors.is_empty() {
                return Err(ValidateError::failed(&chart, errors.join("; ")));
            }
        }

        Ok(())
    }
}

/// The standard pipeline: worktree scope, marker absence, lint, in that
/// order.
pub fn default_validators() -> Vec<Box<dyn Validator>> {
    vec![
        Box::new(WorktreeScopeValidator),
        Box::new(MarkerAbsenceValidator::default()),
        Box::new(LintValidator::new(Box::new(HelmLinter::default()))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{FsPackage, PackageManifest, METADATA_FILE};
    use crate::test_utils::{commit_all, init_repo};
    use crate::upstream::UpstreamRef;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, FsPackage, Workspace) {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        let pkg_dir = dir.path().join("packages/demo");
        std::fs::create_dir_all(pkg_dir.join("charts")).unwrap();
        std::fs::write(pkg_dir.join("charts/app.yaml"), "v: 1\n").unwrap();

        let manifest = PackageManifest {
            working_dir: "charts".to_string(),
            additional_charts: vec![],
            upstream: UpstreamRef::new("https://example.com/up.git").with_revision("aaaa"),
        };
        std::fs::write(
            pkg_dir.join(METADATA_FILE),
            serde_yaml::to_string(&manifest).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x\n").unwrap();
        commit_all(dir.path(), "initial");

        let pkg = FsPackage::load(dir.path(), "demo").unwrap();
        let ws = Workspace::open(dir.path());
        (dir, pkg, ws)
    }

    #[test]
    fn scope_validator_accepts_clean_tree() {
        let (_dir, pkg, ws) = fixture();
        WorktreeScopeValidator.validate(&pkg, &ws).unwrap();
    }

    #[test]
    fn scope_validator_rejects_unstaged_changes() {
        let (dir, pkg, ws) = fixture();
        std::fs::write(dir.path().join("packages/demo/charts/app.yaml"), "v: 2\n").unwrap();

        let err = WorktreeScopeValidator.validate(&pkg, &ws).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("unstaged"));
    }

    #[test]
    fn scope_validator_rejects_out_of_scope_changes() {
        let (dir, pkg, ws) = fixture();
        std::fs::write(dir.path().join("unrelated.txt"), "changed\n").unwrap();
        ws.stage_all().unwrap();

        let err = WorktreeScopeValidator.validate(&pkg, &ws).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("unrelated.txt"));
    }

    #[test]
    fn scope_validator_accepts_staged_patch_dir_changes() {
        let (dir, pkg, ws) = fixture();
        let patch_dir = dir.path().join("packages/demo/generated-changes");
        std::fs::create_dir_all(&patch_dir).unwrap();
        std::fs::write(patch_dir.join("package.patch"), "--- a\n+++ b\n").unwrap();
        ws.stage_all().unwrap();

        WorktreeScopeValidator.validate(&pkg, &ws).unwrap();
    }

    #[test]
    fn marker_validator_finds_leftover_markers() {
        let (dir, pkg, ws) = fixture();
        std::fs::write(
            dir.path().join("packages/demo/charts/app.yaml"),
            "<<<<<<< HEAD\nv: 1\n=======\nv: 2\n>>>>>>> other\n",
        )
        .unwrap();

        let err = MarkerAbsenceValidator::default()
            .validate(&pkg, &ws)
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("conflict marker"));
    }

    #[test]
    fn marker_validator_passes_clean_charts() {
        let (_dir, pkg, ws) = fixture();
        MarkerAbsenceValidator::default().validate(&pkg, &ws).unwrap();
    }

    struct StubLinter {
        errors: Vec<String>,
    }

    impl ChartLinter for StubLinter {
        fn lint(&self, _chart_dir: &Path) -> Result<Vec<String>, ValidateError> {
            Ok(self.errors.clone())
        }
    }

    #[test]
    fn lint_validator_fails_on_reported_errors() {
        let (_dir, pkg, ws) = fixture();
        let validator = LintValidator::new(Box::new(StubLinter {
            errors: vec!["[ERROR] templates/: parse error".to_string()],
        }));

        let err = validator.validate(&pkg, &ws).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn lint_validator_passes_on_no_errors() {
        let (_dir, pkg, ws) = fixture();
        let validator = LintValidator::new(Box::new(StubLinter { errors: vec![] }));
        validator.validate(&pkg, &ws).unwrap();
    }
}
