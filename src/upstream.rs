//! Upstream reference value types.
//!
//! An [`UpstreamRef`] names one exact upstream snapshot: where the content
//! comes from, optionally which revision, optionally which subpath within it.
//! An [`UpstreamDelta`] is a partial override of a reference: only the set
//! fields replace the base when applied.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An exact upstream snapshot a chart is (or will be) based on.
///
/// `revision` is mandatory for version-controlled locations and absent for
/// non-versioned sources (archives, plain directories). `subpath` restricts
/// the tracked content to a directory within the upstream tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRef {
    /// Where the upstream content comes from (repository URL, archive URL,
    /// or local path).
    pub location: String,

    /// Exact revision within a version-controlled location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Directory within the upstream tree that the chart tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

impl UpstreamRef {
    pub fn new(location: impl Into<String>) -> Self {
        UpstreamRef {
            location: location.into(),
            revision: None,
            subpath: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    /// Returns true when the reference points into a version-controlled
    /// location (i.e. carries a revision).
    pub fn is_versioned(&self) -> bool {
        self.revision.is_some()
    }

    /// The coordinate that changed meaningfully between two references of the
    /// same package: the revision when present, the location otherwise. Used
    /// in commit messages and logs.
    pub fn relevant_change(&self) -> &str {
        match &self.revision {
            Some(revision) => revision,
            None => &self.location,
        }
    }
}

impl fmt::Display for UpstreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(revision) = &self.revision {
            write!(f, "@{}", revision)?;
        }
        if let Some(subpath) = &self.subpath {
            write!(f, " [{}]", subpath)?;
        }
        Ok(())
    }
}

/// A partial override of an [`UpstreamRef`]; only set fields replace the
/// base when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamDelta {
    pub location: Option<String>,
    pub revision: Option<String>,
    pub subpath: Option<String>,
}

impl UpstreamDelta {
    pub fn to_revision(revision: impl Into<String>) -> Self {
        UpstreamDelta {
            revision: Some(revision.into()),
            ..Default::default()
        }
    }

    pub fn to_location(location: impl Into<String>) -> Self {
        UpstreamDelta {
            location: Some(location.into()),
            ..Default::default()
        }
    }

    /// Overlays the set fields of this delta onto `base`.
    pub fn apply(&self, base: &UpstreamRef) -> UpstreamRef {
        UpstreamRef {
            location: self.location.clone().unwrap_or_else(|| base.location.clone()),
            revision: self.revision.clone().or_else(|| base.revision.clone()),
            subpath: self.subpath.clone().or_else(|| base.subpath.clone()),
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.revision.is_none() && self.subpath.is_none()
    }
}
