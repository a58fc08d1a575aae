//! chartshift: rebase locally-patched chart packages onto new upstream
//! snapshots.
//!
//! A package's chart carries accumulated local customizations stored as a
//! diff. This library replays that patch over a new version of the
//! upstream source: it enumerates the upstream states to traverse,
//! materializes each into an isolated workspace, merges it against the
//! patched baseline, resolves and validates conflicts, and produces a
//! clean, replayable commit history plus an updated patch and metadata.

pub mod fsutil;
pub mod git;
pub mod iter;
pub mod package;
pub mod puller;
pub mod rebase;
pub mod resolve;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_utils;
