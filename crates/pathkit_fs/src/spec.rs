//! Walk/merge enums, merge options, and the crate error type.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::matcher::Matcher;
use crate::merge::{EnumMergeConflictPolicy, TypeFileCopyFn, copy_file_with_metadata};

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// When a directory is yielded relative to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumWalkOrder {
    /// Directory first, then its descendants.
    #[default]
    PreOrder,
    /// Descendants first, then the directory itself.
    PostOrder,
}

/// Outcome of a conflict policy for one source/destination file pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCopyDecision {
    /// Copy source over destination.
    Copy,
    /// Leave destination untouched.
    Skip,
}

/// Aggregate verdict of a finished merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumMergeStatus {
    /// Every file was copied.
    Succeeded,
    /// No failures, but at least one file was skipped.
    SucceededWithSkips,
    /// At least one entry failed; the rest of the tree was still processed.
    CompletedWithFailures,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Input options for [`merge_tree_with`](crate::merge::merge_tree_with).
#[derive(Clone)]
pub struct SpecMergeOptions {
    /// Per-file copy decision.
    pub rule_conflict: EnumMergeConflictPolicy,
    /// Single-file copy operation.
    pub fn_copy_file: Arc<TypeFileCopyFn>,
    /// Recreate symlinks as symlinks instead of copying their targets.
    pub if_copy_symlinks: bool,
    /// Entries whose basename matches are neither copied nor descended into.
    pub matcher_exclude: Option<Matcher>,
    /// Copy permissions/times of each directory after its children are merged.
    pub if_copy_dir_metadata: bool,
    /// Do not mutate filesystem; record what would happen.
    pub if_dry_run: bool,
}

impl Default for SpecMergeOptions {
    fn default() -> Self {
        Self {
            rule_conflict: EnumMergeConflictPolicy::default(),
            fn_copy_file: Arc::new(copy_file_with_metadata),
            if_copy_symlinks: false,
            matcher_exclude: None,
            if_copy_dir_metadata: true,
            if_dry_run: false,
        }
    }
}

impl std::fmt::Debug for SpecMergeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecMergeOptions")
            .field("rule_conflict", &self.rule_conflict)
            .field("if_copy_symlinks", &self.if_copy_symlinks)
            .field("matcher_exclude", &self.matcher_exclude)
            .field("if_copy_dir_metadata", &self.if_copy_dir_metadata)
            .field("if_dry_run", &self.if_dry_run)
            .finish_non_exhaustive()
    }
}

/// Every failure the walk and merge engines can report.
///
/// Setup failures are returned as `Err`; per-entry failures during a merge are
/// recorded into [`MergeOutcome`](crate::report::MergeOutcome) instead.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Malformed glob or regular expression.
    #[error("Invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A directory listing (or one of its entries) could not be read.
    #[error("Unable to list directory {}: {source}", .path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A non-directory occupies a path that must be a directory.
    #[error("Destination is not a directory: {}", .path.display())]
    DestinationConflict { path: PathBuf },

    /// A directory occupies a path that must receive a file.
    #[error("Destination is a directory, expected file: {}", .path.display())]
    DestinationIsDirectory { path: PathBuf },

    /// Content copy of a single file failed.
    #[error("Failed to copy {}: {source}", .path.display())]
    FileCopy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Content was copied but times/permissions/xattrs were not.
    #[error("Failed to preserve metadata on {}: {source}", .path.display())]
    MetadataPreservation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("Source and destination directories overlap: {} <-> {}", .path_src.display(), .path_dst.display())]
    SourceDestinationOverlap { path_src: PathBuf, path_dst: PathBuf },

    #[error("Failed to initialize destination {}: {source}", .path.display())]
    DestinationInit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Destination write would go through a symlink.
    #[error("{message}")]
    UnsafeDestination { path: PathBuf, message: String },

    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TreeError {
    /// The path this error occurred at, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InvalidPattern { .. } => None,
            Self::DirectoryRead { path, .. }
            | Self::DestinationConflict { path }
            | Self::DestinationIsDirectory { path }
            | Self::FileCopy { path, .. }
            | Self::MetadataPreservation { path, .. }
            | Self::SourceNotDirectory(path)
            | Self::DestinationInit { path, .. }
            | Self::UnsafeDestination { path, .. }
            | Self::Remove { path, .. } => Some(path),
            Self::SourceDestinationOverlap { path_src, .. } => Some(path_src),
        }
    }

    /// Soft failures leave the associated file counted as copied.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::MetadataPreservation { .. })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
