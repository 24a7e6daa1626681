//! `pathkit_fs` v1:
//! Policy-driven directory traversal and tree merge engine.
//!
//! Modules:
//! - `path`    : path handles bound to a path grammar
//! - `matcher` : basename predicates (glob, case-insensitive glob, regex)
//! - `policy`  : traversal configuration and hooks
//! - `walk`    : lazy depth-first walker
//! - `merge`   : tree merge with conflict policies
//! - `ops`     : listing/search/deletion on top of `walk`
//! - `spec`    : enums/options/errors
//! - `report`  : merge outcome model
//! - `util`    : shared helper functions

pub mod matcher;
pub mod merge;
pub mod ops;
pub mod path;
pub mod policy;
pub mod report;
pub mod spec;
mod util;
pub mod walk;

pub use matcher::Matcher;
pub use merge::{EnumMergeConflictPolicy, copy_file_with_metadata, merge_tree, merge_tree_with};
pub use ops::{
    fnmatch, glob, iglob, list_dir, list_dirs, list_files, remove_matching, walk_dirs,
    walk_files, walk_matched,
};
pub use path::{PathGrammar, PathHandle};
pub use policy::{EnumWalkErrorHandler, EnumWalkSort, TraversalPolicy};
pub use report::{EnumMergeEntryState, MergeOutcome, MergeOutcomeBuilder};
pub use spec::{EnumCopyDecision, EnumMergeStatus, EnumWalkOrder, SpecMergeOptions, TreeError};
pub use walk::{TreeWalker, WalkEntry, walk};
