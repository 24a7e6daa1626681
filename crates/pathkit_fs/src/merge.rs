//! Tree merge: copy a source tree onto a destination tree, file by file,
//! under a conflict policy.
//!
//! The merge is additive. Per-entry failures are recorded in the returned
//! [`MergeOutcome`] and never abort the run; nothing already written is rolled
//! back. Re-running with [`EnumMergeConflictPolicy::NewerOnly`] retries exactly
//! the files that are missing or stale in the destination.

use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;

use crate::matcher::Matcher;
use crate::path::PathHandle;
use crate::policy::{EnumWalkErrorHandler, TraversalPolicy};
use crate::report::{MergeOutcome, MergeOutcomeBuilder};
use crate::spec::{EnumCopyDecision, SpecMergeOptions, TreeError};
use crate::util::{
    apply_metadata, copy_xattrs, create_symbolic_link, is_overlap,
    validate_destination_path_safety,
};
use crate::walk::{WalkEntry, walk};

/// Single-file copy operation: `(source, destination)`.
///
/// Return [`TreeError::MetadataPreservation`] when content was written but
/// attributes were not; the file then still counts as copied.
pub type TypeFileCopyFn = dyn Fn(&Path, &Path) -> Result<(), TreeError> + Send + Sync;
/// Conflict hook: `(source metadata, destination metadata if present)`.
pub type TypeConflictFn = dyn Fn(&Metadata, Option<&Metadata>) -> EnumCopyDecision + Send + Sync;

////////////////////////////////////////////////////////////////////////////////
// #region ConflictPolicy

/// Per-file decision on whether a source file replaces its destination.
///
/// Decisions only read metadata; they never touch either path.
#[derive(Clone, Default)]
pub enum EnumMergeConflictPolicy {
    /// Always copy.
    #[default]
    Always,
    /// Copy when the destination is absent or strictly older. Equal
    /// modification times are left alone.
    NewerOnly,
    /// Copy only when the destination is absent.
    Skip,
    Custom(Arc<TypeConflictFn>),
}

impl EnumMergeConflictPolicy {
    pub fn custom<F>(fn_decide: F) -> Self
    where
        F: Fn(&Metadata, Option<&Metadata>) -> EnumCopyDecision + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(fn_decide))
    }

    pub fn decide(&self, meta_src: &Metadata, meta_dst: Option<&Metadata>) -> EnumCopyDecision {
        let Some(meta_dst) = meta_dst else {
            return match self {
                Self::Custom(fn_decide) => fn_decide(meta_src, None),
                _ => EnumCopyDecision::Copy,
            };
        };
        match self {
            Self::Always => EnumCopyDecision::Copy,
            Self::Skip => EnumCopyDecision::Skip,
            Self::NewerOnly => {
                let file_time_src = FileTime::from_last_modification_time(meta_src);
                let file_time_dst = FileTime::from_last_modification_time(meta_dst);
                if file_time_src > file_time_dst {
                    EnumCopyDecision::Copy
                } else {
                    EnumCopyDecision::Skip
                }
            }
            Self::Custom(fn_decide) => fn_decide(meta_src, Some(meta_dst)),
        }
    }
}

impl fmt::Debug for EnumMergeConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::NewerOnly => write!(f, "NewerOnly"),
            Self::Skip => write!(f, "Skip"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DefaultCopy

/// Copy bytes, then permissions and access/modification times, then extended
/// attributes (Linux, best-effort).
///
/// A failure after the content copy is reported as the soft
/// [`TreeError::MetadataPreservation`].
pub fn copy_file_with_metadata(path_file_src: &Path, path_file_dst: &Path) -> Result<(), TreeError> {
    fs::copy(path_file_src, path_file_dst).map_err(|e| TreeError::FileCopy {
        path: path_file_src.to_path_buf(),
        source: e,
    })?;
    apply_metadata(path_file_src, path_file_dst).map_err(|e| {
        TreeError::MetadataPreservation {
            path: path_file_dst.to_path_buf(),
            source: e,
        }
    })?;
    copy_xattrs(path_file_src, path_file_dst);
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region MergeTree

#[derive(Debug)]
struct SpecMergeContext<'a> {
    path_dir_src: PathHandle,
    path_dir_dst: PathBuf,
    spec_merge_options: &'a SpecMergeOptions,
    builder_outcome: MergeOutcomeBuilder,
    /// `(source, destination)` directories whose metadata is applied after the walk.
    l_dirs_meta: Vec<(PathBuf, PathBuf)>,
}

/// Merge `dir_source` into `dir_destination`.
///
/// Shorthand for [`merge_tree_with`] with default options apart from the
/// conflict policy and the copy function.
pub fn merge_tree<F>(
    dir_source: impl Into<PathHandle>,
    dir_destination: impl Into<PathHandle>,
    rule_conflict: EnumMergeConflictPolicy,
    fn_copy_file: F,
) -> Result<MergeOutcome, TreeError>
where
    F: Fn(&Path, &Path) -> Result<(), TreeError> + Send + Sync + 'static,
{
    let spec_merge_options = SpecMergeOptions {
        rule_conflict,
        fn_copy_file: Arc::new(fn_copy_file),
        ..SpecMergeOptions::default()
    };
    merge_tree_with(dir_source, dir_destination, &spec_merge_options)
}

/// Merge `dir_source` into `dir_destination` under `spec_merge_options`.
///
/// The source is walked in pre-order with the default traversal policy
/// (sorted by name, symlinked directories not followed). For each directory
/// the mirrored destination directory is created when absent; for each file
/// the conflict policy decides whether the copy function runs.
///
/// Returns `Err` only for setup failures: a source that is not a directory,
/// overlapping trees, or a destination root that cannot be used. Everything
/// else lands in the returned [`MergeOutcome`].
pub fn merge_tree_with(
    dir_source: impl Into<PathHandle>,
    dir_destination: impl Into<PathHandle>,
    spec_merge_options: &SpecMergeOptions,
) -> Result<MergeOutcome, TreeError> {
    let path_dir_src: PathHandle = dir_source.into();
    let handle_dir_dst: PathHandle = dir_destination.into();
    let path_dir_dst = handle_dir_dst.into_path_buf();

    if !path_dir_src.as_path().is_dir() {
        return Err(TreeError::SourceNotDirectory(path_dir_src.into_path_buf()));
    }
    if is_overlap(path_dir_src.as_path(), &path_dir_dst) {
        return Err(TreeError::SourceDestinationOverlap {
            path_src: path_dir_src.into_path_buf(),
            path_dst: path_dir_dst,
        });
    }
    prepare_destination_root(&path_dir_dst, spec_merge_options.if_dry_run)?;

    let mut spec_merge_ctx = SpecMergeContext {
        path_dir_src: path_dir_src.clone(),
        path_dir_dst: path_dir_dst.clone(),
        spec_merge_options,
        builder_outcome: MergeOutcomeBuilder::default(),
        l_dirs_meta: Vec::new(),
    };
    if spec_merge_options.if_copy_dir_metadata && !spec_merge_options.if_dry_run {
        spec_merge_ctx
            .l_dirs_meta
            .push((path_dir_src.as_path().to_path_buf(), path_dir_dst));
    }

    let policy = TraversalPolicy::default().with_error_handler(EnumWalkErrorHandler::Report);
    let mut walker = walk(path_dir_src, Matcher::Null, policy);
    while let Some(res_entry) = walker.next() {
        let entry = match res_entry {
            Ok(v) => v,
            Err(err) => {
                let path_rel = spec_merge_ctx.relative_of_error(&err);
                spec_merge_ctx.builder_outcome.add_failed(path_rel, err);
                continue;
            }
        };
        spec_merge_ctx.builder_outcome.add_scanned();

        if let Some(matcher_exclude) = &spec_merge_options.matcher_exclude
            && matcher_exclude.matches(&entry.name())
        {
            tracing::debug!(path = %entry.path, "excluded from merge");
            spec_merge_ctx.builder_outcome.add_excluded();
            if entry.is_dir {
                walker.skip_descend();
            }
            continue;
        }

        if entry.is_symlink && spec_merge_options.if_copy_symlinks {
            handle_symlink_entry(&entry, &mut spec_merge_ctx);
        } else if entry.is_dir {
            if !handle_dir_entry(&entry, &mut spec_merge_ctx) {
                walker.skip_descend();
            }
        } else {
            handle_file_entry(&entry, &mut spec_merge_ctx);
        }
    }

    apply_dir_metadata(&mut spec_merge_ctx);

    let outcome = spec_merge_ctx.builder_outcome.build();
    tracing::info!(
        scanned = outcome.cnt_scanned,
        copied = outcome.cnt_copied,
        skipped = outcome.cnt_skipped,
        excluded = outcome.cnt_excluded,
        failed = outcome.cnt_failed,
        dirs_created = outcome.cnt_dirs_created,
        "merge finished"
    );
    Ok(outcome)
}

fn prepare_destination_root(path_dir_dst: &Path, if_dry_run: bool) -> Result<(), TreeError> {
    match fs::symlink_metadata(path_dir_dst) {
        Ok(meta_dir_dst) if meta_dir_dst.file_type().is_symlink() => {
            Err(TreeError::UnsafeDestination {
                path: path_dir_dst.to_path_buf(),
                message: "Destination root path must not be a symbolic link.".to_string(),
            })
        }
        Ok(meta_dir_dst) if !meta_dir_dst.is_dir() => Err(TreeError::DestinationConflict {
            path: path_dir_dst.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if if_dry_run {
                return Ok(());
            }
            fs::create_dir_all(path_dir_dst).map_err(|e| TreeError::DestinationInit {
                path: path_dir_dst.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(TreeError::DestinationInit {
            path: path_dir_dst.to_path_buf(),
            source: e,
        }),
    }
}

impl SpecMergeContext<'_> {
    fn relative_of(&self, entry: &WalkEntry) -> PathBuf {
        entry
            .path
            .relative_to(&self.path_dir_src)
            .unwrap_or_else(|| PathBuf::from(&*entry.name()))
    }

    fn relative_of_error(&self, err: &TreeError) -> PathBuf {
        err.path()
            .and_then(|p| p.strip_prefix(self.path_dir_src.as_path()).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Mirrored destination path; records a failure when it is unsafe.
    fn destination_of(&mut self, path_rel: &Path) -> Option<PathBuf> {
        let path_dst = self.path_dir_dst.join(path_rel);
        if let Err(err) = validate_destination_path_safety(&path_dst, &self.path_dir_dst) {
            self.builder_outcome.add_failed(path_rel.to_path_buf(), err);
            return None;
        }
        Some(path_dst)
    }

    fn warn_skip(&mut self, path_rel: PathBuf, message: String) {
        tracing::warn!("{message}");
        self.builder_outcome.add_warning(message);
        self.builder_outcome.add_skipped(path_rel);
    }
}

/// Returns whether the walker should descend into `entry`.
fn handle_dir_entry(entry: &WalkEntry, spec_merge_ctx: &mut SpecMergeContext<'_>) -> bool {
    let path_rel = spec_merge_ctx.relative_of(entry);
    if entry.is_symlink {
        spec_merge_ctx.warn_skip(
            path_rel,
            format!("Symlinked directory skipped: {}", entry.path),
        );
        return false;
    }

    let Some(path_dir_dst_sub) = spec_merge_ctx.destination_of(&path_rel) else {
        return false;
    };
    let if_dry_run = spec_merge_ctx.spec_merge_options.if_dry_run;

    match fs::symlink_metadata(&path_dir_dst_sub) {
        Ok(meta_dst) if meta_dst.is_dir() => {}
        Ok(_) => {
            tracing::debug!(path = %path_dir_dst_sub.display(), "destination subtree blocked by non-directory");
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::DestinationConflict {
                    path: path_dir_dst_sub,
                },
            );
            return false;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !if_dry_run {
                if let Err(e) = fs::create_dir(&path_dir_dst_sub) {
                    spec_merge_ctx.builder_outcome.add_failed(
                        path_rel,
                        TreeError::DestinationInit {
                            path: path_dir_dst_sub,
                            source: e,
                        },
                    );
                    return false;
                }
                spec_merge_ctx.builder_outcome.add_dir_created();
            }
        }
        Err(e) => {
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::DestinationInit {
                    path: path_dir_dst_sub,
                    source: e,
                },
            );
            return false;
        }
    }

    let spec_merge_options = spec_merge_ctx.spec_merge_options;
    if spec_merge_options.if_copy_dir_metadata && !spec_merge_options.if_dry_run {
        spec_merge_ctx
            .l_dirs_meta
            .push((entry.path.as_path().to_path_buf(), path_dir_dst_sub));
    }
    true
}

fn handle_file_entry(entry: &WalkEntry, spec_merge_ctx: &mut SpecMergeContext<'_>) {
    let path_rel = spec_merge_ctx.relative_of(entry);
    let path_file_src = entry.path.as_path();

    if entry.is_broken_symlink() {
        spec_merge_ctx.builder_outcome.add_failed(
            path_rel,
            TreeError::FileCopy {
                path: path_file_src.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "broken symlink"),
            },
        );
        return;
    }
    if !entry.is_file {
        spec_merge_ctx.warn_skip(
            path_rel,
            format!("Special file skipped: {}", entry.path),
        );
        return;
    }

    let Some(path_file_dst) = spec_merge_ctx.destination_of(&path_rel) else {
        return;
    };

    let meta_src = match fs::metadata(path_file_src) {
        Ok(v) => v,
        Err(e) => {
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::FileCopy {
                    path: path_file_src.to_path_buf(),
                    source: e,
                },
            );
            return;
        }
    };
    let meta_dst = match fs::metadata(&path_file_dst) {
        Ok(v) if v.is_dir() => {
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::DestinationIsDirectory {
                    path: path_file_dst,
                },
            );
            return;
        }
        Ok(v) => Some(v),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::FileCopy {
                    path: path_file_dst,
                    source: e,
                },
            );
            return;
        }
    };

    let spec_merge_options = spec_merge_ctx.spec_merge_options;
    let enum_decision = spec_merge_options
        .rule_conflict
        .decide(&meta_src, meta_dst.as_ref());
    tracing::debug!(path = %path_rel.display(), decision = ?enum_decision, "conflict policy");
    if enum_decision == EnumCopyDecision::Skip || spec_merge_options.if_dry_run {
        spec_merge_ctx.builder_outcome.add_skipped(path_rel);
        return;
    }

    match (spec_merge_options.fn_copy_file)(path_file_src, &path_file_dst) {
        Ok(()) => spec_merge_ctx.builder_outcome.add_copied(path_rel, Vec::new()),
        Err(err) if err.is_soft() => {
            tracing::warn!(error = %err, "file copied without metadata");
            spec_merge_ctx.builder_outcome.add_copied(path_rel, vec![err]);
        }
        Err(err) => spec_merge_ctx.builder_outcome.add_failed(path_rel, err),
    }
}

/// Recreate a symlink as a symlink. Conflict policy sees link metadata.
fn handle_symlink_entry(entry: &WalkEntry, spec_merge_ctx: &mut SpecMergeContext<'_>) {
    let path_rel = spec_merge_ctx.relative_of(entry);
    let path_link_src = entry.path.as_path();
    let Some(path_link_dst) = spec_merge_ctx.destination_of(&path_rel) else {
        return;
    };

    let meta_src = match fs::symlink_metadata(path_link_src) {
        Ok(v) => v,
        Err(e) => {
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::FileCopy {
                    path: path_link_src.to_path_buf(),
                    source: e,
                },
            );
            return;
        }
    };
    let meta_dst = match fs::symlink_metadata(&path_link_dst) {
        Ok(v) if v.is_dir() => {
            spec_merge_ctx.builder_outcome.add_failed(
                path_rel,
                TreeError::DestinationIsDirectory {
                    path: path_link_dst,
                },
            );
            return;
        }
        Ok(v) => Some(v),
        Err(_) => None,
    };

    let spec_merge_options = spec_merge_ctx.spec_merge_options;
    let enum_decision = spec_merge_options
        .rule_conflict
        .decide(&meta_src, meta_dst.as_ref());
    if enum_decision == EnumCopyDecision::Skip || spec_merge_options.if_dry_run {
        spec_merge_ctx.builder_outcome.add_skipped(path_rel);
        return;
    }

    let res_link = match meta_dst {
        Some(_) => fs::remove_file(&path_link_dst),
        None => Ok(()),
    }
    .and_then(|_| create_symbolic_link(path_link_src, &path_link_dst));
    match res_link {
        Ok(()) => spec_merge_ctx.builder_outcome.add_copied(path_rel, Vec::new()),
        Err(e) => spec_merge_ctx.builder_outcome.add_failed(
            path_rel,
            TreeError::FileCopy {
                path: path_link_src.to_path_buf(),
                source: e,
            },
        ),
    }
}

/// Children-first, so writes into a directory do not bump its restored mtime.
fn apply_dir_metadata(spec_merge_ctx: &mut SpecMergeContext<'_>) {
    let l_dirs_meta = std::mem::take(&mut spec_merge_ctx.l_dirs_meta);
    for (path_dir_src, path_dir_dst) in l_dirs_meta.into_iter().rev() {
        if let Err(e) = apply_metadata(&path_dir_src, &path_dir_dst) {
            let message = format!(
                "Failed to preserve directory metadata on {} ({e})",
                path_dir_dst.display()
            );
            tracing::warn!("{message}");
            spec_merge_ctx.builder_outcome.add_warning(message);
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};

    use filetime::{FileTime, set_file_mtime};

    use super::{EnumMergeConflictPolicy, copy_file_with_metadata, merge_tree, merge_tree_with};
    use crate::matcher::Matcher;
    use crate::report::EnumMergeEntryState;
    use crate::spec::{EnumCopyDecision, EnumMergeStatus, SpecMergeOptions, TreeError};

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    fn read_text(path: &Path) -> String {
        std::fs::read_to_string(path).expect("read text")
    }

    fn set_mtime(path: &Path, n_secs: i64) {
        set_file_mtime(path, FileTime::from_unix_time(n_secs, 0)).expect("set mtime");
    }

    #[test]
    fn merge_copies_tree_and_creates_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "A");
        write_text(&src.join("sub/b.txt"), "B");
        write_text(&src.join("sub/deep/c.txt"), "C");

        let outcome = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::Always,
            copy_file_with_metadata,
        )
        .expect("merge");

        assert_eq!(outcome.status(), EnumMergeStatus::Succeeded);
        assert_eq!(outcome.cnt_copied, 3);
        assert_eq!(outcome.cnt_dirs_created, 2);
        assert_eq!(read_text(&dst.join("sub/deep/c.txt")), "C");
        assert!(matches!(
            outcome.get("sub/b.txt"),
            Some(EnumMergeEntryState::Copied { .. })
        ));
    }

    #[test]
    fn merge_overwrites_existing_destination_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "new");
        write_text(&dst.join("a.txt"), "old");
        write_text(&dst.join("extra.txt"), "kept");

        merge_tree(&src, &dst, EnumMergeConflictPolicy::Always, copy_file_with_metadata)
            .expect("merge");
        assert_eq!(read_text(&dst.join("a.txt")), "new");
        assert_eq!(read_text(&dst.join("extra.txt")), "kept");
    }

    #[test]
    fn newer_only_second_run_copies_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "A");
        write_text(&src.join("sub/b.txt"), "B");

        let outcome_first = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::NewerOnly,
            copy_file_with_metadata,
        )
        .expect("merge");
        assert_eq!(outcome_first.cnt_copied, 2);

        let outcome_second = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::NewerOnly,
            copy_file_with_metadata,
        )
        .expect("merge");
        assert_eq!(outcome_second.cnt_copied, 0);
        assert_eq!(outcome_second.cnt_skipped, 2);
        assert_eq!(outcome_second.status(), EnumMergeStatus::SucceededWithSkips);
    }

    #[test]
    fn newer_only_tie_boundary() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_src = tmp.path().join("src.txt");
        let path_dst = tmp.path().join("dst.txt");
        write_text(&path_src, "s");
        write_text(&path_dst, "d");
        set_mtime(&path_src, 1_700_000_000);
        set_mtime(&path_dst, 1_700_000_000);

        let policy = EnumMergeConflictPolicy::NewerOnly;
        let meta_src = std::fs::metadata(&path_src).expect("meta");
        let meta_dst = std::fs::metadata(&path_dst).expect("meta");
        assert_eq!(policy.decide(&meta_src, Some(&meta_dst)), EnumCopyDecision::Skip);

        set_mtime(&path_dst, 1_699_999_999);
        let meta_dst = std::fs::metadata(&path_dst).expect("meta");
        assert_eq!(policy.decide(&meta_src, Some(&meta_dst)), EnumCopyDecision::Copy);
        assert_eq!(policy.decide(&meta_src, None), EnumCopyDecision::Copy);
    }

    #[test]
    fn skip_policy_only_fills_gaps() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "new");
        write_text(&src.join("b.txt"), "new");
        write_text(&dst.join("a.txt"), "old");

        let outcome = merge_tree(&src, &dst, EnumMergeConflictPolicy::Skip, copy_file_with_metadata)
            .expect("merge");
        assert_eq!(read_text(&dst.join("a.txt")), "old");
        assert_eq!(read_text(&dst.join("b.txt")), "new");
        assert_eq!(outcome.skipped().collect::<Vec<_>>(), [Path::new("a.txt")]);
    }

    #[test]
    fn custom_conflict_policy_sees_both_sides() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("big.txt"), "0123456789");
        write_text(&dst.join("big.txt"), "01234567890123456789");

        let policy = EnumMergeConflictPolicy::custom(|meta_src, meta_dst| match meta_dst {
            Some(meta_dst) if meta_dst.len() > meta_src.len() => EnumCopyDecision::Skip,
            _ => EnumCopyDecision::Copy,
        });
        let outcome = merge_tree(&src, &dst, policy, copy_file_with_metadata).expect("merge");
        assert_eq!(outcome.cnt_skipped, 1);
        assert_eq!(read_text(&dst.join("big.txt")).len(), 20);
    }

    #[test]
    fn failed_copy_does_not_stop_siblings() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        for name in ["a.txt", "b.txt", "c.txt"] {
            write_text(&src.join(name), name);
        }

        let outcome = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::NewerOnly,
            |path_src: &Path, path_dst: &Path| {
                if path_src.ends_with("b.txt") {
                    return Err(TreeError::FileCopy {
                        path: path_src.to_path_buf(),
                        source: io::Error::from(io::ErrorKind::PermissionDenied),
                    });
                }
                copy_file_with_metadata(path_src, path_dst)
            },
        )
        .expect("merge");

        assert_eq!(outcome.status(), EnumMergeStatus::CompletedWithFailures);
        let l_failed: Vec<PathBuf> = outcome.failed().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(l_failed, [PathBuf::from("b.txt")]);
        assert_eq!(read_text(&dst.join("a.txt")), "a.txt");
        assert_eq!(read_text(&dst.join("c.txt")), "c.txt");
        assert!(!dst.join("b.txt").exists());

        // Retry picks up only the missing file.
        let outcome_retry = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::NewerOnly,
            copy_file_with_metadata,
        )
        .expect("merge");
        assert_eq!(outcome_retry.copied().collect::<Vec<_>>(), [Path::new("b.txt")]);
        assert!(outcome_retry.is_success());
    }

    #[test]
    fn destination_type_conflict_fails_subtree_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a/x.txt"), "x");
        write_text(&src.join("b/y.txt"), "y");
        write_text(&src.join("c/z.txt"), "z");
        write_text(&dst.join("b"), "i am a file");

        let outcome = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::Always,
            copy_file_with_metadata,
        )
        .expect("merge");

        assert_eq!(outcome.status(), EnumMergeStatus::CompletedWithFailures);
        assert!(matches!(
            outcome.get("b"),
            Some(EnumMergeEntryState::Failed(TreeError::DestinationConflict { .. }))
        ));
        assert!(outcome.get("b/y.txt").is_none());
        assert_eq!(read_text(&dst.join("a/x.txt")), "x");
        assert_eq!(read_text(&dst.join("c/z.txt")), "z");
        assert_eq!(read_text(&dst.join("b")), "i am a file");
    }

    #[test]
    fn directory_in_place_of_file_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("item"), "file");
        std::fs::create_dir_all(dst.join("item")).expect("mkdir");

        let outcome = merge_tree(&src, &dst, EnumMergeConflictPolicy::Always, copy_file_with_metadata)
            .expect("merge");
        assert!(matches!(
            outcome.get("item"),
            Some(EnumMergeEntryState::Failed(TreeError::DestinationIsDirectory { .. }))
        ));
    }

    #[test]
    fn metadata_failure_is_soft() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "A");

        let outcome = merge_tree(
            &src,
            &dst,
            EnumMergeConflictPolicy::Always,
            |path_src: &Path, path_dst: &Path| {
                std::fs::copy(path_src, path_dst).map_err(|e| TreeError::FileCopy {
                    path: path_src.to_path_buf(),
                    source: e,
                })?;
                Err(TreeError::MetadataPreservation {
                    path: path_dst.to_path_buf(),
                    source: io::Error::other("utime rejected"),
                })
            },
        )
        .expect("merge");

        assert!(outcome.is_success());
        assert_eq!(outcome.cnt_copied, 1);
        assert_eq!(outcome.soft_failure_count(), 1);
        assert_eq!(read_text(&dst.join("a.txt")), "A");
    }

    #[test]
    fn default_copy_preserves_mtime() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_src = tmp.path().join("a.txt");
        let path_dst = tmp.path().join("b.txt");
        write_text(&path_src, "A");
        let time_old = SystemTime::now() - Duration::from_secs(3600);
        set_file_mtime(&path_src, FileTime::from_system_time(time_old)).expect("mtime");

        copy_file_with_metadata(&path_src, &path_dst).expect("copy");
        let meta_src = std::fs::metadata(&path_src).expect("meta");
        let meta_dst = std::fs::metadata(&path_dst).expect("meta");
        assert_eq!(
            FileTime::from_last_modification_time(&meta_src),
            FileTime::from_last_modification_time(&meta_dst)
        );
    }

    #[test]
    fn dry_run_writes_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("sub/a.txt"), "A");

        let spec_merge_options = SpecMergeOptions {
            if_dry_run: true,
            ..SpecMergeOptions::default()
        };
        let outcome = merge_tree_with(&src, &dst, &spec_merge_options).expect("merge");
        assert!(!dst.exists());
        assert_eq!(outcome.cnt_copied, 0);
        assert_eq!(outcome.cnt_skipped, 1);
        assert_eq!(outcome.cnt_dirs_created, 0);
    }

    #[test]
    fn exclude_matcher_prunes_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("keep.txt"), "k");
        write_text(&src.join("debug.log"), "l");
        write_text(&src.join("__pycache__/m.pyc"), "c");

        let spec_merge_options = SpecMergeOptions {
            matcher_exclude: Some(Matcher::custom(|name| {
                name.ends_with(".log") || name == "__pycache__"
            })),
            ..SpecMergeOptions::default()
        };
        let outcome = merge_tree_with(&src, &dst, &spec_merge_options).expect("merge");
        assert!(dst.join("keep.txt").exists());
        assert!(!dst.join("debug.log").exists());
        assert!(!dst.join("__pycache__").exists());
        assert_eq!(outcome.cnt_excluded, 2);
        assert_eq!(outcome.cnt_copied, 1);
        assert_eq!(outcome.status(), EnumMergeStatus::Succeeded);
        assert!(outcome.get("debug.log").is_none());
    }

    #[test]
    fn setup_errors_are_returned() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        write_text(&src.join("a.txt"), "A");

        let err = merge_tree_with(&src, src.join("nested"), &SpecMergeOptions::default())
            .expect_err("overlap");
        assert!(matches!(err, TreeError::SourceDestinationOverlap { .. }));

        let err = merge_tree_with(
            tmp.path().join("absent"),
            tmp.path().join("dst"),
            &SpecMergeOptions::default(),
        )
        .expect_err("missing source");
        assert!(matches!(err, TreeError::SourceNotDirectory(_)));

        let path_file = tmp.path().join("plain.txt");
        write_text(&path_file, "x");
        let err = merge_tree_with(&src, &path_file, &SpecMergeOptions::default())
            .expect_err("file destination");
        assert!(matches!(err, TreeError::DestinationConflict { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_recreated_when_requested() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("target.txt"), "T");
        symlink("target.txt", src.join("link.txt")).expect("symlink");

        let spec_merge_options = SpecMergeOptions {
            if_copy_symlinks: true,
            ..SpecMergeOptions::default()
        };
        let outcome = merge_tree_with(&src, &dst, &spec_merge_options).expect("merge");
        assert!(outcome.is_success());
        let target = std::fs::read_link(dst.join("link.txt")).expect("read link");
        assert_eq!(target, PathBuf::from("target.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_skipped_by_default() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let other = tmp.path().join("other");
        write_text(&other.join("o.txt"), "o");
        std::fs::create_dir_all(&src).expect("mkdir");
        symlink(&other, src.join("linked")).expect("symlink");

        let outcome = merge_tree_with(&src, &dst, &SpecMergeOptions::default()).expect("merge");
        assert_eq!(outcome.skipped().collect::<Vec<_>>(), [Path::new("linked")]);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(!dst.join("linked").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_destination_root_is_rejected() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let real = tmp.path().join("real");
        write_text(&src.join("a.txt"), "A");
        std::fs::create_dir_all(&real).expect("mkdir");
        symlink(&real, tmp.path().join("alias")).expect("symlink");

        let err = merge_tree_with(&src, tmp.path().join("alias"), &SpecMergeOptions::default())
            .expect_err("symlink root");
        assert!(matches!(err, TreeError::UnsafeDestination { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_source_directory_is_reported_and_siblings_copied() {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "A");
        write_text(&src.join("locked/inner.txt"), "I");
        write_text(&src.join("z.txt"), "Z");

        let path_locked = src.join("locked");
        std::fs::set_permissions(&path_locked, Permissions::from_mode(0o000)).expect("chmod");
        // Privileged users can still read it.
        if std::fs::read_dir(&path_locked).is_ok() {
            std::fs::set_permissions(&path_locked, Permissions::from_mode(0o755))
                .expect("chmod");
            return;
        }

        let outcome = merge_tree_with(&src, &dst, &SpecMergeOptions::default());
        std::fs::set_permissions(&path_locked, Permissions::from_mode(0o755)).expect("chmod");
        if dst.join("locked").exists() {
            std::fs::set_permissions(dst.join("locked"), Permissions::from_mode(0o755))
                .expect("chmod");
        }
        let outcome = outcome.expect("merge");

        assert_eq!(outcome.status(), EnumMergeStatus::CompletedWithFailures);
        let l_failed: Vec<PathBuf> = outcome.failed().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(l_failed, [PathBuf::from("locked")]);
        assert!(matches!(
            outcome.get("locked"),
            Some(EnumMergeEntryState::Failed(TreeError::DirectoryRead { .. }))
        ));
        assert_eq!(read_text(&dst.join("a.txt")), "A");
        assert_eq!(read_text(&dst.join("z.txt")), "Z");
        assert!(!dst.join("locked/inner.txt").exists());
    }
}
