//! Merge outcome model and mutable outcome builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::spec::{EnumMergeStatus, TreeError};

/// Result for one entry of a merge, keyed by its path relative to the tree root.
#[derive(Debug)]
pub enum EnumMergeEntryState {
    /// Content was copied. Soft failures (metadata) are kept alongside.
    Copied { soft_failures: Vec<TreeError> },
    /// Left alone by the conflict policy, dry-run, or an unsupported entry type.
    Skipped,
    /// Copy failed or the destination subtree could not be created.
    Failed(TreeError),
}

impl EnumMergeEntryState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Aggregate per-entry results of one `merge_tree` run.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Total scanned source entries.
    pub cnt_scanned: u64,
    /// Files (and recreated symlinks) copied.
    pub cnt_copied: u64,
    /// Files skipped.
    pub cnt_skipped: u64,
    /// Entries pruned by the exclude matcher; their subtrees are not counted.
    pub cnt_excluded: u64,
    /// Failed entries.
    pub cnt_failed: u64,
    /// Destination directories created.
    pub cnt_dirs_created: u64,
    /// Non-fatal notes that are not tied to an entry result.
    pub warnings: Vec<String>,
    /// Per-entry results.
    pub entries: BTreeMap<PathBuf, EnumMergeEntryState>,
}

impl MergeOutcome {
    pub fn status(&self) -> EnumMergeStatus {
        if self.cnt_failed > 0 {
            EnumMergeStatus::CompletedWithFailures
        } else if self.cnt_skipped > 0 {
            EnumMergeStatus::SucceededWithSkips
        } else {
            EnumMergeStatus::Succeeded
        }
    }

    /// True when every entry was copied or skipped.
    pub fn is_success(&self) -> bool {
        self.cnt_failed == 0
    }

    pub fn get(&self, path_rel: impl AsRef<Path>) -> Option<&EnumMergeEntryState> {
        self.entries.get(path_rel.as_ref())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Path, &TreeError)> {
        self.entries.iter().filter_map(|(path, state)| match state {
            EnumMergeEntryState::Failed(err) => Some((path.as_path(), err)),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter_map(|(path, state)| match state {
            EnumMergeEntryState::Skipped => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn copied(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter_map(|(path, state)| match state {
            EnumMergeEntryState::Copied { .. } => Some(path.as_path()),
            _ => None,
        })
    }

    /// Number of metadata-preservation failures on copied files.
    pub fn soft_failure_count(&self) -> usize {
        self.entries
            .values()
            .map(|state| match state {
                EnumMergeEntryState::Copied { soft_failures } => soft_failures.len(),
                _ => 0,
            })
            .sum()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_scanned".to_string(), self.cnt_scanned);
        dict_counts.insert("cnt_copied".to_string(), self.cnt_copied);
        dict_counts.insert("cnt_skipped".to_string(), self.cnt_skipped);
        dict_counts.insert("cnt_excluded".to_string(), self.cnt_excluded);
        dict_counts.insert("cnt_failed".to_string(), self.cnt_failed);
        dict_counts.insert("cnt_dirs_created".to_string(), self.cnt_dirs_created);
        dict_counts.insert("cnt_warnings".to_string(), self.warnings.len() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        format!(
            "{prefix} scanned={} copied={} skipped={} excluded={} failed={} dirs_created={} warnings={}",
            dict_counts["cnt_scanned"],
            dict_counts["cnt_copied"],
            dict_counts["cnt_skipped"],
            dict_counts["cnt_excluded"],
            dict_counts["cnt_failed"],
            dict_counts["cnt_dirs_created"],
            dict_counts["cnt_warnings"]
        )
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[MERGE]"))
    }
}

/// Mutable accumulator used while a merge is running.
#[derive(Debug, Default)]
pub struct MergeOutcomeBuilder {
    outcome: MergeOutcome,
}

impl MergeOutcomeBuilder {
    pub fn add_scanned(&mut self) {
        self.outcome.cnt_scanned += 1;
    }

    pub fn add_dir_created(&mut self) {
        self.outcome.cnt_dirs_created += 1;
    }

    pub fn add_copied(&mut self, path_rel: PathBuf, soft_failures: Vec<TreeError>) {
        self.outcome.cnt_copied += 1;
        self.outcome
            .entries
            .insert(path_rel, EnumMergeEntryState::Copied { soft_failures });
    }

    pub fn add_skipped(&mut self, path_rel: PathBuf) {
        self.outcome.cnt_skipped += 1;
        self.outcome
            .entries
            .insert(path_rel, EnumMergeEntryState::Skipped);
    }

    /// Excluded entries get no per-entry state.
    pub fn add_excluded(&mut self) {
        self.outcome.cnt_excluded += 1;
    }

    pub fn add_failed(&mut self, path_rel: PathBuf, err: TreeError) {
        self.outcome.cnt_failed += 1;
        self.outcome
            .entries
            .insert(path_rel, EnumMergeEntryState::Failed(err));
    }

    pub fn add_warning(&mut self, warning: String) {
        self.outcome.warnings.push(warning);
    }

    /// Finalize builder into an immutable outcome.
    pub fn build(self) -> MergeOutcome {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::{Path, PathBuf};

    use super::{EnumMergeEntryState, MergeOutcome, MergeOutcomeBuilder};
    use crate::spec::{EnumMergeStatus, TreeError};

    #[test]
    fn outcome_to_dict_and_format() {
        let outcome = MergeOutcome {
            cnt_scanned: 8,
            cnt_copied: 3,
            cnt_skipped: 2,
            cnt_excluded: 4,
            cnt_failed: 1,
            cnt_dirs_created: 2,
            warnings: vec!["w".to_string()],
            ..MergeOutcome::default()
        };

        let dict_counts = outcome.to_dict();
        assert_eq!(dict_counts["cnt_scanned"], 8);
        assert_eq!(dict_counts["cnt_excluded"], 4);
        assert_eq!(dict_counts["cnt_failed"], 1);
        assert_eq!(dict_counts["cnt_warnings"], 1);

        let txt = outcome.format("[MERGE]");
        assert_eq!(
            txt,
            "[MERGE] scanned=8 copied=3 skipped=2 excluded=4 failed=1 dirs_created=2 warnings=1"
        );
        assert_eq!(outcome.to_string(), txt);
    }

    #[test]
    fn status_reflects_worst_entry() {
        let mut builder = MergeOutcomeBuilder::default();
        builder.add_copied(PathBuf::from("a.txt"), vec![]);
        assert_eq!(builder.outcome.status(), EnumMergeStatus::Succeeded);

        builder.add_skipped(PathBuf::from("b.txt"));
        assert_eq!(builder.outcome.status(), EnumMergeStatus::SucceededWithSkips);

        builder.add_failed(
            PathBuf::from("c.txt"),
            TreeError::FileCopy {
                path: PathBuf::from("c.txt"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        );
        let outcome = builder.build();
        assert_eq!(outcome.status(), EnumMergeStatus::CompletedWithFailures);
        assert!(!outcome.is_success());

        let l_failed: Vec<_> = outcome.failed().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(l_failed, [PathBuf::from("c.txt")]);
        assert_eq!(outcome.skipped().collect::<Vec<_>>(), [Path::new("b.txt")]);
        assert_eq!(outcome.copied().collect::<Vec<_>>(), [Path::new("a.txt")]);
        assert!(matches!(
            outcome.get("c.txt"),
            Some(EnumMergeEntryState::Failed(_))
        ));
    }

    #[test]
    fn soft_failures_keep_file_copied() {
        let mut builder = MergeOutcomeBuilder::default();
        builder.add_copied(
            PathBuf::from("meta.txt"),
            vec![TreeError::MetadataPreservation {
                path: PathBuf::from("meta.txt"),
                source: io::Error::other("utime"),
            }],
        );
        let outcome = builder.build();
        assert!(outcome.is_success());
        assert_eq!(outcome.soft_failure_count(), 1);
        assert_eq!(outcome.cnt_copied, 1);
    }
}
