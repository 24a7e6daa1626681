//! Lazy depth-first directory traversal.
//!
//! [`walk`] returns a [`TreeWalker`], a forward-only iterator that reads one
//! directory listing per expansion step. Listings are read fully and the
//! directory handle is closed before any child is yielded, so abandoning the
//! iterator early never leaks handles.
//!
//! Every entry is yielded; [`WalkEntry::matched`] carries the [`Matcher`]
//! verdict for its basename and callers filter on it.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fs;

use crate::matcher::Matcher;
use crate::path::PathHandle;
use crate::policy::{EnumWalkErrorAction, TraversalPolicy};
use crate::spec::{EnumWalkOrder, TreeError};
use crate::util::{DirIdentity, identify_dir};

/// One traversal step.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathHandle,
    /// Root is 0, its children 1.
    pub depth: usize,
    /// Directory, or symlink to one.
    pub is_dir: bool,
    /// Regular file, or symlink to one.
    pub is_file: bool,
    pub is_symlink: bool,
    /// Matcher verdict on the basename.
    pub matched: bool,
}

impl WalkEntry {
    pub fn name(&self) -> Cow<'_, str> {
        self.path.name()
    }

    /// Symlink whose target is missing.
    pub fn is_broken_symlink(&self) -> bool {
        self.is_symlink && !self.is_dir && !self.is_file
    }

    fn from_path(path: PathHandle, depth: usize, matcher: &Matcher) -> Self {
        let b_is_symlink = fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        let (b_is_dir, b_is_file) = fs::metadata(&path)
            .map(|m| (m.is_dir(), m.is_file()))
            .unwrap_or((false, false));
        let b_matched = matcher.matches(&path.name());
        Self {
            path,
            depth,
            is_dir: b_is_dir,
            is_file: b_is_file,
            is_symlink: b_is_symlink,
            matched: b_matched,
        }
    }
}

/// Start/visiting/done state of a [`TreeWalker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumWalkState {
    Start,
    Visiting,
    Done,
}

/// One directory on the current descent path.
#[derive(Debug)]
struct SpecWalkFrame {
    iter_children: std::vec::IntoIter<WalkEntry>,
    identity: DirIdentity,
    /// Post-order only: the directory entry, yielded once children are exhausted.
    entry_dir: Option<WalkEntry>,
}

/// Lazy iterator over the tree below a root.
///
/// Yields `Err` for directory-read failures the policy chose to report; after
/// an aborting error the iterator is exhausted.
#[derive(Debug)]
pub struct TreeWalker {
    root: PathHandle,
    matcher: Matcher,
    policy: TraversalPolicy,
    state: EnumWalkState,
    l_frames: Vec<SpecWalkFrame>,
    /// Pre-order only: directory yielded last, expanded on the next pull.
    entry_pending: Option<WalkEntry>,
    l_queue_out: VecDeque<Result<WalkEntry, TreeError>>,
}

/// Walk the tree under `root`.
///
/// See [`TraversalPolicy`] for the knobs; the default yields every descendant
/// (not the root) in pre-order, siblings sorted by name.
pub fn walk(root: impl Into<PathHandle>, matcher: Matcher, policy: TraversalPolicy) -> TreeWalker {
    TreeWalker::new(root.into(), matcher, policy)
}

impl TreeWalker {
    pub fn new(root: PathHandle, matcher: Matcher, policy: TraversalPolicy) -> Self {
        Self {
            root,
            matcher,
            policy,
            state: EnumWalkState::Start,
            l_frames: Vec::new(),
            entry_pending: None,
            l_queue_out: VecDeque::new(),
        }
    }

    pub fn root(&self) -> &PathHandle {
        &self.root
    }

    pub fn policy(&self) -> &TraversalPolicy {
        &self.policy
    }

    /// Do not descend into the directory that was just yielded.
    ///
    /// Pre-order only. Returns `false` when there was nothing to skip.
    pub fn skip_descend(&mut self) -> bool {
        self.entry_pending.take().is_some()
    }

    /// Current descent depth (number of open directories).
    pub fn depth(&self) -> usize {
        self.l_frames.len()
    }

    fn is_on_descent_path(&self, identity: &DirIdentity) -> bool {
        self.l_frames.iter().any(|f| &f.identity == identity)
    }

    fn start(&mut self) {
        self.state = EnumWalkState::Visiting;
        let entry_root = WalkEntry::from_path(self.root.clone(), 0, &self.matcher);
        let b_can_expand = self.policy.depth_limit != Some(0);

        match (self.policy.if_include_root, self.policy.rule_order) {
            (false, _) => {
                if b_can_expand {
                    self.expand(entry_root, None);
                }
            }
            (true, EnumWalkOrder::PreOrder) => {
                if b_can_expand {
                    self.entry_pending = Some(entry_root.clone());
                }
                self.l_queue_out.push_back(Ok(entry_root));
            }
            (true, EnumWalkOrder::PostOrder) => {
                if b_can_expand {
                    self.expand(entry_root.clone(), Some(entry_root));
                } else {
                    self.l_queue_out.push_back(Ok(entry_root));
                }
            }
        }
    }

    /// Handle one traversal error. Returns `false` when the walk must stop.
    fn on_error(&mut self, err: TreeError) -> bool {
        match self.policy.rule_error.resolve(&err) {
            EnumWalkErrorAction::Abort => {
                self.l_queue_out.push_back(Err(err));
                self.state = EnumWalkState::Done;
                false
            }
            EnumWalkErrorAction::Yield => {
                self.l_queue_out.push_back(Err(err));
                true
            }
            EnumWalkErrorAction::Continue => true,
        }
    }

    /// List `entry` and push a frame for it. On any outcome where no frame is
    /// pushed, `entry_after` is queued immediately so post-order still yields it.
    fn expand(&mut self, entry: WalkEntry, entry_after: Option<WalkEntry>) {
        let identity = match identify_dir(entry.path.as_path()) {
            Ok(v) => v,
            Err(e) => {
                let err = TreeError::DirectoryRead {
                    path: entry.path.as_path().to_path_buf(),
                    source: e,
                };
                if self.on_error(err) {
                    self.l_queue_out.extend(entry_after.map(Ok));
                }
                return;
            }
        };

        if self.is_on_descent_path(&identity) {
            tracing::debug!(path = %entry.path, "directory cycle detected, not descending");
            self.l_queue_out.extend(entry_after.map(Ok));
            return;
        }

        let (mut l_children, l_errors) = match read_children(&entry, &self.matcher) {
            Ok(v) => v,
            Err(err) => {
                if self.on_error(err) {
                    self.l_queue_out.extend(entry_after.map(Ok));
                }
                return;
            }
        };
        for err in l_errors {
            if !self.on_error(err) {
                return;
            }
        }

        self.policy.sort_entries(&mut l_children);
        self.l_frames.push(SpecWalkFrame {
            iter_children: l_children.into_iter(),
            identity,
            entry_dir: entry_after,
        });
    }
}

impl Iterator for TreeWalker {
    type Item = Result<WalkEntry, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.l_queue_out.pop_front() {
                return Some(item);
            }
            match self.state {
                EnumWalkState::Done => return None,
                EnumWalkState::Start => {
                    self.start();
                    continue;
                }
                EnumWalkState::Visiting => {}
            }

            if let Some(entry) = self.entry_pending.take() {
                self.expand(entry, None);
                continue;
            }

            let Some(frame) = self.l_frames.last_mut() else {
                self.state = EnumWalkState::Done;
                return None;
            };
            let Some(entry) = frame.iter_children.next() else {
                let frame = self.l_frames.pop();
                if let Some(entry_dir) = frame.and_then(|f| f.entry_dir) {
                    return Some(Ok(entry_dir));
                }
                continue;
            };

            if !self.policy.should_descend(&entry) {
                if entry.is_dir {
                    tracing::trace!(path = %entry.path, "descent vetoed");
                }
                return Some(Ok(entry));
            }
            match self.policy.rule_order {
                EnumWalkOrder::PreOrder => {
                    self.entry_pending = Some(entry.clone());
                    return Some(Ok(entry));
                }
                EnumWalkOrder::PostOrder => {
                    self.expand(entry.clone(), Some(entry));
                }
            }
        }
    }
}

/// Read the listing of `entry` into memory.
///
/// `Err` when the directory itself cannot be opened; per-entry failures are
/// returned alongside the successfully read children.
fn read_children(
    entry: &WalkEntry,
    matcher: &Matcher,
) -> Result<(Vec<WalkEntry>, Vec<TreeError>), TreeError> {
    let path_dir = &entry.path;
    let iter_entries = fs::read_dir(path_dir).map_err(|e| TreeError::DirectoryRead {
        path: path_dir.as_path().to_path_buf(),
        source: e,
    })?;

    let n_depth = entry.depth + 1;
    let mut l_children = Vec::new();
    let mut l_errors = Vec::new();
    for entry_res in iter_entries {
        let dir_entry = match entry_res {
            Ok(v) => v,
            Err(e) => {
                l_errors.push(TreeError::DirectoryRead {
                    path: path_dir.as_path().to_path_buf(),
                    source: e,
                });
                continue;
            }
        };

        let path_child = path_dir.join(dir_entry.file_name());
        let cfg_file_type = match dir_entry.file_type() {
            Ok(v) => v,
            Err(e) => {
                l_errors.push(TreeError::DirectoryRead {
                    path: path_child.into_path_buf(),
                    source: e,
                });
                continue;
            }
        };

        let b_is_symlink = cfg_file_type.is_symlink();
        let (b_is_dir, b_is_file) = if b_is_symlink {
            fs::metadata(&path_child)
                .map(|m| (m.is_dir(), m.is_file()))
                .unwrap_or((false, false))
        } else {
            (cfg_file_type.is_dir(), cfg_file_type.is_file())
        };
        let c_name = dir_entry.file_name().to_string_lossy().into_owned();
        l_children.push(WalkEntry {
            path: path_child,
            depth: n_depth,
            is_dir: b_is_dir,
            is_file: b_is_file,
            is_symlink: b_is_symlink,
            matched: matcher.matches(&c_name),
        });
    }
    Ok((l_children, l_errors))
}
