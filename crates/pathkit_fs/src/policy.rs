//! Traversal policy: descent decisions, emission order, sibling order, and
//! directory-read error handling for one walk.
//!
//! A policy is configuration only. Cycle-detection state (the ancestor stack)
//! lives in the [`TreeWalker`](crate::walk::TreeWalker) that consumes it, so
//! one policy value can drive any number of concurrent walks.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::spec::{EnumWalkOrder, TreeError};
use crate::walk::WalkEntry;

/// Veto hook: return `false` to keep a directory from being descended into.
pub type TypeDescendFn = dyn Fn(&WalkEntry) -> bool + Send + Sync;
/// Sibling comparator.
pub type TypeSortFn = dyn Fn(&WalkEntry, &WalkEntry) -> Ordering + Send + Sync;
/// Error hook: return `true` to continue the walk, `false` to abort it.
pub type TypeErrorFn = dyn Fn(&TreeError) -> bool + Send + Sync;

/// Sibling ordering inside one directory.
#[derive(Clone, Default)]
pub enum EnumWalkSort {
    /// Directory-read order. Platform and filesystem dependent.
    Native,
    /// Byte-wise lexicographic order of basenames.
    #[default]
    ByName,
    /// Caller-supplied comparator.
    Custom(Arc<TypeSortFn>),
}

/// What happens when a directory listing cannot be read.
#[derive(Clone, Default)]
pub enum EnumWalkErrorHandler {
    /// Yield the error, then end the walk.
    #[default]
    Strict,
    /// Yield the error and continue with siblings.
    Report,
    /// Log through `tracing` and continue with siblings.
    Warn,
    /// Continue with siblings silently.
    Ignore,
    /// Caller decides; the error is not yielded.
    Custom(Arc<TypeErrorFn>),
}

/// Resolved reaction to one traversal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnumWalkErrorAction {
    Abort,
    Yield,
    Continue,
}

impl EnumWalkErrorHandler {
    pub(crate) fn resolve(&self, err: &TreeError) -> EnumWalkErrorAction {
        match self {
            Self::Strict => EnumWalkErrorAction::Abort,
            Self::Report => EnumWalkErrorAction::Yield,
            Self::Warn => {
                tracing::warn!(error = %err, "walk error, skipping directory");
                EnumWalkErrorAction::Continue
            }
            Self::Ignore => EnumWalkErrorAction::Continue,
            Self::Custom(handler) => {
                if handler(err) {
                    EnumWalkErrorAction::Continue
                } else {
                    EnumWalkErrorAction::Abort
                }
            }
        }
    }
}

/// Configuration of a directory walk.
///
/// The default descends into every real directory once, in pre-order, sorted
/// by name, never through symlinks, and aborts on the first unreadable
/// directory.
#[derive(Clone, Default)]
pub struct TraversalPolicy {
    /// Directory before or after its children.
    pub rule_order: EnumWalkOrder,
    /// Sibling order.
    pub rule_sort: EnumWalkSort,
    /// Directory-read failure handling.
    pub rule_error: EnumWalkErrorHandler,
    /// Descent veto; `None` descends into every non-symlink directory.
    pub fn_descend: Option<Arc<TypeDescendFn>>,
    /// Maximum entry depth (root children are depth 1).
    pub depth_limit: Option<usize>,
    /// Yield the root itself as a depth-0 entry.
    pub if_include_root: bool,
}

impl TraversalPolicy {
    pub fn with_order(mut self, rule_order: EnumWalkOrder) -> Self {
        self.rule_order = rule_order;
        self
    }

    pub fn post_order(self) -> Self {
        self.with_order(EnumWalkOrder::PostOrder)
    }

    pub fn with_sort(mut self, rule_sort: EnumWalkSort) -> Self {
        self.rule_sort = rule_sort;
        self
    }

    pub fn with_sort_by<F>(self, compare: F) -> Self
    where
        F: Fn(&WalkEntry, &WalkEntry) -> Ordering + Send + Sync + 'static,
    {
        self.with_sort(EnumWalkSort::Custom(Arc::new(compare)))
    }

    pub fn with_error_handler(mut self, rule_error: EnumWalkErrorHandler) -> Self {
        self.rule_error = rule_error;
        self
    }

    pub fn with_error_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&TreeError) -> bool + Send + Sync + 'static,
    {
        self.with_error_handler(EnumWalkErrorHandler::Custom(Arc::new(handler)))
    }

    /// Replace the descent veto. The hook is only consulted for directories
    /// (including symlinks to directories).
    pub fn with_descend<F>(mut self, fn_descend: F) -> Self
    where
        F: Fn(&WalkEntry) -> bool + Send + Sync + 'static,
    {
        self.fn_descend = Some(Arc::new(fn_descend));
        self
    }

    /// Descend through symlinked directories too; cycles are still cut by
    /// identity checks.
    pub fn follow_symlinks(self) -> Self {
        self.with_descend(|_| true)
    }

    pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
        self.depth_limit = Some(depth_limit);
        self
    }

    pub fn include_root(mut self, if_include_root: bool) -> Self {
        self.if_include_root = if_include_root;
        self
    }

    /// Whether the walker should list the children of `entry`.
    pub fn should_descend(&self, entry: &WalkEntry) -> bool {
        if !entry.is_dir {
            return false;
        }
        if self.depth_limit.is_some_and(|n| entry.depth >= n) {
            return false;
        }
        match &self.fn_descend {
            Some(fn_descend) => fn_descend(entry),
            None => !entry.is_symlink,
        }
    }

    pub(crate) fn sort_entries(&self, l_entries: &mut [WalkEntry]) {
        match &self.rule_sort {
            EnumWalkSort::Native => {}
            EnumWalkSort::ByName => l_entries.sort_by(|a, b| a.name().cmp(&b.name())),
            EnumWalkSort::Custom(compare) => l_entries.sort_by(|a, b| compare(a, b)),
        }
    }
}

impl fmt::Debug for EnumWalkSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "Native"),
            Self::ByName => write!(f, "ByName"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl fmt::Debug for EnumWalkErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::Report => write!(f, "Report"),
            Self::Warn => write!(f, "Warn"),
            Self::Ignore => write!(f, "Ignore"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl fmt::Debug for TraversalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraversalPolicy")
            .field("rule_order", &self.rule_order)
            .field("rule_sort", &self.rule_sort)
            .field("rule_error", &self.rule_error)
            .field("fn_descend", &self.fn_descend.as_ref().map(|_| ".."))
            .field("depth_limit", &self.depth_limit)
            .field("if_include_root", &self.if_include_root)
            .finish()
    }
}
