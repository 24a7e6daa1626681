//! Listing, search, and recursive deletion built on [`walk`].

use std::fs;
use std::io;
use std::sync::Arc;

use crate::matcher::Matcher;
use crate::path::{PathGrammar, PathHandle};
use crate::policy::{EnumWalkErrorHandler, TraversalPolicy};
use crate::spec::TreeError;
use crate::walk::{WalkEntry, walk};

/// Immediate children of `dir` whose name matches, sorted by name.
pub fn list_dir(dir: impl Into<PathHandle>, matcher: &Matcher) -> Result<Vec<PathHandle>, TreeError> {
    list_children(dir.into(), matcher, |_| true)
}

/// Immediate child files (or symlinks to files) of `dir`.
pub fn list_files(
    dir: impl Into<PathHandle>,
    matcher: &Matcher,
) -> Result<Vec<PathHandle>, TreeError> {
    list_children(dir.into(), matcher, |e| e.is_file)
}

/// Immediate child directories (or symlinks to directories) of `dir`.
pub fn list_dirs(
    dir: impl Into<PathHandle>,
    matcher: &Matcher,
) -> Result<Vec<PathHandle>, TreeError> {
    list_children(dir.into(), matcher, |e| e.is_dir)
}

fn list_children<F>(
    dir: PathHandle,
    matcher: &Matcher,
    fn_keep: F,
) -> Result<Vec<PathHandle>, TreeError>
where
    F: Fn(&WalkEntry) -> bool,
{
    let policy = TraversalPolicy::default().with_depth_limit(1);
    let mut l_paths = Vec::new();
    for res_entry in walk(dir, matcher.clone(), policy) {
        let entry = res_entry?;
        if entry.matched && fn_keep(&entry) {
            l_paths.push(entry.path);
        }
    }
    Ok(l_paths)
}

/// Every matched descendant of `root`, recursively.
pub fn walk_matched(
    root: impl Into<PathHandle>,
    matcher: Matcher,
    policy: TraversalPolicy,
) -> impl Iterator<Item = Result<PathHandle, TreeError>> {
    walk(root, matcher, policy).filter_map(|res_entry| match res_entry {
        Ok(entry) if entry.matched => Some(Ok(entry.path)),
        Ok(_) => None,
        Err(err) => Some(Err(err)),
    })
}

/// Matched files below `root`, recursively.
pub fn walk_files(
    root: impl Into<PathHandle>,
    matcher: Matcher,
    policy: TraversalPolicy,
) -> impl Iterator<Item = Result<PathHandle, TreeError>> {
    walk_filtered(root.into(), matcher, policy, |e| e.is_file)
}

/// Matched directories below `root`, recursively.
pub fn walk_dirs(
    root: impl Into<PathHandle>,
    matcher: Matcher,
    policy: TraversalPolicy,
) -> impl Iterator<Item = Result<PathHandle, TreeError>> {
    walk_filtered(root.into(), matcher, policy, |e| e.is_dir)
}

fn walk_filtered(
    root: PathHandle,
    matcher: Matcher,
    policy: TraversalPolicy,
    fn_keep: fn(&WalkEntry) -> bool,
) -> impl Iterator<Item = Result<PathHandle, TreeError>> {
    walk(root, matcher, policy).filter_map(move |res_entry| match res_entry {
        Ok(entry) if entry.matched && fn_keep(&entry) => Some(Ok(entry.path)),
        Ok(_) => None,
        Err(err) => Some(Err(err)),
    })
}

/// Whether the base name of `path` matches the shell glob `pattern`, using
/// the case rule of the handle's grammar.
pub fn fnmatch(path: &PathHandle, pattern: &str) -> Result<bool, TreeError> {
    let matcher = Matcher::for_grammar(pattern, &path.grammar())?;
    Ok(matcher.matches(&path.name()))
}

/// One segment of a relative glob.
#[derive(Debug)]
struct SpecGlobSegment {
    matcher: Matcher,
    /// Dot-names only match segments that start with a dot.
    if_hidden: bool,
}

impl SpecGlobSegment {
    fn compile(segment: &str, grammar: &PathGrammar) -> Result<Self, TreeError> {
        Ok(Self {
            matcher: Matcher::for_grammar(segment, grammar)?,
            if_hidden: segment.starts_with('.'),
        })
    }

    fn matches(&self, name: &str) -> bool {
        if name.starts_with('.') && !self.if_hidden {
            return false;
        }
        self.matcher.matches(name)
    }
}

/// Lazy form of [`glob`].
pub fn iglob(
    root: impl Into<PathHandle>,
    pattern: &str,
) -> Result<impl Iterator<Item = PathHandle>, TreeError> {
    let root: PathHandle = root.into();
    let grammar = root.grammar();
    let l_segments = pattern
        .split(|c: char| c == grammar.separator || Some(c) == grammar.separator_alt)
        .filter(|s| !s.is_empty())
        .map(|s| SpecGlobSegment::compile(s, &grammar))
        .collect::<Result<Vec<_>, _>>()?;
    let n_segments = l_segments.len();
    let l_segments = Arc::new(l_segments);

    // Only descend where the directory matches the segment at its depth.
    let l_segments_descend = Arc::clone(&l_segments);
    let policy = TraversalPolicy::default()
        .with_error_handler(EnumWalkErrorHandler::Ignore)
        .with_depth_limit(n_segments)
        .with_descend(move |e| {
            e.depth < n_segments && l_segments_descend[e.depth - 1].matches(&e.name())
        });

    Ok(walk(root, Matcher::Null, policy)
        .filter_map(Result::ok)
        .filter(move |e| {
            e.depth == n_segments && l_segments[n_segments - 1].matches(&e.name())
        })
        .map(|e| e.path))
}

/// Paths below `root` matching the relative wildcard `pattern`, e.g.
/// `sub/*/*.py`.
///
/// The pattern is split on the root's grammar separators and every segment is
/// matched against the entry name at that depth. Unreadable directories are
/// skipped and symlinked directories are followed. Names starting with a dot
/// only match segments that do too.
pub fn glob(root: impl Into<PathHandle>, pattern: &str) -> Result<Vec<PathHandle>, TreeError> {
    Ok(iglob(root, pattern)?.collect())
}

/// Delete every matched entry below `root` and return what was removed.
///
/// The walk runs children-first whatever order `policy` asks for. A matched
/// directory is removed with everything still inside it; symlinks are
/// removed, never followed, even when `policy` follows them.
pub fn remove_matching(
    root: impl Into<PathHandle>,
    matcher: Matcher,
    policy: TraversalPolicy,
) -> Result<Vec<PathHandle>, TreeError> {
    let fn_descend_prev = policy.fn_descend.clone();
    let policy = policy.post_order().with_descend(move |e| {
        !e.is_symlink && fn_descend_prev.as_ref().is_none_or(|fn_descend| fn_descend(e))
    });
    let mut l_removed = Vec::new();
    for res_entry in walk(root, matcher, policy) {
        let entry = res_entry?;
        if !entry.matched {
            continue;
        }
        let res_remove = if entry.is_dir && !entry.is_symlink {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        };
        match res_remove {
            Ok(()) => {
                tracing::debug!(path = %entry.path, "removed");
                l_removed.push(entry.path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TreeError::Remove {
                    path: entry.path.into_path_buf(),
                    source: e,
                });
            }
        }
    }
    Ok(l_removed)
}
