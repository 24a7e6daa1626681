//! Path handles carrying an explicit path grammar.
//!
//! A [`PathHandle`] is a filesystem location plus the [`PathGrammar`] that
//! decides how it joins, compares, and exposes its base name. The grammar is
//! fixed at construction; switching grammars produces a new handle.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};

/// Case-normalization strategy applied before comparing names.
pub type TypeNormCase = fn(&str) -> Cow<'_, str>;

/// Identity normalization (case-sensitive platforms).
pub fn normcase_posix(value: &str) -> Cow<'_, str> {
    Cow::Borrowed(value)
}

/// Lowercase + forward slashes to backslashes, like Windows path comparison.
pub fn normcase_windows(value: &str) -> Cow<'_, str> {
    if !value.chars().any(|c| c == '/' || c.is_uppercase()) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.to_lowercase().replace('/', "\\"))
}

/// Plain case folding, independent of separators.
pub fn normcase_fold(value: &str) -> Cow<'_, str> {
    if !value.chars().any(char::is_uppercase) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.to_lowercase())
}

/// Separator, case-folding, and absolute-path rules for one path syntax.
#[derive(Debug, Clone, Copy)]
pub struct PathGrammar {
    /// Grammar identifier; two grammars are equal when their names are.
    pub name: &'static str,
    /// Separator used when joining.
    pub separator: char,
    /// Additional separator accepted when splitting.
    pub separator_alt: Option<char>,
    /// Case-normalization applied before comparisons.
    pub normcase: TypeNormCase,
}

impl PathGrammar {
    pub const POSIX: Self = Self {
        name: "posix",
        separator: '/',
        separator_alt: None,
        normcase: normcase_posix,
    };

    pub const WINDOWS: Self = Self {
        name: "windows",
        separator: '\\',
        separator_alt: Some('/'),
        normcase: normcase_windows,
    };

    /// Grammar of the running platform.
    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::WINDOWS
        } else {
            Self::POSIX
        }
    }

    fn is_separator(&self, c: char) -> bool {
        c == self.separator || Some(c) == self.separator_alt
    }

    /// Whether `value` is absolute under this grammar.
    pub fn is_absolute(&self, value: &str) -> bool {
        let mut iter_chars = value.chars();
        match iter_chars.next() {
            Some(c) if self.is_separator(c) => true,
            Some(c) if self.separator_alt.is_some() && c.is_ascii_alphabetic() => {
                iter_chars.next() == Some(':')
                    && iter_chars.next().is_some_and(|c| self.is_separator(c))
            }
            _ => false,
        }
    }

    /// Final component of `value` (empty for a bare root).
    pub fn base_name<'a>(&self, value: &'a str) -> &'a str {
        let c_trimmed = value.trim_end_matches(|c| self.is_separator(c));
        match c_trimmed.rfind(|c| self.is_separator(c)) {
            Some(idx) => &c_trimmed[idx + 1..],
            None => c_trimmed,
        }
    }

    /// Everything before the final component, if there is one.
    pub fn parent<'a>(&self, value: &'a str) -> Option<&'a str> {
        let c_trimmed = value.trim_end_matches(|c| self.is_separator(c));
        let idx = c_trimmed.rfind(|c| self.is_separator(c))?;
        if idx == 0 {
            return Some(&c_trimmed[..1]);
        }
        Some(&c_trimmed[..idx])
    }

    /// Join `segment` onto `base`; an absolute `segment` replaces `base`.
    pub fn join(&self, base: &str, segment: &str) -> String {
        if base.is_empty() || self.is_absolute(segment) {
            return segment.to_string();
        }
        let mut c_joined = String::with_capacity(base.len() + segment.len() + 1);
        c_joined.push_str(base);
        if !base.ends_with(|c| self.is_separator(c)) {
            c_joined.push(self.separator);
        }
        c_joined.push_str(segment);
        c_joined
    }
}

impl Default for PathGrammar {
    fn default() -> Self {
        Self::native()
    }
}

impl PartialEq for PathGrammar {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PathGrammar {}

impl Hash for PathGrammar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Immutable filesystem location bound to a [`PathGrammar`].
#[derive(Debug, Clone)]
pub struct PathHandle {
    path: PathBuf,
    grammar: PathGrammar,
}

impl PathHandle {
    /// Handle using the native grammar.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_grammar(path, PathGrammar::native())
    }

    pub fn with_grammar(path: impl Into<PathBuf>, grammar: PathGrammar) -> Self {
        Self {
            path: path.into(),
            grammar,
        }
    }

    pub fn grammar(&self) -> PathGrammar {
        self.grammar
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Lossy string form; used for grammar-level operations.
    pub fn as_str(&self) -> Cow<'_, str> {
        self.path.to_string_lossy()
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    fn is_native(&self) -> bool {
        self.grammar == PathGrammar::native()
    }

    /// Base name of the handle.
    pub fn name(&self) -> Cow<'_, str> {
        if self.is_native() {
            return match self.path.file_name() {
                Some(name) => name.to_string_lossy(),
                None => Cow::Borrowed(""),
            };
        }
        match self.as_str() {
            Cow::Borrowed(value) => Cow::Borrowed(self.grammar.base_name(value)),
            Cow::Owned(value) => Cow::Owned(self.grammar.base_name(&value).to_string()),
        }
    }

    pub fn join(&self, segment: impl AsRef<Path>) -> Self {
        let segment = segment.as_ref();
        if self.is_native() {
            return Self::with_grammar(self.path.join(segment), self.grammar);
        }
        let c_joined = self
            .grammar
            .join(&self.as_str(), &segment.to_string_lossy());
        Self::with_grammar(c_joined, self.grammar)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_native() {
            return self
                .path
                .parent()
                .map(|p| Self::with_grammar(p, self.grammar));
        }
        let c_value = self.as_str();
        self.grammar
            .parent(&c_value)
            .map(|p| Self::with_grammar(p, self.grammar))
    }

    pub fn is_absolute(&self) -> bool {
        self.grammar.is_absolute(&self.as_str())
    }

    /// Absolute form, resolved against the current working directory.
    pub fn absolute(&self) -> io::Result<Self> {
        if self.is_absolute() {
            return Ok(self.clone());
        }
        let path_cwd = std::env::current_dir()?;
        Ok(Self::with_grammar(path_cwd, self.grammar).join(&self.path))
    }

    /// Path of `self` below `base`, or `None` when `base` is not an ancestor.
    pub fn relative_to(&self, base: &PathHandle) -> Option<PathBuf> {
        self.path
            .strip_prefix(&base.path)
            .ok()
            .map(Path::to_path_buf)
    }

    fn key(&self) -> Cow<'_, str> {
        match self.as_str() {
            Cow::Borrowed(value) => (self.grammar.normcase)(value),
            Cow::Owned(value) => Cow::Owned((self.grammar.normcase)(&value).into_owned()),
        }
    }
}

impl PartialEq for PathHandle {
    fn eq(&self, other: &Self) -> bool {
        self.grammar == other.grammar && self.key() == other.key()
    }
}

impl Eq for PathHandle {}

impl Hash for PathHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.grammar.hash(state);
        self.key().hash(state);
    }
}

impl fmt::Display for PathHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for PathHandle {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl From<PathBuf> for PathHandle {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&PathBuf> for PathHandle {
    fn from(path: &PathBuf) -> Self {
        Self::new(path.clone())
    }
}

impl From<&Path> for PathHandle {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<&str> for PathHandle {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for PathHandle {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&PathHandle> for PathHandle {
    fn from(path: &PathHandle) -> Self {
        path.clone()
    }
}
