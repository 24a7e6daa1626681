//! Basename predicates used to filter walk results.

use std::fmt;
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::path::{PathGrammar, TypeNormCase, normcase_fold};
use crate::spec::TreeError;

/// Caller-supplied predicate over a basename.
pub type TypeMatchFn = dyn Fn(&str) -> bool + Send + Sync;

/// Compiled shell-glob plus the normalization applied on both sides.
#[derive(Debug, Clone)]
pub struct SpecGlobPattern {
    pattern: String,
    normcase: TypeNormCase,
    matcher: GlobMatcher,
}

impl SpecGlobPattern {
    fn compile(pattern: &str, normcase: TypeNormCase) -> Result<Self, TreeError> {
        // fnmatch semantics: no escapes, `*` may cross separators, braces are literal.
        let c_pattern = escape_braces(&normcase(pattern));
        let matcher = GlobBuilder::new(&c_pattern)
            .literal_separator(false)
            .backslash_escape(false)
            .build()
            .map_err(|e| TreeError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.kind().to_string(),
            })?
            .compile_matcher();
        Ok(Self {
            pattern: pattern.to_string(),
            normcase,
            matcher,
        })
    }

    /// Glob text as supplied by the caller.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn is_match(&self, name: &str) -> bool {
        let c_name = (self.normcase)(name);
        self.matcher.is_match(&*c_name)
    }
}

/// Rewrite `{` and `}` outside bracket expressions as one-char classes so
/// globset does not read them as alternation.
fn escape_braces(pattern: &str) -> String {
    let mut c_escaped = String::with_capacity(pattern.len());
    let mut iter_chars = pattern.chars().peekable();
    while let Some(c) = iter_chars.next() {
        match c {
            '{' => c_escaped.push_str("[{]"),
            '}' => c_escaped.push_str("[}]"),
            '[' => {
                c_escaped.push(c);
                // Negation marker and a leading `]` belong to the class body.
                if let Some(&c_next) = iter_chars.peek()
                    && (c_next == '!' || c_next == '^')
                {
                    c_escaped.push(c_next);
                    iter_chars.next();
                }
                if let Some(&c_next) = iter_chars.peek()
                    && c_next == ']'
                {
                    c_escaped.push(c_next);
                    iter_chars.next();
                }
                for c_class in iter_chars.by_ref() {
                    c_escaped.push(c_class);
                    if c_class == ']' {
                        break;
                    }
                }
            }
            _ => c_escaped.push(c),
        }
    }
    c_escaped
}

/// Predicate over a single path segment.
///
/// Immutable after construction, so one instance may be shared by any number
/// of concurrent walks.
#[derive(Clone, Default)]
pub enum Matcher {
    /// Matches everything.
    #[default]
    Null,
    /// Shell glob (`*`, `?`, `[...]`) with the normalization chosen at construction.
    Pattern(SpecGlobPattern),
    /// Shell glob that always folds case.
    CaseInsensitive(SpecGlobPattern),
    /// Regular expression searched within the basename.
    Regex(Regex),
    /// Arbitrary predicate.
    Custom(Arc<TypeMatchFn>),
}

impl Matcher {
    /// `None` becomes [`Matcher::Null`], a string becomes a native-grammar pattern.
    pub fn load(pattern: Option<&str>) -> Result<Self, TreeError> {
        match pattern {
            None => Ok(Self::Null),
            Some(pattern) => Self::pattern(pattern),
        }
    }

    /// Glob using the running platform's case rule.
    pub fn pattern(pattern: &str) -> Result<Self, TreeError> {
        Self::for_grammar(pattern, &PathGrammar::native())
    }

    /// Glob using `grammar`'s case rule.
    pub fn for_grammar(pattern: &str, grammar: &PathGrammar) -> Result<Self, TreeError> {
        Self::pattern_with(pattern, grammar.normcase)
    }

    /// Glob with an explicit normalization strategy.
    pub fn pattern_with(pattern: &str, normcase: TypeNormCase) -> Result<Self, TreeError> {
        Ok(Self::Pattern(SpecGlobPattern::compile(pattern, normcase)?))
    }

    /// Glob that ignores case on every platform.
    pub fn case_insensitive(pattern: &str) -> Result<Self, TreeError> {
        Ok(Self::CaseInsensitive(SpecGlobPattern::compile(
            pattern,
            normcase_fold,
        )?))
    }

    pub fn regex(pattern: &str) -> Result<Self, TreeError> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| TreeError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Null => true,
            Self::Pattern(glob) | Self::CaseInsensitive(glob) => glob.is_match(name),
            Self::Regex(regex) => regex.is_match(name),
            Self::Custom(predicate) => predicate(name),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Pattern(glob) => f.debug_tuple("Pattern").field(&glob.pattern).finish(),
            Self::CaseInsensitive(glob) => f
                .debug_tuple("CaseInsensitive")
                .field(&glob.pattern)
                .finish(),
            Self::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
