//! Write-scope glob patterns
//!
//! `**` crosses path separators and may match zero directories, `*` and `?`
//! stay within one segment, `[...]` is a character class (`[!...]` negates).
//! Patterns are compiled once when a charter is loaded.

use glob::{MatchOptions, Pattern, PatternError};
use std::fmt;

const SCOPE_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct ScopePattern {
    pattern: Pattern,
}

impl ScopePattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Match a base-relative, `/`-separated path
    pub fn matches(&self, relative: &str) -> bool {
        self.pattern.matches_with(relative, SCOPE_MATCH)
    }

    /// True when either pattern, read as a literal path, matches the other
    pub fn overlaps(&self, other: &ScopePattern) -> bool {
        self.matches(other.as_str()) || other.matches(self.as_str())
    }
}

impl PartialEq for ScopePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ScopePattern {}

impl fmt::Display for ScopePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
