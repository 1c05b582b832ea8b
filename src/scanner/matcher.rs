//! TokenMatcher - flight-code token detection via Regex
//!
//! Finds tokens in free-form text:
//! - Default pattern: 2-3 uppercase letters followed by 1-4 digits (`BA249`, `AA1`)
//! - Custom regex patterns from configuration (`\b...\b` for whole words only)
//! - Literal trigger phrases (escaped before compiling)
//!
//! Matching is leftmost-first and non-overlapping. Offsets are UTF-8 byte offsets.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Default flight-code pattern: 2-3 uppercase letters then 1-4 digits
pub const DEFAULT_PATTERN: &str = r"[A-Z]{2,3}[0-9]{1,4}";

/// Default pattern restricted to whole words
pub const WORD_BOUNDED_PATTERN: &str = r"\b[A-Z]{2,3}[0-9]{1,4}\b";

// =============================================================================
// Types
// =============================================================================

/// Literal token identity. Two tokens with the same text are the same token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// A located occurrence of a token within one text snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub token: Token,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl Match {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Pattern errors. Fatal at configuration load.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchError {
    InvalidPattern(String),
    EmptyPattern,
    /// Pattern accepts the empty string and would produce zero-width tokens
    EmptyMatch,
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::InvalidPattern(msg) => write!(f, "Invalid trigger pattern: {}", msg),
            MatchError::EmptyPattern => write!(f, "Trigger pattern is empty"),
            MatchError::EmptyMatch => write!(f, "Trigger pattern matches the empty string"),
        }
    }
}

impl std::error::Error for MatchError {}

// =============================================================================
// TokenMatcher
// =============================================================================

/// Compiled trigger pattern. Stateless apart from the compiled regex.
#[derive(Debug, Clone)]
pub struct TokenMatcher {
    re: Regex,
    /// Byte length of every token, when the trigger is a literal phrase
    literal_len: Option<usize>,
}

impl Default for TokenMatcher {
    fn default() -> Self {
        Self {
            // Constant pattern, covered by test_default_pattern_compiles
            re: Regex::new(DEFAULT_PATTERN).unwrap(),
            literal_len: None,
        }
    }
}

impl TokenMatcher {
    /// Compile a regex trigger pattern
    pub fn new(pattern: &str) -> Result<Self, MatchError> {
        if pattern.is_empty() {
            return Err(MatchError::EmptyPattern);
        }
        let re = Regex::new(pattern).map_err(|e| MatchError::InvalidPattern(e.to_string()))?;
        if re.is_match("") {
            return Err(MatchError::EmptyMatch);
        }
        Ok(Self { re, literal_len: None })
    }

    /// Compile a literal trigger phrase (the phrase-trigger variant)
    pub fn literal(phrase: &str) -> Result<Self, MatchError> {
        if phrase.is_empty() {
            return Err(MatchError::EmptyPattern);
        }
        let mut matcher = Self::new(&regex::escape(phrase))?;
        matcher.literal_len = Some(phrase.len());
        Ok(matcher)
    }

    /// Pattern source this matcher was compiled from
    pub fn pattern(&self) -> &str {
        self.re.as_str()
    }

    /// Upper bound on token length in bytes, if known.
    ///
    /// Only literal phrases have one; their tokens may contain whitespace, so
    /// live rescans must reach this far past the edited word.
    pub fn max_token_len(&self) -> Option<usize> {
        self.literal_len
    }

    /// Lazily scan the whole text. Calling again restarts from the beginning.
    pub fn scan<'r, 't>(&'r self, text: &'t str) -> Matches<'r, 't> {
        Matches {
            inner: self.re.find_iter(text),
        }
    }

    /// Matches lying fully inside `window`, with absolute offsets.
    ///
    /// Searching starts at `window.start` on the full text so that `\b` and
    /// other look-around assertions see the surrounding context.
    pub fn scan_window(&self, text: &str, window: Range<usize>) -> Vec<Match> {
        let end = window.end.min(text.len());
        let mut pos = window.start.min(end);
        let mut out = Vec::new();

        while pos < end {
            let Some(m) = self.re.find_at(text, pos) else {
                break;
            };
            if m.start() >= end {
                break;
            }
            if m.end() > end {
                // Straddles the window edge; the caller widens windows to avoid this
                break;
            }
            if m.start() < m.end() {
                out.push(Match {
                    token: Token::new(m.as_str()),
                    start: m.start(),
                    end: m.end(),
                });
                pos = m.end();
            } else {
                pos = next_char_boundary(text, m.end());
            }
        }

        out
    }
}

/// Lazy match sequence returned by [`TokenMatcher::scan`]
pub struct Matches<'r, 't> {
    inner: regex::Matches<'r, 't>,
}

impl<'r, 't> Iterator for Matches<'r, 't> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        loop {
            let m = self.inner.next()?;
            if m.start() == m.end() {
                continue;
            }
            return Some(Match {
                token: Token::new(m.as_str()),
                start: m.start(),
                end: m.end(),
            });
        }
    }
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    let mut next = pos + 1;
    while next < text.len() && !text.is_char_boundary(next) {
        next += 1;
    }
    next
}

// =============================================================================
// Tests
// =============================================================================
