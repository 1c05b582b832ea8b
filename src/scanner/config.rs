// flightcore/src/scanner/config.rs
//
// Engine configuration: the trigger pattern and rescan tuning

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scanner::matcher::{MatchError, TokenMatcher, DEFAULT_PATTERN};

/// Default extra bytes scanned on each side of a live edit, beyond word boundaries
pub const DEFAULT_RESCAN_PADDING: usize = 0;

/// Engine configuration, loaded once at start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Regex source (or literal phrase when `literal` is set)
    pub trigger_pattern: String,

    /// Treat `trigger_pattern` as a literal phrase instead of a regex
    pub literal: bool,

    /// Extra bytes added around the rescan window of a live edit.
    /// Only needed for custom patterns whose tokens can contain whitespace.
    pub rescan_padding: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger_pattern: DEFAULT_PATTERN.to_string(),
            literal: false,
            rescan_padding: DEFAULT_RESCAN_PADDING,
        }
    }
}

impl EngineConfig {
    /// Config for a literal trigger phrase
    pub fn phrase(phrase: impl Into<String>) -> Self {
        Self {
            trigger_pattern: phrase.into(),
            literal: true,
            ..Default::default()
        }
    }

    /// Parse from persisted JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.matcher().map_err(ConfigError::Pattern)?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // Plain struct of strings/ints, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Compile the configured trigger
    pub fn matcher(&self) -> Result<TokenMatcher, MatchError> {
        if self.literal {
            TokenMatcher::literal(&self.trigger_pattern)
        } else {
            TokenMatcher::new(&self.trigger_pattern)
        }
    }
}

/// Configuration load errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Parse(String),
    Pattern(MatchError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Pattern(e) => write!(f, "Config pattern error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<MatchError> for ConfigError {
    fn from(e: MatchError) -> Self {
        ConfigError::Pattern(e)
    }
}
