//! SnapshotDetector: content-hash skip detection for the static surface
//!
//! A static snapshot rendered twice with identical text (and the same trigger
//! pattern) can reuse the previous decoration set: widgets read their state
//! lazily from the cache, so the old set is still current.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCheck {
    pub has_changed: bool,
    pub content_hash: u64,
}

#[derive(Debug, Default)]
pub struct SnapshotDetector {
    last_hash: Option<u64>,
    check_count: u64,
    skip_count: u64,
}

impl SnapshotDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `text` under `pattern` and compare with the previous check
    pub fn check(&mut self, pattern: &str, text: &str) -> SnapshotCheck {
        self.check_count += 1;

        let content_hash = compute_hash(pattern, text);
        let has_changed = self.last_hash != Some(content_hash);
        if !has_changed {
            self.skip_count += 1;
        }
        self.last_hash = Some(content_hash);

        SnapshotCheck { has_changed, content_hash }
    }

    /// Skip rate as a percentage
    pub fn skip_rate(&self) -> f64 {
        if self.check_count == 0 {
            return 0.0;
        }
        (self.skip_count as f64 / self.check_count as f64) * 100.0
    }

    pub fn check_count(&self) -> u64 {
        self.check_count
    }

    pub fn skip_count(&self) -> u64 {
        self.skip_count
    }

    /// Forget the last snapshot; the next check reports a change
    pub fn reset(&mut self) {
        self.last_hash = None;
    }
}

fn compute_hash(pattern: &str, text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    pattern.hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}
