//! Prefetch configuration.

use serde::{Deserialize, Serialize};

/// Routes fetched concurrently per chunk.
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Include and `!`-prefixed exclude patterns.
    pub patterns: Vec<String>,
    pub concurrency: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl PrefetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Chunk size; zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
