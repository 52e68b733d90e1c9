//! Query censor: allow/deny decisions on SQL text
//!
//! The censor sees every query-bearing packet (simple queries and Parse
//! statements) before it reaches the database. A blocked query is never
//! forwarded; the client instead receives a synthesized error and the
//! session continues.

use std::sync::Arc;

use crate::config::CensorConfig;

/// The censor's decision for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the query to the database
    Allow,
    /// Drop the query and return this message to the client
    Block {
        /// The message carried in the synthesized ErrorResponse
        message: String,
    },
}

impl Verdict {
    /// Whether this verdict blocks the query.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }
}

/// Pluggable query censor.
///
/// Implementations must be cheap: the censor runs on the hot path of every
/// query-bearing packet.
pub trait Censor: Send + Sync {
    /// Decide whether a query may be forwarded to the database.
    fn handle_query(&self, query: &str) -> Verdict;
}

/// A censor that allows everything. Used when no deny patterns are
/// configured.
#[derive(Debug, Default)]
pub struct AllowAllCensor;

impl Censor for AllowAllCensor {
    fn handle_query(&self, _query: &str) -> Verdict {
        Verdict::Allow
    }
}

/// A censor driven by case-insensitive substring patterns from the
/// configuration file.
pub struct PatternCensor {
    patterns: Vec<String>,
    message: String,
}

impl PatternCensor {
    /// Build a censor from configuration. Patterns are matched
    /// case-insensitively against the whole query text.
    pub fn new(patterns: Vec<String>, message: String) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
            message,
        }
    }

    /// Build the censor configured in `censor:`, falling back to
    /// [`AllowAllCensor`] when no patterns are set.
    pub fn from_config(config: &CensorConfig) -> Arc<dyn Censor> {
        if config.deny_patterns.is_empty() {
            Arc::new(AllowAllCensor)
        } else {
            Arc::new(Self::new(
                config.deny_patterns.clone(),
                config.message.clone(),
            ))
        }
    }
}

impl Censor for PatternCensor {
    fn handle_query(&self, query: &str) -> Verdict {
        let lowered = query.to_lowercase();
        for pattern in &self.patterns {
            if lowered.contains(pattern) {
                return Verdict::Block {
                    message: self.message.clone(),
                };
            }
        }
        Verdict::Allow
    }
}
