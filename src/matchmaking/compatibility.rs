//! Compatibility rule deciding whether two waiting players may be paired
//!
//! The accepted skill gap starts at the configured match range and widens
//! linearly with how long the longer-waiting of the two players has waited:
//!
//! ```text
//! threshold = match_range * (1 + time_decay_multiplier * max(wait_a, wait_b))
//! ```
//!
//! At zero wait the threshold is exactly `match_range`, so close matches are
//! always possible immediately, and a player who keeps waiting eventually
//! accepts any gap.

use crate::config::MatchmakingSettings;
use crate::types::QueueEntry;
use crate::utils::{skill_gap, wait_seconds};

/// Configuration for compatibility checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompatibilityConfig {
    /// Skill gap accepted at zero wait
    pub match_range: f64,
    /// Fraction of the match range added per second waited
    pub time_decay_multiplier: f64,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            match_range: 100.0,
            time_decay_multiplier: 0.01,
        }
    }
}

impl From<&MatchmakingSettings> for CompatibilityConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            match_range: settings.match_range,
            time_decay_multiplier: settings.time_decay_multiplier,
        }
    }
}

/// Trait for pairwise compatibility rules
pub trait CompatibilityRule: Send + Sync {
    /// Whether `a` and `b` may be paired at unix time `now`
    fn compatible(&self, a: &QueueEntry, b: &QueueEntry, now: i64) -> bool;
}

/// Skill-gap rule with time-decay widening
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeDecayRule {
    config: CompatibilityConfig,
}

impl TimeDecayRule {
    pub fn new(config: CompatibilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompatibilityConfig {
        &self.config
    }

    /// Largest accepted skill gap after `max_wait_seconds` of waiting
    pub fn threshold(&self, max_wait_seconds: u64) -> f64 {
        self.config.match_range
            * (1.0 + self.config.time_decay_multiplier * max_wait_seconds as f64)
    }
}

impl CompatibilityRule for TimeDecayRule {
    fn compatible(&self, a: &QueueEntry, b: &QueueEntry, now: i64) -> bool {
        let gap = skill_gap(a.skill, b.skill);
        let max_wait = wait_seconds(a.enqueued_at, now).max(wait_seconds(b.enqueued_at, now));
        gap as f64 <= self.threshold(max_wait)
    }
}
