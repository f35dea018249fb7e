//! Queue-position based wait estimation
//!
//! The estimate assumes waiters ahead of a player leave in pairs, one pair per
//! fixed unit of time. It is a heuristic shown to players, not a bound.

use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for wait time estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitTimeConfig {
    /// Seconds one pair of waiters ahead is assumed to take
    pub seconds_per_pair: u32,
}

impl Default for WaitTimeConfig {
    fn default() -> Self {
        Self {
            seconds_per_pair: 2,
        }
    }
}

impl WaitTimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.seconds_per_pair == 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "seconds_per_pair must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Trait for estimating how long a queued player will wait
pub trait WaitTimeEstimator: Send + Sync {
    /// Estimated wait in seconds for a player at 1-based `position`
    fn estimate(&self, position: u32) -> u32;
}

/// Estimates from whole pairs of players ahead in the bucket
#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseWaitTimeEstimator {
    config: WaitTimeConfig,
}

impl PairwiseWaitTimeEstimator {
    pub fn new(config: WaitTimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WaitTimeConfig {
        &self.config
    }
}

impl WaitTimeEstimator for PairwiseWaitTimeEstimator {
    fn estimate(&self, position: u32) -> u32 {
        let players_ahead = position.saturating_sub(1);
        (players_ahead / 2).saturating_mul(self.config.seconds_per_pair)
    }
}
