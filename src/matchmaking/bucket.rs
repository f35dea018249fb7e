//! Bucket keys: mapping (difficulty, duration) pairs to compact identifiers
//!
//! A key is `duration_minutes * 10 + difficulty_code`. The difficulty owns the
//! units digit (1..=3) and the duration owns everything above it, so the two
//! parts never overlap and can always be separated again.

use crate::types::Difficulty;
use serde::{Deserialize, Serialize};

/// Compact identifier of one waiting queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey(u32);

impl BucketKey {
    /// Wrap a raw key; it is only meaningful once a codec decodes it
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encodes and decodes bucket keys for a configured set of durations
///
/// `None` is the invalid sentinel on both sides: unknown inputs never produce
/// a key, and keys outside the configured space never decode.
#[derive(Debug, Clone)]
pub struct BucketCodec {
    durations: Vec<u32>,
}

impl BucketCodec {
    /// Create a codec for the given session durations (minutes)
    ///
    /// Durations are sorted and deduplicated; zero and values too large to
    /// encode are dropped.
    pub fn new(durations: &[u32]) -> Self {
        let mut durations: Vec<u32> = durations
            .iter()
            .copied()
            .filter(|d| *d > 0 && d.checked_mul(10).and_then(|v| v.checked_add(9)).is_some())
            .collect();
        durations.sort_unstable();
        durations.dedup();
        Self { durations }
    }

    pub fn durations(&self) -> &[u32] {
        &self.durations
    }

    /// Number of buckets in the full difficulty x duration space
    pub fn bucket_count(&self) -> usize {
        Difficulty::ALL.len() * self.durations.len()
    }

    /// Classify a request as received on the wire
    ///
    /// Difficulty is matched case-insensitively; duration must be one of the
    /// configured minute values.
    pub fn encode(&self, difficulty: &str, duration: &str) -> Option<BucketKey> {
        let difficulty = difficulty.parse::<Difficulty>().ok()?;
        let duration = duration.trim().parse::<u32>().ok()?;
        self.encode_parts(difficulty, duration)
    }

    pub fn encode_parts(&self, difficulty: Difficulty, duration: u32) -> Option<BucketKey> {
        if self.durations.binary_search(&duration).is_err() {
            return None;
        }
        Some(BucketKey(duration * 10 + difficulty.code()))
    }

    pub fn decode(&self, key: BucketKey) -> Option<(Difficulty, u32)> {
        let difficulty = Difficulty::from_code(key.0 % 10)?;
        let duration = key.0 / 10;
        if self.durations.binary_search(&duration).is_err() {
            return None;
        }
        Some((difficulty, duration))
    }

    /// Slot of a key in a dense per-bucket arena
    pub fn index_of(&self, key: BucketKey) -> Option<usize> {
        let (difficulty, duration) = self.decode(key)?;
        let duration_index = self.durations.binary_search(&duration).ok()?;
        Some(duration_index * Difficulty::ALL.len() + (difficulty.code() as usize - 1))
    }

    /// Every valid key, in ascending order (matching `index_of`)
    pub fn keys(&self) -> impl Iterator<Item = BucketKey> + '_ {
        self.durations.iter().flat_map(|duration| {
            Difficulty::ALL
                .iter()
                .map(move |difficulty| BucketKey(duration * 10 + difficulty.code()))
        })
    }
}

impl Default for BucketCodec {
    fn default() -> Self {
        Self::new(&[10, 20, 30])
    }
}
