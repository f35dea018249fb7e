//! Synchronous matchmaking engine core
//!
//! `MatchEngine` owns every bucket queue and performs all queue mutation:
//! classifying and inserting requests, withdrawing players, running the sweep
//! and re-queuing entries whose match could not be delivered. It has no notion
//! of time or concurrency of its own; callers pass `now` in and serialize
//! access (the coordinator does this with a single control loop).

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::matchmaking::bucket::{BucketCodec, BucketKey};
use crate::matchmaking::compatibility::{CompatibilityConfig, CompatibilityRule, TimeDecayRule};
use crate::matchmaking::queue::QueueManager;
use crate::matchmaking::scheduler::{MatchScheduler, SweepOutcome};
use crate::types::{Difficulty, MatchRequest, PlayerId, QueueEntry, QueueStatus, QueueUpdate};
use crate::utils::normalize_unix_seconds;
use crate::wait_time::{PairwiseWaitTimeEstimator, WaitTimeConfig, WaitTimeEstimator};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

pub const JOINED_MESSAGE: &str = "joined queue";
pub const REQUEUED_MESSAGE: &str = "match could not be delivered, back in queue";
pub const LEFT_MESSAGE: &str = "left queue";

/// Waiting count for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub key: u32,
    pub difficulty: Difficulty,
    pub duration: u32,
    pub waiting: usize,
}

/// Snapshot of engine counters and queue sizes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub requests_accepted: u64,
    pub requests_rejected: u64,
    pub withdrawals: u64,
    pub sweeps_run: u64,
    pub matches_formed: u64,
    pub batches_published: u64,
    pub batches_failed: u64,
    pub entries_requeued: u64,
    pub total_waiting: usize,
    /// Players matched into a batch that has not been reported back yet
    pub players_in_flight: usize,
    pub buckets: Vec<BucketStats>,
}

#[derive(Debug, Default)]
struct EngineCounters {
    requests_accepted: u64,
    requests_rejected: u64,
    withdrawals: u64,
    sweeps_run: u64,
    matches_formed: u64,
    batches_published: u64,
    batches_failed: u64,
    entries_requeued: u64,
}

/// Single owner of all bucket queues
pub struct MatchEngine {
    queues: QueueManager,
    scheduler: MatchScheduler,
    estimator: Box<dyn WaitTimeEstimator>,
    counters: EngineCounters,
    /// player id -> number of unreported batches holding that player
    in_flight: HashMap<PlayerId, usize>,
    /// Players who left while one of their batches was unreported
    withdrawn_in_flight: HashSet<PlayerId>,
}

impl MatchEngine {
    /// Build an engine from matchmaking settings
    pub fn new(settings: &MatchmakingSettings) -> Result<Self> {
        let codec = BucketCodec::new(&settings.durations_minutes);
        if codec.bucket_count() == 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "No usable session durations configured".to_string(),
            }
            .into());
        }

        let rule = TimeDecayRule::new(CompatibilityConfig::from(settings));
        let estimator = PairwiseWaitTimeEstimator::new(WaitTimeConfig {
            seconds_per_pair: settings.eta_seconds_per_pair,
        })?;

        Ok(Self::with_parts(codec, Box::new(rule), Box::new(estimator)))
    }

    /// Build an engine from explicit components
    pub fn with_parts(
        codec: BucketCodec,
        rule: Box<dyn CompatibilityRule>,
        estimator: Box<dyn WaitTimeEstimator>,
    ) -> Self {
        info!(
            "Allocating {} bucket queues for durations {:?}",
            codec.bucket_count(),
            codec.durations()
        );
        Self {
            queues: QueueManager::new(codec),
            scheduler: MatchScheduler::new(rule),
            estimator,
            counters: EngineCounters::default(),
            in_flight: HashMap::new(),
            withdrawn_in_flight: HashSet::new(),
        }
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn codec(&self) -> &BucketCodec {
        self.queues.codec()
    }

    /// Map a request onto its bucket
    pub fn classify(&self, request: &MatchRequest) -> Result<BucketKey> {
        self.codec()
            .encode(&request.difficulty, &request.duration)
            .ok_or_else(|| {
                MatchmakingError::UnknownBucket {
                    difficulty: request.difficulty.clone(),
                    duration: request.duration.clone(),
                }
                .into()
            })
    }

    /// Queue a player and describe where they now stand
    ///
    /// A request for a bucket the player already waits in replaces the earlier
    /// entry. Rejected requests leave every queue untouched.
    pub fn enqueue(&mut self, request: MatchRequest, now: i64) -> Result<QueueUpdate> {
        if request.player_id.trim().is_empty() {
            self.counters.requests_rejected += 1;
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "player_id is empty".to_string(),
            }
            .into());
        }

        let key = match self.classify(&request) {
            Ok(key) => key,
            Err(e) => {
                self.counters.requests_rejected += 1;
                return Err(e);
            }
        };

        let enqueued_at = normalize_unix_seconds(request.timestamp, now);
        let entry = QueueEntry::new(request.player_id, request.skill, enqueued_at);
        let player_id = entry.player_id.clone();

        if let Some(previous) = self.queues.insert_or_replace(key, entry)? {
            debug!(
                "Player {} replaced entry in bucket {} (skill {} -> {})",
                player_id, key, previous.skill, request.skill
            );
        }
        self.counters.requests_accepted += 1;

        self.queue_update(key, player_id, QueueStatus::Joined, JOINED_MESSAGE, now)
    }

    /// Remove a player from every bucket
    ///
    /// A player whose match batch is still being published is also withdrawn:
    /// if that batch turns out undeliverable they are not put back. Returns
    /// `None` if the player was neither queued nor in flight.
    pub fn withdraw(&mut self, player_id: &str, now: i64) -> Option<QueueUpdate> {
        let removed = self.queues.remove_player(player_id);
        let in_flight = self.in_flight.contains_key(player_id);
        if removed.is_empty() && !in_flight {
            return None;
        }

        if in_flight {
            self.withdrawn_in_flight.insert(player_id.to_string());
        }
        self.counters.withdrawals += 1;
        debug!(
            "Player {} withdrew from {} buckets (in flight: {})",
            player_id,
            removed.len(),
            in_flight
        );

        Some(QueueUpdate {
            player_id: player_id.to_string(),
            status: QueueStatus::Left,
            message: LEFT_MESSAGE.to_string(),
            position: 0,
            eta: 0,
            timestamp: now,
        })
    }

    /// Run one matching sweep over every bucket
    pub fn sweep(&mut self, now: i64) -> Option<SweepOutcome> {
        self.counters.sweeps_run += 1;
        let outcome = self.scheduler.sweep(&mut self.queues, now)?;
        self.counters.matches_formed += outcome.batch.match_count() as u64;
        for (_, entry) in &outcome.matched {
            *self.in_flight.entry(entry.player_id.clone()).or_default() += 1;
        }
        Some(outcome)
    }

    /// Return entries from an undelivered batch to their buckets
    ///
    /// Entries keep their original enqueue time so widening carries on from
    /// where it was. A player who has queued again in the same bucket since the
    /// match keeps the newer entry, and a player who withdrew meanwhile stays out.
    pub fn requeue(&mut self, entries: Vec<(BucketKey, QueueEntry)>, now: i64) -> Vec<QueueUpdate> {
        self.counters.batches_failed += 1;

        let mut restored = Vec::new();
        let mut reported = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            reported.push(entry.player_id.clone());
            if self.withdrawn_in_flight.contains(&entry.player_id) {
                debug!(
                    "Player {} left before the match was delivered, not re-queuing",
                    entry.player_id
                );
                continue;
            }
            let Some(queue) = self.queues.queue_mut(key) else {
                continue;
            };
            if queue.contains_player(&entry.player_id) {
                debug!(
                    "Player {} re-queued in bucket {} since the match, keeping newer entry",
                    entry.player_id, key
                );
                continue;
            }
            let player_id = entry.player_id.clone();
            queue.insert_or_replace(entry);
            restored.push((key, player_id));
        }
        self.release_in_flight(reported);

        self.counters.entries_requeued += restored.len() as u64;

        restored
            .into_iter()
            .filter_map(|(key, player_id)| {
                self.queue_update(key, player_id, QueueStatus::Requeued, REQUEUED_MESSAGE, now)
                    .ok()
            })
            .collect()
    }

    /// Settle a delivered batch
    pub fn record_batch_published(&mut self, entries: &[(BucketKey, QueueEntry)]) {
        self.counters.batches_published += 1;
        self.release_in_flight(entries.iter().map(|(_, entry)| entry.player_id.clone()));
    }

    fn release_in_flight(&mut self, player_ids: impl IntoIterator<Item = PlayerId>) {
        for player_id in player_ids {
            let Some(count) = self.in_flight.get_mut(&player_id) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&player_id);
                self.withdrawn_in_flight.remove(&player_id);
            }
        }
    }

    /// Drop every waiting entry; used when the engine stops
    pub fn discard_all(&mut self) -> usize {
        self.in_flight.clear();
        self.withdrawn_in_flight.clear();
        self.queues.clear()
    }

    pub fn waiting_players(&self) -> usize {
        self.queues.total_waiting()
    }

    pub fn stats(&self) -> EngineStats {
        let codec = self.codec();
        let buckets = self
            .queues
            .buckets()
            .filter_map(|(key, queue)| {
                let (difficulty, duration) = codec.decode(key)?;
                Some(BucketStats {
                    key: key.raw(),
                    difficulty,
                    duration,
                    waiting: queue.len(),
                })
            })
            .collect();

        EngineStats {
            requests_accepted: self.counters.requests_accepted,
            requests_rejected: self.counters.requests_rejected,
            withdrawals: self.counters.withdrawals,
            sweeps_run: self.counters.sweeps_run,
            matches_formed: self.counters.matches_formed,
            batches_published: self.counters.batches_published,
            batches_failed: self.counters.batches_failed,
            entries_requeued: self.counters.entries_requeued,
            total_waiting: self.queues.total_waiting(),
            players_in_flight: self.in_flight.len(),
            buckets,
        }
    }

    fn queue_update(
        &self,
        key: BucketKey,
        player_id: PlayerId,
        status: QueueStatus,
        message: &str,
        now: i64,
    ) -> Result<QueueUpdate> {
        let position = self.queues.position(key, &player_id).ok_or_else(|| {
            MatchmakingError::PlayerNotFound {
                player_id: player_id.clone(),
            }
        })?;

        Ok(QueueUpdate {
            player_id,
            status,
            message: message.to_string(),
            position,
            eta: self.estimator.estimate(position),
            timestamp: now,
        })
    }
}
