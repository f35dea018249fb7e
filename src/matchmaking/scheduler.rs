//! Matching scheduler: the per-tick pairing sweep
//!
//! Each bucket is swept independently in ascending skill order with a single
//! pending slot. The pending player is offered only to the next player in rank
//! order; if the two are compatible they form a match, otherwise the newcomer
//! takes over the pending slot and the previous holder waits for a later tick,
//! when time-decay widening gives them a better chance.
//!
//! This is a greedy adjacent-pair sweep with bounded O(n) work per bucket. It
//! does not search for a globally optimal pairing.

use crate::matchmaking::bucket::BucketKey;
use crate::matchmaking::compatibility::CompatibilityRule;
use crate::matchmaking::queue::{QueueManager, WaitingQueue};
use crate::types::{Match, MatchBatch, MatchGroup, QueueEntry};
use crate::utils::generate_match_id;
use tracing::{debug, warn};

/// Everything one sweep produced
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// The batch to publish, covering every bucket that formed a match
    pub batch: MatchBatch,
    /// Matched entries as they were stored, with the bucket they came from
    pub matched: Vec<(BucketKey, QueueEntry)>,
}

/// Runs the greedy adjacent-pair sweep over every bucket
pub struct MatchScheduler {
    rule: Box<dyn CompatibilityRule>,
}

impl MatchScheduler {
    pub fn new(rule: Box<dyn CompatibilityRule>) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &dyn CompatibilityRule {
        self.rule.as_ref()
    }

    /// Pair compatible neighbours in every bucket and remove them from the queues
    ///
    /// Returns `None` when no bucket formed a match; the queues are left
    /// untouched in that case.
    pub fn sweep(&self, queues: &mut QueueManager, now: i64) -> Option<SweepOutcome> {
        let codec = queues.codec().clone();
        let mut groups = Vec::new();
        let mut matched = Vec::new();

        for (key, queue) in queues.buckets_mut() {
            if queue.len() < 2 {
                continue;
            }
            let Some((difficulty, duration)) = codec.decode(key) else {
                warn!("Skipping bucket {} that does not decode", key);
                continue;
            };

            let pairs = self.pair_bucket(queue, now);
            if pairs.is_empty() {
                continue;
            }

            let mut matches = Vec::with_capacity(pairs.len());
            for (a, b) in pairs {
                queue.delete(&a);
                queue.delete(&b);
                matches.push(Match {
                    match_id: generate_match_id(),
                    player_ids: vec![a.player_id.clone(), b.player_id.clone()],
                    created_at: now,
                });
                matched.push((key, a));
                matched.push((key, b));
            }

            debug!("Bucket {} formed {} matches", key, matches.len());

            groups.push(MatchGroup {
                difficulty,
                duration,
                matches,
            });
        }

        if groups.is_empty() {
            return None;
        }

        Some(SweepOutcome {
            batch: MatchBatch {
                groups,
                created_at: now,
            },
            matched,
        })
    }

    /// Walk one bucket and collect the compatible adjacent pairs
    fn pair_bucket(&self, queue: &WaitingQueue, now: i64) -> Vec<(QueueEntry, QueueEntry)> {
        let mut pairs = Vec::new();
        let mut pending: Option<&QueueEntry> = None;

        for entry in queue.iter() {
            match pending {
                Some(held) if self.rule.compatible(held, entry, now) => {
                    pairs.push((held.clone(), entry.clone()));
                    pending = None;
                }
                _ => pending = Some(entry),
            }
        }

        pairs
    }
}
