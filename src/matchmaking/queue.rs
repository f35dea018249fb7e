//! Per-bucket waiting queues
//!
//! Each bucket owns one ordered, duplicate-free queue keyed by (skill, player id).
//! The queue manager allocates one queue per bucket up front and keeps them in a
//! dense arena indexed through the bucket codec, so buckets are never created or
//! destroyed while the engine runs.

use crate::error::{MatchmakingError, Result};
use crate::matchmaking::bucket::{BucketCodec, BucketKey};
use crate::types::{PlayerId, QueueEntry};
use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

/// Ordered queue of waiting players for one bucket
#[derive(Debug, Clone, Default)]
pub struct WaitingQueue {
    entries: BTreeSet<QueueEntry>,
    /// player id -> skill of that player's live entry
    skills: HashMap<PlayerId, i64>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_player(&self, player_id: &str) -> bool {
        self.skills.contains_key(player_id)
    }

    /// The live entry for a player, if any
    pub fn get(&self, player_id: &str) -> Option<&QueueEntry> {
        let skill = *self.skills.get(player_id)?;
        self.entries.get(&QueueEntry::new(player_id, skill, 0))
    }

    /// Insert an entry, replacing the player's previous entry if there is one
    ///
    /// Returns the replaced entry.
    pub fn insert_or_replace(&mut self, entry: QueueEntry) -> Option<QueueEntry> {
        let previous = self.remove_player(&entry.player_id);
        self.skills.insert(entry.player_id.clone(), entry.skill);
        self.entries.insert(entry);
        previous
    }

    /// Remove an entry by identity
    ///
    /// Both skill and player id must match the stored entry.
    pub fn delete(&mut self, entry: &QueueEntry) -> bool {
        if !self.entries.remove(entry) {
            return false;
        }
        self.skills.remove(&entry.player_id);
        true
    }

    /// Remove whatever entry a player currently holds
    pub fn remove_player(&mut self, player_id: &str) -> Option<QueueEntry> {
        let skill = self.skills.remove(player_id)?;
        self.entries.take(&QueueEntry::new(player_id, skill, 0))
    }

    /// Visit entries from lowest to highest skill until the visitor breaks
    pub fn ascending_scan<F>(&self, mut visit: F)
    where
        F: FnMut(&QueueEntry) -> ControlFlow<()>,
    {
        for entry in &self.entries {
            if visit(entry).is_break() {
                break;
            }
        }
    }

    /// 1-based position of a player among same-or-lower ranked waiters
    ///
    /// Walks the queue in ascending order counting entries whose skill is at
    /// or below the player's, stopping at the player's own entry.
    pub fn count_at_or_below(&self, player_id: &str) -> Option<u32> {
        let skill = *self.skills.get(player_id)?;
        let mut position = 0u32;
        self.ascending_scan(|entry| {
            if entry.skill <= skill {
                position += 1;
            }
            if entry.player_id == player_id {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        Some(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}

/// Arena of waiting queues, one per bucket in the configured space
#[derive(Debug, Clone)]
pub struct QueueManager {
    codec: BucketCodec,
    queues: Vec<WaitingQueue>,
}

impl QueueManager {
    /// Allocate an empty queue for every bucket the codec knows about
    pub fn new(codec: BucketCodec) -> Self {
        let queues = (0..codec.bucket_count()).map(|_| WaitingQueue::new()).collect();
        Self { codec, queues }
    }

    pub fn codec(&self) -> &BucketCodec {
        &self.codec
    }

    pub fn bucket_count(&self) -> usize {
        self.queues.len()
    }

    pub fn queue(&self, key: BucketKey) -> Option<&WaitingQueue> {
        let index = self.codec.index_of(key)?;
        self.queues.get(index)
    }

    pub fn queue_mut(&mut self, key: BucketKey) -> Option<&mut WaitingQueue> {
        let index = self.codec.index_of(key)?;
        self.queues.get_mut(index)
    }

    fn require_queue_mut(&mut self, key: BucketKey) -> Result<&mut WaitingQueue> {
        self.queue_mut(key).ok_or_else(|| {
            MatchmakingError::InternalError {
                message: format!("No queue allocated for bucket {}", key),
            }
            .into()
        })
    }

    /// Insert or replace a player's entry in one bucket
    pub fn insert_or_replace(
        &mut self,
        key: BucketKey,
        entry: QueueEntry,
    ) -> Result<Option<QueueEntry>> {
        Ok(self.require_queue_mut(key)?.insert_or_replace(entry))
    }

    pub fn delete(&mut self, key: BucketKey, entry: &QueueEntry) -> bool {
        self.queue_mut(key)
            .map(|queue| queue.delete(entry))
            .unwrap_or(false)
    }

    pub fn position(&self, key: BucketKey, player_id: &str) -> Option<u32> {
        self.queue(key)?.count_at_or_below(player_id)
    }

    /// Remove a player from every bucket they wait in
    pub fn remove_player(&mut self, player_id: &str) -> Vec<(BucketKey, QueueEntry)> {
        self.buckets_mut()
            .filter_map(|(key, queue)| queue.remove_player(player_id).map(|entry| (key, entry)))
            .collect()
    }

    /// Buckets in ascending key order
    pub fn buckets(&self) -> impl Iterator<Item = (BucketKey, &WaitingQueue)> + '_ {
        self.codec.keys().zip(self.queues.iter())
    }

    pub fn buckets_mut(&mut self) -> impl Iterator<Item = (BucketKey, &mut WaitingQueue)> + '_ {
        self.codec.keys().zip(self.queues.iter_mut())
    }

    pub fn total_waiting(&self) -> usize {
        self.queues.iter().map(WaitingQueue::len).sum()
    }

    /// Drop every queued entry, keeping the buckets allocated
    pub fn clear(&mut self) -> usize {
        let discarded = self.total_waiting();
        for queue in &mut self.queues {
            *queue = WaitingQueue::new();
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Difficulty;
    use proptest::prelude::*;

    fn medium_20(manager: &QueueManager) -> BucketKey {
        manager.codec().encode_parts(Difficulty::Medium, 20).unwrap()
    }

    #[test]
    fn test_all_buckets_allocated_at_start() {
        let manager = QueueManager::new(BucketCodec::default());
        assert_eq!(manager.bucket_count(), 9);
        assert!(manager.buckets().all(|(_, queue)| queue.is_empty()));
        assert_eq!(manager.total_waiting(), 0);
    }

    #[test]
    fn test_insert_orders_by_skill_then_id() {
        let mut queue = WaitingQueue::new();
        queue.insert_or_replace(QueueEntry::new("carol", 1200, 0));
        queue.insert_or_replace(QueueEntry::new("bob", 1000, 0));
        queue.insert_or_replace(QueueEntry::new("alice", 1000, 0));

        let order: Vec<&str> = queue.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(order, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_reinsert_replaces_previous_entry() {
        let mut queue = WaitingQueue::new();
        assert!(queue.insert_or_replace(QueueEntry::new("p1", 1000, 10)).is_none());
        let previous = queue.insert_or_replace(QueueEntry::new("p1", 1500, 20)).unwrap();

        assert_eq!(previous.skill, 1000);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get("p1").unwrap().skill, 1500);
        assert_eq!(queue.get("p1").unwrap().enqueued_at, 20);
        assert!(!queue.delete(&QueueEntry::new("p1", 1000, 0)));
    }

    #[test]
    fn test_delete_requires_exact_identity() {
        let mut queue = WaitingQueue::new();
        queue.insert_or_replace(QueueEntry::new("p1", 1000, 0));

        assert!(!queue.delete(&QueueEntry::new("p1", 999, 0)));
        assert!(!queue.delete(&QueueEntry::new("p2", 1000, 0)));
        assert!(queue.delete(&QueueEntry::new("p1", 1000, 123)));
        assert!(queue.is_empty());
        assert!(!queue.contains_player("p1"));
    }

    #[test]
    fn test_ascending_scan_stops_early() {
        let mut queue = WaitingQueue::new();
        for (id, skill) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            queue.insert_or_replace(QueueEntry::new(id, skill, 0));
        }

        let mut seen = Vec::new();
        queue.ascending_scan(|entry| {
            seen.push(entry.skill);
            if entry.skill == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_position_counts_same_or_lower_ranked() {
        let mut queue = WaitingQueue::new();
        queue.insert_or_replace(QueueEntry::new("low", 900, 0));
        queue.insert_or_replace(QueueEntry::new("high", 2000, 0));
        queue.insert_or_replace(QueueEntry::new("b_tie", 1000, 0));
        queue.insert_or_replace(QueueEntry::new("me", 1000, 0));

        // low and b_tie rank ahead of "me"; "high" does not
        assert_eq!(queue.count_at_or_below("me"), Some(3));
        assert_eq!(queue.count_at_or_below("low"), Some(1));
        assert_eq!(queue.count_at_or_below("high"), Some(4));
        assert_eq!(queue.count_at_or_below("ghost"), None);
    }

    #[test]
    fn test_manager_routes_by_bucket() {
        let mut manager = QueueManager::new(BucketCodec::default());
        let key = medium_20(&manager);
        let other = manager.codec().encode_parts(Difficulty::Hard, 10).unwrap();

        manager
            .insert_or_replace(key, QueueEntry::new("p1", 1000, 0))
            .unwrap();
        manager
            .insert_or_replace(other, QueueEntry::new("p1", 1000, 0))
            .unwrap();

        assert_eq!(manager.queue(key).unwrap().len(), 1);
        assert_eq!(manager.queue(other).unwrap().len(), 1);
        assert_eq!(manager.position(key, "p1"), Some(1));

        let removed = manager.remove_player("p1");
        assert_eq!(removed.len(), 2);
        assert_eq!(manager.total_waiting(), 0);
    }

    #[test]
    fn test_manager_rejects_unknown_bucket() {
        let mut manager = QueueManager::new(BucketCodec::default());
        let result = manager.insert_or_replace(BucketKey::from_raw(7), QueueEntry::new("p", 1, 0));
        assert!(result.is_err());
        assert!(!manager.delete(BucketKey::from_raw(7), &QueueEntry::new("p", 1, 0)));
    }

    #[test]
    fn test_clear_keeps_buckets() {
        let mut manager = QueueManager::new(BucketCodec::default());
        let key = medium_20(&manager);
        manager
            .insert_or_replace(key, QueueEntry::new("p1", 1, 0))
            .unwrap();
        assert_eq!(manager.clear(), 1);
        assert_eq!(manager.bucket_count(), 9);
        assert!(manager.queue(key).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_never_holds_duplicate_players(
            ops in proptest::collection::vec((0u8..8, -50i64..50), 1..200)
        ) {
            let mut queue = WaitingQueue::new();
            for (player, skill) in ops {
                queue.insert_or_replace(QueueEntry::new(format!("p{}", player), skill, 0));

                let mut ids: Vec<&str> = queue.iter().map(|e| e.player_id.as_str()).collect();
                let total = ids.len();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);
                prop_assert_eq!(queue.skills.len(), total);
            }
        }

        #[test]
        fn prop_position_grows_with_lower_ranked_arrivals(
            others in proptest::collection::vec(-100i64..100, 0..50),
            skill in -100i64..100,
        ) {
            let mut queue = WaitingQueue::new();
            queue.insert_or_replace(QueueEntry::new("me", skill, 0));
            let mut last = queue.count_at_or_below("me").unwrap();
            prop_assert_eq!(last, 1);

            for (i, other) in others.into_iter().enumerate() {
                queue.insert_or_replace(QueueEntry::new(format!("o{}", i), other, 0));
                let position = queue.count_at_or_below("me").unwrap();
                prop_assert!(position >= last);
                last = position;
            }
        }
    }
}
