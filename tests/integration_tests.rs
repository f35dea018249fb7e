//! Integration tests for the skillqueue matchmaking service
//!
//! These run the coordinator end to end against a recording publisher:
//! - Bucket classification and rejection of unknown buckets
//! - Greedy adjacent pairing across sweeps
//! - Replace-on-resubmit and queue positions
//! - Re-queue after an undelivered match batch
//! - The inbound message path, including leave requests

mod fixtures;

use fixtures::{medium_20, pairs, request, statuses_for, updates_for, TestEngine};
use skillqueue::amqp::handlers::{process_message, Disposition};
use skillqueue::types::{Difficulty, QueueStatus};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_close_skills_match_in_one_sweep() {
    let engine = TestEngine::with_defaults();

    engine.submit(medium_20("A", 1000)).await;
    engine.submit(medium_20("B", 1010)).await;
    engine.next_sweep().await;

    let batches = engine.batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.groups.len(), 1);
    assert_eq!(batch.groups[0].difficulty, Difficulty::Medium);
    assert_eq!(batch.groups[0].duration, 20);
    assert_eq!(pairs(batch), vec![("A".to_string(), "B".to_string())]);

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.total_waiting, 0);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_distant_skills_stay_queued() {
    let engine = TestEngine::with_defaults();

    engine.submit(medium_20("C", 1000)).await;
    engine.submit(medium_20("D", 5000)).await;
    engine.next_sweep().await;

    assert!(engine.batches().is_empty());
    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.total_waiting, 2);
    assert_eq!(stats.matches_formed, 0);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_greedy_sweep_leaves_odd_player_for_next_tick() {
    let engine = TestEngine::with_defaults();

    engine.submit(medium_20("E", 100)).await;
    engine.submit(medium_20("F", 105)).await;
    engine.submit(medium_20("G", 110)).await;
    engine.next_sweep().await;

    let batches = engine.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(pairs(&batches[0]), vec![("E".to_string(), "F".to_string())]);
    assert_eq!(engine.handle.stats().await.unwrap().total_waiting, 1);

    engine.submit(medium_20("H", 112)).await;
    engine.next_sweep().await;

    let batches = engine.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(pairs(&batches[1]), vec![("G".to_string(), "H".to_string())]);
    assert_eq!(engine.handle.stats().await.unwrap().total_waiting, 0);
    engine.stop().await;
}

#[tokio::test]
async fn test_unknown_difficulty_is_dropped() {
    let engine = TestEngine::with_defaults();
    engine.submit(medium_20("A", 1000)).await;
    let before = engine.handle.stats().await.unwrap();

    engine.submit(request("X", 1000, "extreme", 20)).await;
    engine.submit(request("Y", 1000, "easy", 45)).await;

    let after = engine.handle.stats().await.unwrap();
    assert_eq!(after.buckets, before.buckets);
    assert_eq!(after.total_waiting, before.total_waiting);
    assert_eq!(after.requests_rejected, before.requests_rejected + 2);

    let publisher = engine.stop().await;
    let updates = publisher.queue_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].player_id, "A");
}

#[tokio::test(start_paused = true)]
async fn test_difficulty_matching_ignores_case() {
    let engine = TestEngine::with_defaults();

    engine.submit(request("A", 1000, "MEDIUM", 20)).await;
    engine.submit(request("B", 1020, "Medium", 20)).await;
    engine.next_sweep().await;

    let batches = engine.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].groups[0].difficulty, Difficulty::Medium);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_buckets_are_matched_independently() {
    let engine = TestEngine::with_defaults();

    engine.submit(request("A", 1000, "easy", 10)).await;
    engine.submit(request("B", 1005, "hard", 30)).await;
    engine.submit(request("C", 1010, "easy", 10)).await;
    engine.submit(request("D", 1015, "hard", 30)).await;
    engine.next_sweep().await;

    let batches = engine.batches();
    assert_eq!(batches.len(), 1, "one batch per sweep");
    let batch = &batches[0];
    assert_eq!(batch.groups.len(), 2);
    assert_eq!(batch.match_count(), 2);

    let mut found = pairs(batch);
    found.sort();
    assert_eq!(
        found,
        vec![
            ("A".to_string(), "C".to_string()),
            ("B".to_string(), "D".to_string())
        ]
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_positions_and_eta_follow_skill_order() {
    let engine = TestEngine::with_defaults();

    engine.submit(medium_20("A", 1000)).await;
    engine.submit(medium_20("B", 1010)).await;
    engine.submit(medium_20("C", 1020)).await;
    engine.submit(medium_20("D", 1015)).await;

    let publisher = engine.stop().await;
    let first = |id: &str| updates_for(&publisher, id)[0].clone();

    assert_eq!(first("A").position, 1);
    assert_eq!(first("B").position, 2);
    assert_eq!(first("C").position, 3);
    // D lands between B and C
    assert_eq!(first("D").position, 3);

    assert_eq!(first("A").eta, 0);
    assert_eq!(first("B").eta, 0);
    assert_eq!(first("C").eta, 2);
    assert_eq!(first("D").eta, 2);
}

#[tokio::test(start_paused = true)]
async fn test_resubmit_replaces_previous_entry() {
    let engine = TestEngine::with_defaults();

    engine.submit(medium_20("A", 1000)).await;
    engine.submit(medium_20("B", 1010)).await;
    engine.submit(medium_20("A", 2000)).await;
    engine.flush().await;

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.total_waiting, 2);

    let updates = engine.updates_for("A");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].position, 1);
    assert_eq!(updates[1].position, 2);

    // the old 1000 entry is gone, so A no longer pairs with B
    engine.next_sweep().await;
    assert!(engine.batches().is_empty());
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_undelivered_batch_is_requeued_and_retried() {
    let engine = TestEngine::with_defaults();
    engine.publisher.fail_next_batches(1);

    engine.submit(medium_20("A", 1000)).await;
    engine.submit(medium_20("B", 1010)).await;
    engine.next_sweep().await;

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.entries_requeued, 2);
    assert_eq!(stats.total_waiting, 2);
    assert!(engine.batches().is_empty());
    assert_eq!(
        engine.statuses_for("A"),
        vec![QueueStatus::Joined, QueueStatus::Requeued]
    );

    engine.next_sweep().await;

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.batches_published, 1);
    assert_eq!(stats.total_waiting, 0);
    assert_eq!(
        pairs(&engine.batches()[0]),
        vec![("A".to_string(), "B".to_string())]
    );
    engine.stop().await;
}

#[tokio::test]
async fn test_inbound_join_and_leave_messages() {
    let engine = TestEngine::with_defaults();

    let join = br#"{"player_id":"p1","elo_rank":1200,"difficulty":"Hard","time":30,"timestamp":1700000000000}"#;
    assert_eq!(process_message(&engine.handle, join).await, Disposition::Ack);
    engine.settle().await;
    assert_eq!(engine.handle.stats().await.unwrap().total_waiting, 1);

    let leave = br#"{"player_id":"p1","action":"leave"}"#;
    assert_eq!(process_message(&engine.handle, leave).await, Disposition::Ack);

    let garbage = b"{not json";
    assert_eq!(process_message(&engine.handle, garbage).await, Disposition::Ack);

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.total_waiting, 0);
    assert_eq!(stats.withdrawals, 1);

    let publisher = engine.stop().await;
    assert_eq!(
        statuses_for(&publisher, "p1"),
        vec![QueueStatus::Joined, QueueStatus::Left]
    );
}

#[tokio::test]
async fn test_leave_removes_player_from_every_bucket() {
    let engine = TestEngine::with_defaults();

    engine.submit(request("p1", 1000, "easy", 10)).await;
    engine.submit(request("p1", 1000, "hard", 30)).await;
    engine.settle().await;
    assert_eq!(engine.handle.stats().await.unwrap().total_waiting, 2);

    assert!(engine.handle.withdraw("p1").await.unwrap());
    assert_eq!(engine.handle.stats().await.unwrap().total_waiting, 0);
    engine.stop().await;
}

#[tokio::test]
async fn test_messages_after_shutdown_are_redelivered() {
    let TestEngine {
        runtime, handle, ..
    } = TestEngine::with_defaults();
    runtime.shutdown(Duration::from_secs(1)).await.unwrap();

    let join = br#"{"player_id":"late","skill":1200,"difficulty":"easy","duration":"10"}"#;
    assert_eq!(
        process_message(&handle, join).await,
        Disposition::Nack { requeue: true }
    );
}
