//! Test fixtures shared by the integration tests
#![allow(dead_code)]

use skillqueue::amqp::publisher::RecordingEventPublisher;
use skillqueue::config::MatchmakingSettings;
use skillqueue::matchmaking::{EngineCoordinator, EngineHandle, EngineRuntime};
use skillqueue::metrics::MetricsCollector;
use skillqueue::types::{MatchBatch, MatchRequest, QueueStatus, QueueUpdate};
use std::sync::Arc;
use std::time::Duration;

/// Sweep interval used by the tick-driven tests
pub const TICK: Duration = Duration::from_millis(1000);

/// A started engine wired to a recording publisher
pub struct TestEngine {
    pub runtime: EngineRuntime,
    pub handle: EngineHandle,
    pub publisher: Arc<RecordingEventPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestEngine {
    pub fn start(settings: MatchmakingSettings) -> Self {
        let publisher = Arc::new(RecordingEventPublisher::new());
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let coordinator = EngineCoordinator::new(&settings, publisher.clone(), metrics.clone())
            .expect("coordinator");
        let runtime = coordinator.start();
        let handle = runtime.handle();

        Self {
            runtime,
            handle,
            publisher,
            metrics,
        }
    }

    /// Engine ticking every `TICK` with the default match range of 100
    pub fn with_defaults() -> Self {
        Self::start(settings())
    }

    pub async fn submit(&self, request: MatchRequest) {
        self.handle.submit(request).await.expect("submit");
    }

    /// Wait until every submitted request has been applied
    pub async fn settle(&self) {
        self.handle.stats().await.expect("stats");
    }

    /// Wait until every submitted request has been applied and published
    ///
    /// Needs a paused clock; the short sleep only completes once the
    /// dispatcher has gone idle.
    pub async fn flush(&self) {
        self.settle().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Let exactly one sweep run, then wait for its output to be published
    ///
    /// Needs a paused clock so the sleep lands just past the next tick.
    pub async fn next_sweep(&self) {
        self.settle().await;
        tokio::time::sleep(TICK).await;
        // feedback from the dispatcher is handled before new commands
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.settle().await;
    }

    pub fn updates_for(&self, player_id: &str) -> Vec<QueueUpdate> {
        updates_for(&self.publisher, player_id)
    }

    pub fn statuses_for(&self, player_id: &str) -> Vec<QueueStatus> {
        statuses_for(&self.publisher, player_id)
    }

    pub fn batches(&self) -> Vec<MatchBatch> {
        self.publisher.match_batches()
    }

    /// Shut down and hand back the publisher once everything is flushed
    pub async fn stop(self) -> Arc<RecordingEventPublisher> {
        self.runtime
            .shutdown(Duration::from_secs(1))
            .await
            .expect("shutdown");
        self.publisher
    }
}

pub fn updates_for(publisher: &RecordingEventPublisher, player_id: &str) -> Vec<QueueUpdate> {
    publisher
        .queue_updates()
        .into_iter()
        .filter(|update| update.player_id == player_id)
        .collect()
}

pub fn statuses_for(publisher: &RecordingEventPublisher, player_id: &str) -> Vec<QueueStatus> {
    updates_for(publisher, player_id)
        .into_iter()
        .map(|update| update.status)
        .collect()
}

pub fn settings() -> MatchmakingSettings {
    MatchmakingSettings {
        match_range: 100.0,
        time_decay_multiplier: 0.01,
        tick_interval_ms: TICK.as_millis() as u64,
        request_buffer_size: 1000,
        ..Default::default()
    }
}

/// Request with an arrival-time timestamp
pub fn request(player_id: &str, skill: i64, difficulty: &str, duration: u32) -> MatchRequest {
    MatchRequest {
        player_id: player_id.to_string(),
        skill,
        difficulty: difficulty.to_string(),
        duration: duration.to_string(),
        timestamp: 0,
    }
}

/// Request in the medium / 20 minute bucket
pub fn medium_20(player_id: &str, skill: i64) -> MatchRequest {
    request(player_id, skill, "medium", 20)
}

/// Player id pairs of every match in a batch, each pair sorted
pub fn pairs(batch: &MatchBatch) -> Vec<(String, String)> {
    batch
        .groups
        .iter()
        .flat_map(|group| group.matches.iter())
        .map(|m| {
            let mut ids = m.player_ids.clone();
            ids.sort();
            (ids[0].clone(), ids[1].clone())
        })
        .collect()
}
