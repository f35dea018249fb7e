//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the skillqueue matchmaking
//! service using Prometheus metrics.

use crate::matchmaking::engine::EngineStats;
use crate::types::MatchBatch;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue-related metrics
    queue_metrics: QueueMetrics,

    /// Match-related metrics
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue-related metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Match requests by outcome (accepted, rejected)
    pub requests_total: IntCounterVec,

    /// Players currently waiting, per bucket
    pub players_waiting: IntGaugeVec,

    /// Players currently waiting across all buckets
    pub players_waiting_total: IntGauge,

    /// Explicit withdrawals
    pub withdrawals_total: IntCounter,

    /// Queue update notices by publish outcome
    pub queue_updates_total: IntCounterVec,
}

/// Match-related metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches formed, per bucket
    pub matches_formed_total: IntCounterVec,

    /// Match batches by publish outcome
    pub batches_total: IntCounterVec,

    /// Entries returned to their bucket after an undelivered batch
    pub entries_requeued_total: IntCounter,

    /// How long matched players waited
    pub match_wait_time_seconds: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Inbound request processing time
    pub request_processing_duration: Histogram,

    /// Sweep duration
    pub sweep_duration: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record an inbound match request being handled
    pub fn record_request(&self, accepted: bool, duration: Duration) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        self.queue_metrics
            .requests_total
            .with_label_values(&[outcome])
            .inc();

        self.performance_metrics
            .request_processing_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_withdrawal(&self) {
        self.queue_metrics.withdrawals_total.inc();
    }

    /// Record a queue update notice publish attempt
    pub fn record_queue_update(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.queue_metrics
            .queue_updates_total
            .with_label_values(&[status])
            .inc();
    }

    /// Record one sweep and the batch it produced, if any
    pub fn record_sweep(&self, batch: Option<&MatchBatch>, duration: Duration) {
        self.performance_metrics
            .sweep_duration
            .observe(duration.as_secs_f64());

        let Some(batch) = batch else {
            return;
        };
        for group in &batch.groups {
            let duration_label = group.duration.to_string();
            self.match_metrics
                .matches_formed_total
                .with_label_values(&[group.difficulty.as_str(), duration_label.as_str()])
                .inc_by(group.matches.len() as u64);
        }
    }

    /// Record how long a matched player waited
    pub fn record_match_wait(&self, wait_seconds: u64) {
        self.match_metrics
            .match_wait_time_seconds
            .observe(wait_seconds as f64);
    }

    /// Record a match batch publish attempt
    pub fn record_batch_publish(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.match_metrics
            .batches_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_requeued(&self, count: usize) {
        self.match_metrics
            .entries_requeued_total
            .inc_by(count as u64);
    }

    /// Update waiting gauges from engine stats
    pub fn update_from_engine_stats(&self, stats: &EngineStats) {
        for bucket in &stats.buckets {
            let duration_label = bucket.duration.to_string();
            self.queue_metrics
                .players_waiting
                .with_label_values(&[bucket.difficulty.as_str(), duration_label.as_str()])
                .set(bucket.waiting as i64);
        }

        self.queue_metrics
            .players_waiting_total
            .set(stats.total_waiting as i64);
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("skillqueue_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "skillqueue_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("skillqueue_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "skillqueue_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("skillqueue_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("skillqueue_requests_total", "Match requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "skillqueue_players_waiting",
                "Players currently waiting, per bucket",
            ),
            &["difficulty", "duration"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let players_waiting_total = IntGauge::new(
            "skillqueue_players_waiting_total",
            "Players currently waiting across all buckets",
        )?;
        registry.register(Box::new(players_waiting_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("skillqueue_withdrawals_total", "Explicit queue withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let queue_updates_total = IntCounterVec::new(
            Opts::new(
                "skillqueue_queue_updates_total",
                "Queue update notices by publish outcome",
            ),
            &["status"],
        )?;
        registry.register(Box::new(queue_updates_total.clone()))?;

        Ok(Self {
            requests_total,
            players_waiting,
            players_waiting_total,
            withdrawals_total,
            queue_updates_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_formed_total = IntCounterVec::new(
            Opts::new("skillqueue_matches_formed_total", "Matches formed"),
            &["difficulty", "duration"],
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let batches_total = IntCounterVec::new(
            Opts::new(
                "skillqueue_match_batches_total",
                "Match batches by publish outcome",
            ),
            &["status"],
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let entries_requeued_total = IntCounter::new(
            "skillqueue_entries_requeued_total",
            "Entries returned to their bucket after an undelivered batch",
        )?;
        registry.register(Box::new(entries_requeued_total.clone()))?;

        let match_wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "skillqueue_match_wait_time_seconds",
                "Time matched players spent waiting",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;
        registry.register(Box::new(match_wait_time_seconds.clone()))?;

        Ok(Self {
            matches_formed_total,
            batches_total,
            entries_requeued_total,
            match_wait_time_seconds,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let request_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "skillqueue_request_processing_duration_seconds",
                "Inbound request processing time",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(request_processing_duration.clone()))?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new("skillqueue_sweep_duration_seconds", "Matching sweep time")
                .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "skillqueue_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            request_processing_duration,
            sweep_duration,
            amqp_operation_duration,
        })
    }
}
