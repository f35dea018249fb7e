//! Health check evaluation
//!
//! This module inspects the running engine and broker connection and turns
//! what it sees into readiness, liveness and detailed health reports for the
//! skillqueue service.

use crate::amqp::connection::AmqpConnection;
use crate::matchmaking::{EngineHandle, EngineStats};
use crate::types::EngineState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Fill level of the request buffer above which intake is reported degraded
const BUFFER_DEGRADED_RATIO: f64 = 0.9;

/// How long a health check waits for the engine to answer a stats query
const ENGINE_STATS_TIMEOUT: Duration = Duration::from_millis(500);

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form used by the health gauge (0 unhealthy, 1 degraded, 2 healthy)
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Combine two statuses, keeping the worse one
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.as_gauge() < self.as_gauge() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Everything a health check needs to look at
#[derive(Clone)]
pub struct HealthProbe {
    service_name: String,
    engine: EngineHandle,
    amqp: Option<AmqpConnection>,
    started_at: Instant,
}

impl HealthProbe {
    pub fn new(
        service_name: impl Into<String>,
        engine: EngineHandle,
        amqp: Option<AmqpConnection>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            engine,
            amqp,
            started_at: Instant::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Engine statistics, bounded in time and never waiting for a request slot
    pub async fn engine_stats(&self) -> Result<EngineStats> {
        timeout(ENGINE_STATS_TIMEOUT, self.engine.try_stats())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Engine did not answer a stats query within {:?}",
                    ENGINE_STATS_TIMEOUT
                )
            })?
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional detail when not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub engine_state: EngineState,
    pub uptime_seconds: u64,
    /// Requests buffered ahead of the engine
    pub pending_requests: usize,
    /// Absent when the engine is not running
    pub engine: Option<EngineStats>,
}

impl HealthCheck {
    /// Perform a full health check of the service
    pub async fn check(probe: &HealthProbe) -> Result<Self> {
        let checks = vec![
            Self::check_engine(probe),
            Self::check_request_buffer(probe),
            Self::check_amqp(probe),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        let engine = match probe.engine_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("Engine stats unavailable for health check: {}", e);
                None
            }
        };

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: ServiceStats {
                engine_state: probe.engine.state(),
                uptime_seconds: probe.uptime_seconds(),
                pending_requests: probe.engine.pending(),
                engine,
            },
        })
    }

    /// Liveness: the engine has not stopped
    pub fn liveness_check(probe: &HealthProbe) -> HealthStatus {
        match probe.engine.state() {
            EngineState::Running => HealthStatus::Healthy,
            EngineState::Idle | EngineState::Draining => HealthStatus::Degraded,
            EngineState::Stopped => HealthStatus::Unhealthy,
        }
    }

    /// Readiness: the engine accepts requests and the broker is reachable
    pub fn readiness_check(probe: &HealthProbe) -> HealthStatus {
        if !probe.engine.is_running() {
            return HealthStatus::Unhealthy;
        }
        Self::check_amqp(probe)
            .status
            .worst(Self::check_request_buffer(probe).status)
    }

    fn check_engine(probe: &HealthProbe) -> ComponentCheck {
        let start = Instant::now();
        let state = probe.engine.state();

        let (status, message) = match state {
            EngineState::Running => (HealthStatus::Healthy, None),
            EngineState::Draining => (
                HealthStatus::Degraded,
                Some("Engine is draining".to_string()),
            ),
            EngineState::Idle | EngineState::Stopped => (
                HealthStatus::Unhealthy,
                Some(format!("Engine is {}", state)),
            ),
        };

        ComponentCheck {
            name: "engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_request_buffer(probe: &HealthProbe) -> ComponentCheck {
        let start = Instant::now();
        let pending = probe.engine.pending();
        let capacity = probe.engine.capacity();

        let (status, message) = if (pending as f64) >= capacity as f64 * BUFFER_DEGRADED_RATIO {
            (
                HealthStatus::Degraded,
                Some(format!("{} of {} request slots in use", pending, capacity)),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentCheck {
            name: "request_buffer".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(probe: &HealthProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &probe.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("Running without a broker".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
