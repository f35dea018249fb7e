//! Service layer for the skillqueue matchmaking service
//!
//! This module contains the application state that wires the engine, broker
//! and health endpoints together, plus health check evaluation.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthProbe, HealthStatus, ServiceStats};
