//! Skillqueue - skill-based 1v1 matchmaking service
//!
//! This crate consumes match requests over AMQP, queues players per
//! (difficulty, duration) bucket in skill order, pairs them on a periodic
//! sweep with a time-widening skill window, and publishes queue updates and
//! match batches back to the broker.

pub mod amqp;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod service;
pub mod types;
pub mod utils;
pub mod wait_time;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use matchmaking::{EngineCoordinator, EngineHandle, EngineRuntime, MatchEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
