//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid match request: {reason}")]
    InvalidMatchRequest { reason: String },

    #[error("No bucket for difficulty '{difficulty}' and duration '{duration}'")]
    UnknownBucket { difficulty: String, duration: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Matchmaking engine is not accepting requests ({state})")]
    EngineUnavailable { state: String },

    #[error("Inbound request queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Failed to publish to '{topic}': {message}")]
    PublishFailed { topic: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether a failed inbound delivery should be handed back to the broker
    ///
    /// Only requests refused because the engine is draining are worth redelivering;
    /// everything else would fail the same way again.
    pub fn is_redeliverable(&self) -> bool {
        matches!(self, MatchmakingError::EngineUnavailable { .. })
    }
}
