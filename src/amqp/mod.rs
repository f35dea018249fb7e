//! AMQP integration for the matchmaking service
//!
//! This module handles the broker connection, consumption of the request
//! topic, and publishing of queue updates and match batches.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{ConsumerConfig, MessageHandler, RequestConsumer};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
    RecordingEventPublisher,
};
