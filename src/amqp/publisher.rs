//! AMQP event publisher for outbound notices and match batches

use crate::amqp::messages::MessageUtils;
use crate::config::AmqpSettings;
use crate::error::{MatchmakingError, Result};
use crate::types::{MatchBatch, QueueUpdate};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing matchmaking events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a queue status notice, keyed by player id
    async fn publish_queue_update(&self, update: QueueUpdate) -> Result<()>;

    /// Publish every match formed by one sweep, keyed by batch
    async fn publish_match_batch(&self, batch: MatchBatch) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub queue_update_topic: String,
    pub match_found_topic: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: "matchmaking".to_string(),
            queue_update_topic: "queue-update".to_string(),
            match_found_topic: "match-found".to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            max_retry_delay_ms: 5000,
        }
    }
}

impl From<&AmqpSettings> for PublisherConfig {
    fn from(settings: &AmqpSettings) -> Self {
        Self {
            exchange_name: settings.exchange_name.clone(),
            queue_update_topic: settings.queue_update_topic.clone(),
            match_found_topic: settings.match_found_topic.clone(),
            max_retries: settings.max_retry_attempts,
            retry_delay_ms: settings.retry_delay_ms,
            ..Default::default()
        }
    }
}

/// AMQP-based event publisher
///
/// Topics become routing keys on a single topic exchange; the message key
/// travels as the AMQP message id.
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange_name, e
                ),
            }
        })?;

        info!("Declared AMQP exchange {}", self.config.exchange_name);
        Ok(())
    }

    /// Publish with exponential backoff between attempts
    async fn publish_with_retry(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(topic, key, payload.clone()).await {
                Ok(()) => {
                    debug!("Published {} to topic {}", key, topic);
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish {} to {} after {} retries: {}",
                            key, topic, self.config.max_retries, e
                        );
                        return Err(MatchmakingError::PublishFailed {
                            topic: topic.to_string(),
                            message: e.to_string(),
                        }
                        .into());
                    }

                    warn!(
                        "Publish attempt {} failed for {} on {}: {}. Retrying in {:?}",
                        retry_count, key, topic, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis(
                        (delay.as_millis() as u64 * 2).min(self.config.max_retry_delay_ms),
                    );
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let args = BasicPublishArguments::new(&self.config.exchange_name, topic);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(key)
            .with_timestamp(crate::utils::current_unix_timestamp().max(0) as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_queue_update(&self, update: QueueUpdate) -> Result<()> {
        let payload = MessageUtils::serialize_message(&update)?;
        self.publish_with_retry(&self.config.queue_update_topic, &update.player_id, payload)
            .await
    }

    async fn publish_match_batch(&self, batch: MatchBatch) -> Result<()> {
        let payload = MessageUtils::serialize_message(&batch)?;
        self.publish_with_retry(&self.config.match_found_topic, &batch.key(), payload)
            .await
    }
}

/// Publisher that only logs, for running without a broker
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_queue_update(&self, update: QueueUpdate) -> Result<()> {
        info!(
            "queue-update {} status={} position={} eta={}",
            update.player_id, update.status, update.position, update.eta
        );
        Ok(())
    }

    async fn publish_match_batch(&self, batch: MatchBatch) -> Result<()> {
        info!(
            "match-found {} matches={} players={}",
            batch.key(),
            batch.match_count(),
            batch.player_count()
        );
        Ok(())
    }
}

/// In-memory publisher that records everything it is given
///
/// Batch publishing can be made to fail a set number of times.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    updates: Mutex<Vec<QueueUpdate>>,
    batches: Mutex<Vec<MatchBatch>>,
    batch_failures_remaining: AtomicUsize,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` batch publishes
    pub fn fail_next_batches(&self, count: usize) {
        self.batch_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn queue_updates(&self) -> Vec<QueueUpdate> {
        self.updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }

    pub fn match_batches(&self) -> Vec<MatchBatch> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.clear();
        }
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_queue_update(&self, update: QueueUpdate) -> Result<()> {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
        Ok(())
    }

    async fn publish_match_batch(&self, batch: MatchBatch) -> Result<()> {
        let failing = self
            .batch_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MatchmakingError::PublishFailed {
                topic: "match-found".to_string(),
                message: "injected failure".to_string(),
            }
            .into());
        }

        if let Ok(mut batches) = self.batches.lock() {
            batches.push(batch);
        }
        Ok(())
    }
}
