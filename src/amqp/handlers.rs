//! AMQP consumer for the request topic
//!
//! Join and leave messages are decoded, validated and handed to a
//! [`MessageHandler`]. Malformed messages are logged and dropped. A message
//! the engine could not take because it is not running goes back to the
//! broker for redelivery; every other outcome is acknowledged.

use crate::amqp::messages::{InboundMessage, MessageUtils};
use crate::config::AmqpSettings;
use crate::error::{MatchmakingError, Result};
use crate::matchmaking::EngineHandle;
use crate::metrics::MetricsCollector;
use crate::types::{MatchRequest, PlayerId};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        BasicQosArguments, Channel, ExchangeDeclareArguments, QueueBindArguments,
        QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Unacknowledged deliveries the broker may push ahead of processing
const PREFETCH_COUNT: u16 = 64;

/// Trait defining the interface for handling inbound requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a request to join a queue
    async fn handle_match_request(&self, request: MatchRequest) -> Result<()>;

    /// Handle a request to leave every queue; `false` if the player was not waiting
    async fn handle_leave_request(&self, player_id: PlayerId) -> Result<bool>;
}

#[async_trait]
impl MessageHandler for EngineHandle {
    async fn handle_match_request(&self, request: MatchRequest) -> Result<()> {
        self.submit(request).await
    }

    async fn handle_leave_request(&self, player_id: PlayerId) -> Result<bool> {
        self.withdraw(&player_id).await
    }
}

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack { requeue: bool },
}

/// Decode one delivery and pass it to the handler
pub async fn process_message(handler: &dyn MessageHandler, content: &[u8]) -> Disposition {
    let message = match MessageUtils::deserialize_inbound(content) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Dropping malformed request: {} - payload: {}",
                e,
                MessageUtils::payload_preview(content)
            );
            return Disposition::Ack;
        }
    };

    let result = match message {
        InboundMessage::Match(request) => {
            debug!(
                "Match request - player: '{}', skill: {}, difficulty: '{}', duration: '{}'",
                request.player_id, request.skill, request.difficulty, request.duration
            );
            handler.handle_match_request(request).await
        }
        InboundMessage::Leave(request) => {
            debug!("Leave request - player: '{}'", request.player_id);
            handler
                .handle_leave_request(request.player_id)
                .await
                .map(|_| ())
        }
    };

    match result {
        Ok(()) => Disposition::Ack,
        Err(e) => {
            let requeue = e
                .downcast_ref::<MatchmakingError>()
                .is_some_and(MatchmakingError::is_redeliverable);
            error!("Request handling failed (requeue: {}): {}", requeue, e);
            if requeue {
                Disposition::Nack { requeue }
            } else {
                Disposition::Ack
            }
        }
    }
}

/// Queue and binding the consumer group reads from
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub exchange_name: String,
    pub request_topic: String,
    pub queue_name: String,
}

impl From<&AmqpSettings> for ConsumerConfig {
    fn from(settings: &AmqpSettings) -> Self {
        Self {
            exchange_name: settings.exchange_name.clone(),
            request_topic: settings.request_topic.clone(),
            // One shared queue per group, so instances split the load
            queue_name: format!("{}.{}", settings.consumer_group, settings.request_topic),
        }
    }
}

/// Consumer for the request topic
pub struct RequestConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    config: ConsumerConfig,
    metrics: Arc<MetricsCollector>,
    consumer_tag: String,
}

impl RequestConsumer {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        channel: Channel,
        config: ConsumerConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let consumer_tag = format!("skillqueue-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            config,
            metrics,
            consumer_tag,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Declare the group queue, bind it, and start consuming
    pub async fn start_consuming(&self) -> Result<()> {
        self.setup_queue().await?;

        let args = BasicConsumeArguments::new(&self.config.queue_name, &self.consumer_tag)
            .manual_ack(true)
            .finish();

        self.channel
            .basic_consume(
                RequestDeliveryConsumer {
                    handler: self.handler.clone(),
                    metrics: self.metrics.clone(),
                },
                args,
            )
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!(
            "Consuming requests from queue '{}' (topic '{}')",
            self.config.queue_name, self.config.request_topic
        );
        Ok(())
    }

    async fn setup_queue(&self) -> Result<()> {
        let exchange = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic")
            .durable(true)
            .finish();
        self.channel
            .exchange_declare(exchange)
            .await
            .map_err(|e| amqp_error("declare exchange", e))?;

        let queue = QueueDeclareArguments::new(&self.config.queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel
            .queue_declare(queue)
            .await
            .map_err(|e| amqp_error("declare queue", e))?;

        let bind = QueueBindArguments::new(
            &self.config.queue_name,
            &self.config.exchange_name,
            &self.config.request_topic,
        );
        self.channel
            .queue_bind(bind)
            .await
            .map_err(|e| amqp_error("bind queue", e))?;

        self.channel
            .basic_qos(BasicQosArguments::new(0, PREFETCH_COUNT, false))
            .await
            .map_err(|e| amqp_error("set prefetch", e))?;

        debug!(
            "Queue '{}' bound to {} with key '{}'",
            self.config.queue_name, self.config.exchange_name, self.config.request_topic
        );
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| amqp_error("stop consuming", e))?;

        info!("Stopped consuming requests");
        Ok(())
    }
}

fn amqp_error(operation: &str, e: amqprs::error::Error) -> anyhow::Error {
    MatchmakingError::AmqpConnectionFailed {
        message: format!("Failed to {}: {}", operation, e),
    }
    .into()
}

/// Per-delivery callback registered with the channel
struct RequestDeliveryConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<MetricsCollector>,
}

#[async_trait]
impl AsyncConsumer for RequestDeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let timer = self.metrics.start_timer();

        debug!(
            "Delivery {} on '{}' ({} bytes)",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let disposition = process_message(self.handler.as_ref(), &content).await;
        let settled = match disposition {
            Disposition::Ack => channel
                .basic_ack(BasicAckArguments::new(delivery_tag, false))
                .await,
            Disposition::Nack { requeue } => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, requeue))
                .await,
        };

        let success = disposition == Disposition::Ack;
        self.metrics
            .record_amqp_operation("consume", success, timer.stop());

        if let Err(e) = settled {
            error!("Failed to settle delivery {}: {}", delivery_tag, e);
        }
    }
}
