//! Main application state and service coordination
//!
//! `AppState` owns every long-lived component: the broker connection, the
//! engine coordinator and its runtime, the request consumer and the health
//! server. It brings them up in dependency order and tears them down in
//! reverse.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{ConsumerConfig, MessageHandler, RequestConsumer};
use crate::amqp::publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
};
use crate::config::AppConfig;
use crate::matchmaking::{EngineCoordinator, EngineHandle, EngineRuntime};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthProbe, HealthStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interval of the service health gauge refresh
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Shutdown error: {message}")]
    Shutdown { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    /// Absent when running without a broker
    amqp_connection: Option<AmqpConnection>,

    metrics_service: Arc<MetricsService>,

    engine: EngineHandle,

    /// Present until `start`
    coordinator: Option<EngineCoordinator>,

    /// Present between `start` and `shutdown`
    runtime: Option<EngineRuntime>,

    request_consumer: Option<RequestConsumer>,

    background_tasks: Vec<JoinHandle<()>>,

    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Connect to the broker and build every component
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing skillqueue matchmaking service");
        info!(
            "Configuration: service={}, amqp_url={}, exchange={}",
            config.service.name, config.amqp.url, config.amqp.exchange_name
        );

        let connection = Self::initialize_amqp(&config).await?;
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;
        let publisher = AmqpEventPublisher::new(channel, PublisherConfig::from(&config.amqp))
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Self::assemble(config, Some(connection), Arc::new(publisher))
    }

    /// Build every component without a broker; events are only logged
    pub fn without_broker(config: AppConfig) -> Result<Self, ServiceError> {
        warn!("Running without a broker: no requests will be consumed, events are only logged");
        Self::assemble(config, None, Arc::new(LoggingEventPublisher))
    }

    fn assemble(
        config: AppConfig,
        amqp_connection: Option<AmqpConnection>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let coordinator =
            EngineCoordinator::new(&config.matchmaking, publisher, metrics_collector.clone())
                .map_err(|e| ServiceError::Configuration {
                    message: format!("Failed to build matchmaking engine: {}", e),
                })?;
        let engine = coordinator.handle();

        let probe = HealthProbe::new(
            config.service.name.clone(),
            engine.clone(),
            amqp_connection.clone(),
        );
        let health_server = HealthServer::new(
            HealthServerConfig {
                port: config.service.health_port,
                host: "0.0.0.0".to_string(),
            },
            metrics_collector.clone(),
        )
        .with_probe(probe);
        let metrics_service = Arc::new(MetricsService::new(
            metrics_collector,
            Arc::new(health_server),
        ));

        Ok(Self {
            config,
            amqp_connection,
            metrics_service,
            engine,
            coordinator: Some(coordinator),
            runtime: None,
            request_consumer: None,
            background_tasks: Vec::new(),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the engine, health endpoints and request consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting skillqueue matchmaking service");

        let coordinator = self
            .coordinator
            .take()
            .ok_or_else(|| ServiceError::Initialization {
                message: "Service has already been started".to_string(),
            })?;
        self.runtime = Some(coordinator.start());

        *self.is_running.write().await = true;

        self.start_metrics_service();
        self.start_background_tasks();

        if let Err(e) = self.start_amqp_consumption().await {
            error!("Failed to start request consumption: {}", e);
            return Err(e);
        }

        info!("✅ Skillqueue matchmaking service started successfully");
        Ok(())
    }

    /// Graceful shutdown
    ///
    /// Intake stops first, then the engine drains within `grace`, then the
    /// health server and broker connection go away.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of skillqueue service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.request_consumer.take() {
            match consumer.stop_consuming().await {
                Ok(()) => info!("✅ Request consumption stopped"),
                Err(e) => warn!("Failed to stop request consumer: {}", e),
            }
        }

        let engine_result = match self.runtime.take() {
            Some(runtime) => runtime.shutdown(grace).await,
            None => Ok(()),
        };

        self.metrics_service.stop();
        self.stop_background_tasks();

        if let Some(connection) = self.amqp_connection.take() {
            match connection.close().await {
                Ok(()) => info!("✅ AMQP connection closed"),
                Err(e) => warn!("Failed to close AMQP connection: {}", e),
            }
        }

        engine_result.map_err(|e| ServiceError::Shutdown {
            message: e.to_string(),
        })?;

        info!("✅ Skillqueue service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Handle to the matchmaking engine
    pub fn engine(&self) -> EngineHandle {
        self.engine.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Probe over the current components, for health checks
    pub fn health_probe(&self) -> HealthProbe {
        HealthProbe::new(
            self.config.service.name.clone(),
            self.engine.clone(),
            self.amqp_connection.clone(),
        )
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<AmqpConnection, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        AmqpConnection::new(AmqpConfig::from(&config.amqp))
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })
    }

    fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        info!("Metrics and health endpoints starting on port {}", port);
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("No broker configured, skipping request consumption");
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let handler: Arc<dyn MessageHandler> = Arc::new(self.engine.clone());
        let consumer = RequestConsumer::new(
            handler,
            channel,
            ConsumerConfig::from(&self.config.amqp),
            self.metrics_service.collector(),
        );

        consumer
            .start_consuming()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming requests: {}", e),
            })?;

        info!(
            "Listening for match requests on '{}' as group '{}'",
            self.config.amqp.request_topic, self.config.amqp.consumer_group
        );
        self.request_consumer = Some(consumer);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let metrics_collector = self.metrics_service.collector();
        let probe = self.health_probe();
        let is_running = self.is_running.clone();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
            let started_at = Instant::now();
            debug!("Health metrics task started");

            while *is_running.read().await {
                interval.tick().await;

                metrics_collector.update_uptime(started_at.elapsed());
                match HealthCheck::check(&probe).await {
                    Ok(health) => {
                        metrics_collector.update_health_status(health.status.as_gauge());
                        for check in &health.checks {
                            metrics_collector.update_component_health(
                                &check.name,
                                check.status != HealthStatus::Unhealthy,
                            );
                        }
                    }
                    Err(e) => warn!("Periodic health check failed: {}", e),
                }
            }

            debug!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
    }

    fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
        debug!("Stopped {} background tasks", task_count);
    }
}
