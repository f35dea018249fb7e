//! Engine coordinator: the single control loop around `MatchEngine`
//!
//! Lifecycle is `Idle -> Running -> Draining -> Stopped`. While running, one
//! task owns the engine and multiplexes inbound commands, sweep ticks and
//! dispatcher feedback, so no two queue mutations ever interleave and no
//! request is processed mid-sweep.
//!
//! Publishing happens on a separate dispatcher task fed through a bounded
//! channel, after the mutation that produced each message has been applied.
//! When a match batch cannot be delivered the dispatcher sends its entries
//! back over an unbounded feedback channel and the engine re-queues them.
//! The engine only ever waits on the dispatcher, never the other way round.

use crate::amqp::publisher::EventPublisher;
use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::matchmaking::bucket::BucketKey;
use crate::matchmaking::engine::{EngineStats, MatchEngine};
use crate::metrics::MetricsCollector;
use crate::types::{EngineState, MatchBatch, MatchRequest, QueueEntry, QueueUpdate};
use crate::utils::{current_unix_timestamp, wait_seconds};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Capacity of the engine -> dispatcher channel
const OUTBOUND_BUFFER_SIZE: usize = 1024;

/// Work handed to the engine loop
#[derive(Debug)]
enum EngineCommand {
    Enqueue(MatchRequest),
    Withdraw {
        player_id: String,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Messages waiting to be published
#[derive(Debug)]
enum Outbound {
    Update(QueueUpdate),
    Batch {
        batch: MatchBatch,
        matched: Vec<(BucketKey, QueueEntry)>,
    },
}

/// Dispatcher outcome reported back to the engine loop
#[derive(Debug)]
enum DispatchReport {
    Published(Vec<(BucketKey, QueueEntry)>),
    Undelivered(Vec<(BucketKey, QueueEntry)>),
}

/// Cloneable handle for talking to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    state: watch::Receiver<EngineState>,
    capacity: usize,
}

impl EngineHandle {
    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Capacity of the inbound hand-off queue
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests currently buffered ahead of the engine
    pub fn pending(&self) -> usize {
        self.capacity - self.commands.capacity()
    }

    /// Wait until the engine reaches `target`
    pub async fn wait_for_state(&self, target: EngineState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map_err(|_| MatchmakingError::InternalError {
                message: format!("Engine went away before reaching {}", target),
            })?;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state != EngineState::Running {
            return Err(MatchmakingError::EngineUnavailable {
                state: state.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn unavailable(&self) -> anyhow::Error {
        MatchmakingError::EngineUnavailable {
            state: self.state().to_string(),
        }
        .into()
    }

    /// Hand a request to the engine, waiting for room if the queue is full
    ///
    /// Returns once the request is buffered; classification and queuing
    /// happen later on the engine loop.
    pub async fn submit(&self, request: MatchRequest) -> Result<()> {
        self.ensure_running()?;
        self.commands
            .send(EngineCommand::Enqueue(request))
            .await
            .map_err(|_| self.unavailable())
    }

    /// Hand a request to the engine without waiting
    pub fn try_submit(&self, request: MatchRequest) -> Result<()> {
        self.ensure_running()?;
        self.commands
            .try_send(EngineCommand::Enqueue(request))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MatchmakingError::QueueFull {
                    capacity: self.capacity,
                }
                .into(),
                mpsc::error::TrySendError::Closed(_) => self.unavailable(),
            })
    }

    /// Remove a player from every bucket
    ///
    /// Also cancels the player's part in a match batch that is still being
    /// published. `false` if they were neither queued nor in flight.
    pub async fn withdraw(&self, player_id: &str) -> Result<bool> {
        self.ensure_running()?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Withdraw {
                player_id: player_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Snapshot of engine statistics
    ///
    /// Answered in order with other commands, so every request submitted
    /// before this call has been processed by the time it returns.
    pub async fn stats(&self) -> Result<EngineStats> {
        self.ensure_running()?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Stats { reply })
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Snapshot of engine statistics without waiting for a request slot
    ///
    /// Fails with `QueueFull` instead of queuing behind a saturated buffer.
    pub async fn try_stats(&self) -> Result<EngineStats> {
        self.ensure_running()?;
        let (reply, response) = oneshot::channel();
        self.commands
            .try_send(EngineCommand::Stats { reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MatchmakingError::QueueFull {
                    capacity: self.capacity,
                }
                .into(),
                mpsc::error::TrySendError::Closed(_) => self.unavailable(),
            })?;
        response.await.map_err(|_| self.unavailable())
    }
}

/// Engine coordinator in the `Idle` state
pub struct EngineCoordinator {
    engine: MatchEngine,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    tick_interval: Duration,
    capacity: usize,
    commands_tx: mpsc::Sender<EngineCommand>,
    commands_rx: mpsc::Receiver<EngineCommand>,
    state_tx: Arc<watch::Sender<EngineState>>,
    state_rx: watch::Receiver<EngineState>,
}

impl EngineCoordinator {
    /// Create a coordinator from matchmaking settings
    pub fn new(
        settings: &MatchmakingSettings,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let engine = MatchEngine::new(settings)?;
        Self::with_engine(
            engine,
            settings.tick_interval(),
            settings.request_buffer_size,
            publisher,
            metrics,
        )
    }

    /// Create a coordinator around an existing engine
    pub fn with_engine(
        engine: MatchEngine,
        tick_interval: Duration,
        capacity: usize,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        if capacity == 0 || tick_interval.is_zero() {
            return Err(MatchmakingError::ConfigurationError {
                message: "Request buffer and tick interval must be non-zero".to_string(),
            }
            .into());
        }

        let (commands_tx, commands_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);

        Ok(Self {
            engine,
            publisher,
            metrics,
            tick_interval,
            capacity,
            commands_tx,
            commands_rx,
            state_tx: Arc::new(state_tx),
            state_rx,
        })
    }

    /// Report `Running` without starting the loop, so nothing drains intake
    #[cfg(test)]
    pub(crate) fn mark_running(&self) {
        self.state_tx.send_replace(EngineState::Running);
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.commands_tx.clone(),
            state: self.state_rx.clone(),
            capacity: self.capacity,
        }
    }

    /// Start the tick source and begin accepting requests
    pub fn start(self) -> EngineRuntime {
        let handle = self.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            publisher: self.publisher,
            metrics: self.metrics.clone(),
            outbound: outbound_rx,
            feedback: feedback_tx,
        };
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let state_tx = self.state_tx.clone();
        let control = ControlLoop {
            engine: self.engine,
            metrics: self.metrics,
            tick_interval: self.tick_interval,
            commands: self.commands_rx,
            outbound: outbound_tx,
            feedback: feedback_rx,
            shutdown: shutdown_rx,
            state: self.state_tx,
        };
        state_tx.send_replace(EngineState::Running);
        let engine_task = tokio::spawn(control.run());

        info!("Matchmaking engine running");

        EngineRuntime {
            handle,
            state: state_tx,
            shutdown: shutdown_tx,
            engine_task,
            dispatcher_task,
        }
    }
}

/// A started engine: its handle plus the tasks behind it
pub struct EngineRuntime {
    handle: EngineHandle,
    state: Arc<watch::Sender<EngineState>>,
    shutdown: watch::Sender<bool>,
    engine_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl EngineRuntime {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    /// Stop intake, let in-flight work finish, and stop after `grace`
    ///
    /// Buffered requests are still applied and their notices flushed if that
    /// fits inside the grace period; whatever is left is abandoned.
    pub async fn shutdown(mut self, grace: Duration) -> Result<()> {
        info!("Shutting down matchmaking engine (grace {:?})", grace);
        self.state.send_replace(EngineState::Draining);
        self.shutdown.send_replace(true);

        let engine_task = &mut self.engine_task;
        let dispatcher_task = &mut self.dispatcher_task;
        let drained = timeout(grace, async move {
            let engine = engine_task.await;
            let dispatcher = dispatcher_task.await;
            (engine, dispatcher)
        })
        .await;

        let result = match drained {
            Ok((engine, dispatcher)) => {
                if let Err(e) = engine {
                    error!("Engine task ended abnormally: {}", e);
                }
                if let Err(e) = dispatcher {
                    error!("Dispatcher task ended abnormally: {}", e);
                }
                info!("Matchmaking engine stopped");
                Ok(())
            }
            Err(_) => {
                warn!("Engine shutdown grace period exceeded, abandoning remaining work");
                self.engine_task.abort();
                self.dispatcher_task.abort();
                Err(MatchmakingError::InternalError {
                    message: format!("Engine did not drain within {:?}", grace),
                }
                .into())
            }
        };

        self.state.send_replace(EngineState::Stopped);
        result
    }
}

/// Task that owns the engine
struct ControlLoop {
    engine: MatchEngine,
    metrics: Arc<MetricsCollector>,
    tick_interval: Duration,
    commands: mpsc::Receiver<EngineCommand>,
    outbound: mpsc::Sender<Outbound>,
    feedback: mpsc::UnboundedReceiver<DispatchReport>,
    shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<EngineState>>,
}

impl ControlLoop {
    async fn run(mut self) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                Some(report) = self.feedback.recv() => {
                    self.handle_report(report).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.handle_tick().await;
                }
            }
        }

        self.drain().await;
    }

    /// Apply whatever was buffered before intake closed, then stop
    async fn drain(mut self) {
        self.state.send_replace(EngineState::Draining);
        self.commands.close();

        let mut drained = 0usize;
        while let Some(command) = self.commands.recv().await {
            self.handle_command(command).await;
            drained += 1;
        }
        if drained > 0 {
            info!("Applied {} buffered commands while draining", drained);
        }

        let discarded = self.engine.discard_all();
        if discarded > 0 {
            warn!("Discarding {} waiting entries on shutdown", discarded);
        }
        self.metrics.update_from_engine_stats(&self.engine.stats());
        // dropping self closes the outbound channel so the dispatcher can finish
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Enqueue(request) => self.handle_enqueue(request).await,
            EngineCommand::Withdraw { player_id, reply } => {
                let now = current_unix_timestamp();
                let notice = self.engine.withdraw(&player_id, now);
                let removed = notice.is_some();
                if let Some(notice) = notice {
                    info!("Player {} left the queue", player_id);
                    self.metrics.record_withdrawal();
                    self.dispatch(Outbound::Update(notice)).await;
                }
                let _ = reply.send(removed);
            }
            EngineCommand::Stats { reply } => {
                let _ = reply.send(self.engine.stats());
            }
        }
    }

    async fn handle_enqueue(&mut self, request: MatchRequest) {
        let timer = self.metrics.start_timer();
        let now = current_unix_timestamp();
        let player_id = request.player_id.clone();

        match self.engine.enqueue(request, now) {
            Ok(update) => {
                self.metrics.record_request(true, timer.stop());
                debug!(
                    "Player {} queued at position {} (eta {}s)",
                    player_id, update.position, update.eta
                );
                self.dispatch(Outbound::Update(update)).await;
            }
            Err(e) => {
                self.metrics.record_request(false, timer.stop());
                warn!("Dropping match request from {}: {}", player_id, e);
            }
        }
    }

    async fn handle_tick(&mut self) {
        let timer = self.metrics.start_timer();
        let now = current_unix_timestamp();
        let outcome = self.engine.sweep(now);
        self.metrics
            .record_sweep(outcome.as_ref().map(|o| &o.batch), timer.stop());

        if let Some(outcome) = outcome {
            for (_, entry) in &outcome.matched {
                self.metrics
                    .record_match_wait(wait_seconds(entry.enqueued_at, now));
            }
            info!(
                "Sweep formed {} matches across {} buckets",
                outcome.batch.match_count(),
                outcome.batch.groups.len()
            );
            self.dispatch(Outbound::Batch {
                batch: outcome.batch,
                matched: outcome.matched,
            })
            .await;
        }

        self.metrics.update_from_engine_stats(&self.engine.stats());
    }

    async fn handle_report(&mut self, report: DispatchReport) {
        match report {
            DispatchReport::Published(entries) => self.engine.record_batch_published(&entries),
            DispatchReport::Undelivered(entries) => {
                let now = current_unix_timestamp();
                let notices = self.engine.requeue(entries, now);
                warn!(
                    "Re-queued {} players after an undelivered match batch",
                    notices.len()
                );
                self.metrics.record_requeued(notices.len());
                for notice in notices {
                    self.dispatch(Outbound::Update(notice)).await;
                }
            }
        }
    }

    async fn dispatch(&self, message: Outbound) {
        if self.outbound.send(message).await.is_err() {
            error!("Outbound dispatcher has stopped, dropping message");
        }
    }
}

/// Task that publishes everything the engine produces
struct Dispatcher {
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    outbound: mpsc::Receiver<Outbound>,
    feedback: mpsc::UnboundedSender<DispatchReport>,
}

impl Dispatcher {
    async fn run(mut self) {
        while let Some(message) = self.outbound.recv().await {
            match message {
                Outbound::Update(update) => self.publish_update(update).await,
                Outbound::Batch { batch, matched } => self.publish_batch(batch, matched).await,
            }
        }
        debug!("Outbound dispatcher finished");
    }

    async fn publish_update(&self, update: QueueUpdate) {
        let timer = self.metrics.start_timer();
        let player_id = update.player_id.clone();
        match self.publisher.publish_queue_update(update).await {
            Ok(()) => {
                self.metrics.record_queue_update(true);
                self.metrics
                    .record_amqp_operation("publish_queue_update", true, timer.stop());
            }
            Err(e) => {
                // a lost status notice is acceptable
                warn!("Failed to publish queue update for {}: {}", player_id, e);
                self.metrics.record_queue_update(false);
                self.metrics
                    .record_amqp_operation("publish_queue_update", false, timer.stop());
            }
        }
    }

    async fn publish_batch(&self, batch: MatchBatch, matched: Vec<(BucketKey, QueueEntry)>) {
        let timer = self.metrics.start_timer();
        let key = batch.key();
        let report = match self.publisher.publish_match_batch(batch).await {
            Ok(()) => {
                info!("Published match batch {}", key);
                self.metrics.record_batch_publish(true);
                self.metrics
                    .record_amqp_operation("publish_match_batch", true, timer.stop());
                DispatchReport::Published(matched)
            }
            Err(e) => {
                error!(
                    "Failed to publish match batch {}, returning {} players to their queues: {}",
                    key,
                    matched.len(),
                    e
                );
                self.metrics.record_batch_publish(false);
                self.metrics
                    .record_amqp_operation("publish_match_batch", false, timer.stop());
                DispatchReport::Undelivered(matched)
            }
        };

        if self.feedback.send(report).is_err() {
            debug!("Engine stopped before batch {} outcome was reported", key);
        }
    }
}
