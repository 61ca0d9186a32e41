//! Queue services: a lifecycle gate wrapped around a dispatcher and adapter.
//!
//! `QueueService` does the work; `Writer` and `Acknowledger` are the two
//! faces callers see, one per direction of the journal.

use crate::{
    BackendAdapter, DispatcherStatus, Dispatcher, Entry, LifecycleGate, MessageQueueError,
    MessageQueueResult, OutcomeCallback, ServiceState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default in-flight batch limit on the write path.
pub const DEFAULT_MAX_IN_FLIGHT_WRITE_BATCHES: usize = 5;

/// Default in-flight batch limit on the acknowledge path.
pub const DEFAULT_MAX_IN_FLIGHT_ACK_BATCHES: usize = 10;

/// Default cadence of the idle flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on the final flush and drain at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning for one queue service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Batches allowed in flight to the backend at once.
    pub max_in_flight: usize,
    /// Idle flush cadence.
    pub flush_interval: Duration,
    /// How long `stop` waits for the final flush and in-flight batches.
    pub shutdown_timeout: Duration,
    /// Optional lower batch count limit than the backend's.
    pub max_batch_count: Option<usize>,
    /// Optional lower batch byte limit than the backend's.
    pub max_batch_bytes: Option<usize>,
}

impl ServiceConfig {
    /// Defaults for the write path.
    pub fn writes() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT_WRITE_BATCHES,
            ..Self::default()
        }
    }

    /// Defaults for the acknowledge path.
    pub fn acks() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT_ACK_BATCHES,
            ..Self::default()
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT_WRITE_BATCHES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_batch_count: None,
            max_batch_bytes: None,
        }
    }
}

/// What happened to outstanding work during `stop`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Entries sent by the final flush.
    pub flushed_entries: usize,
    /// Accepted entries that never reached the backend: the final flush and
    /// any batch still waiting for a permit when the deadline passed.
    pub lost_entries: usize,
    /// Every in-flight batch completed before the deadline.
    pub drained: bool,
    /// Batches still unanswered when shutdown gave up waiting.
    pub lost_in_flight_batches: usize,
}

/// Lifecycle operations shared by writers and acknowledgers.
#[async_trait]
pub trait Service: Send + Sync {
    /// Connect the backend and start accepting work.
    async fn start(&self) -> MessageQueueResult<()>;

    /// Flush, drain within the shutdown timeout, and disconnect.
    async fn stop(&self) -> MessageQueueResult<ShutdownReport>;

    fn state(&self) -> ServiceState;
}

/// Hands raw messages to the journal backend.
#[async_trait]
pub trait MessageQueueWriter: Service {
    /// Queue entries for writing.
    ///
    /// Suspends until the service is running; fails with `ServiceStopped`
    /// once it is stopping.
    async fn write(&self, entries: Vec<Entry>) -> MessageQueueResult<()>;
}

/// Acknowledges fully processed messages so the backend can drop them.
#[async_trait]
pub trait MessageQueueAcknowledger: Service {
    /// Queue entries for acknowledgment.
    ///
    /// Entries without a commit handle are skipped and logged.
    async fn acknowledge(&self, entries: Vec<Entry>) -> MessageQueueResult<()>;
}

struct Flusher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle gate + dispatcher + flush timer around one backend adapter.
pub struct QueueService<A: BackendAdapter> {
    role: &'static str,
    adapter: Arc<A>,
    gate: LifecycleGate,
    dispatcher: Dispatcher<A>,
    config: ServiceConfig,
    flusher: Mutex<Option<Flusher>>,
}

impl<A: BackendAdapter> QueueService<A> {
    pub fn new(
        role: &'static str,
        adapter: Arc<A>,
        config: ServiceConfig,
        on_outcome: Option<OutcomeCallback>,
    ) -> MessageQueueResult<Self> {
        if config.flush_interval.is_zero() {
            return Err(MessageQueueError::InvalidConfig(
                "flush interval must be positive".to_string(),
            ));
        }

        let limits = adapter
            .limits()
            .capped(config.max_batch_count, config.max_batch_bytes)?;
        let dispatcher = Dispatcher::new(
            Arc::clone(&adapter),
            limits,
            config.max_in_flight,
            on_outcome,
        )?;

        Ok(Self {
            role,
            adapter,
            gate: LifecycleGate::new(),
            dispatcher,
            config,
            flusher: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ServiceState {
        self.gate.state()
    }

    pub fn gate(&self) -> &LifecycleGate {
        &self.gate
    }

    pub fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }

    pub fn status(&self) -> DispatcherStatus {
        self.dispatcher.status()
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// `Idle -> Starting -> Running`.
    ///
    /// Callers already waiting in `submit` are released once the adapter has
    /// connected. A connect failure leaves the service terminated.
    pub async fn start(&self) -> MessageQueueResult<()> {
        self.gate.begin_start()?;
        let backend = self.adapter.name();
        info!(backend, role = self.role, "Starting message queue service");

        if let Err(source) = self.adapter.connect().await {
            error!(backend, role = self.role, error = %source, "Backend connection failed");
            self.gate.begin_stop();
            self.adapter.close().await;
            self.gate.mark_terminated();
            return Err(MessageQueueError::StartupFailed {
                backend: backend.to_string(),
                source,
            });
        }

        if self.gate.mark_running().is_err() {
            // Stopped while connecting; `stop` owns the rest of the teardown.
            self.adapter.close().await;
            return Err(MessageQueueError::ServiceStopped);
        }

        self.spawn_flusher();
        info!(
            backend,
            role = self.role,
            max_in_flight = self.dispatcher.max_in_flight(),
            max_batch_count = self.dispatcher.limits().max_count(),
            max_batch_bytes = self.dispatcher.limits().max_bytes(),
            "Message queue service running"
        );
        Ok(())
    }

    /// Wait for readiness, then feed `entries` to the dispatcher.
    pub async fn submit(&self, entries: Vec<Entry>) -> MessageQueueResult<()> {
        self.gate.wait_ready().await?;
        self.dispatcher.append(entries).await
    }

    /// `-> Stopping -> Terminated`.
    ///
    /// New submissions fail immediately. Batches already built, including
    /// those of writes still waiting for a permit, are dispatched in order,
    /// followed by the pending remainder. All of it gets until the shutdown
    /// timeout to complete; anything not sent or not answered by then is
    /// logged and reported as lost.
    pub async fn stop(&self) -> MessageQueueResult<ShutdownReport> {
        let backend = self.adapter.name();
        let Some(previous) = self.gate.begin_stop() else {
            debug!(backend, role = self.role, "Stop requested on a stopped service");
            return Ok(ShutdownReport {
                drained: true,
                ..ShutdownReport::default()
            });
        };
        info!(backend, role = self.role, from = %previous, "Stopping message queue service");

        let deadline = Instant::now() + self.config.shutdown_timeout;
        self.stop_flusher().await;

        let remainder = self.dispatcher.seal();
        let drain = self.dispatcher.drain(deadline).await;
        if !drain.drained {
            warn!(
                backend,
                role = self.role,
                in_flight_batches = drain.in_flight_batches,
                "Shutdown timed out; unacknowledged in-flight batches are lost"
            );
        }

        self.dispatcher.close();
        let lost_entries = self.dispatcher.discard_queued();
        // Batches leave in build order and the remainder was built last, so
        // it reached the backend exactly when nothing was left queued.
        let report = ShutdownReport {
            flushed_entries: if lost_entries == 0 { remainder } else { 0 },
            lost_entries,
            drained: drain.drained,
            lost_in_flight_batches: drain.in_flight_batches,
        };

        self.adapter.close().await;
        self.gate.mark_terminated();
        info!(
            backend,
            role = self.role,
            flushed_entries = report.flushed_entries,
            lost_entries = report.lost_entries,
            "Message queue service terminated"
        );
        Ok(report)
    }

    fn spawn_flusher(&self) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dispatcher = self.dispatcher.clone();
        let period = self.config.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.flush_if_idle(period).await {
                            debug!(error = %e, "Periodic flush stopped");
                            break;
                        }
                    }
                }
            }
        });

        *self.flusher.lock() = Some(Flusher { cancel, handle });
    }

    /// Cancel the flush timer. A batch it already took stays queued for the
    /// drain.
    async fn stop_flusher(&self) {
        let Some(Flusher { cancel, handle }) = self.flusher.lock().take() else {
            return;
        };
        cancel.cancel();
        handle.abort();
        let _ = handle.await;
    }
}

/// Write side of the journal.
pub struct Writer<A: BackendAdapter>(QueueService<A>);

impl<A: BackendAdapter> Writer<A> {
    pub fn new(
        adapter: Arc<A>,
        config: ServiceConfig,
        on_outcome: Option<OutcomeCallback>,
    ) -> MessageQueueResult<Self> {
        QueueService::new("writer", adapter, config, on_outcome).map(Self)
    }

    pub fn service(&self) -> &QueueService<A> {
        &self.0
    }
}

#[async_trait]
impl<A: BackendAdapter> Service for Writer<A> {
    async fn start(&self) -> MessageQueueResult<()> {
        self.0.start().await
    }

    async fn stop(&self) -> MessageQueueResult<ShutdownReport> {
        self.0.stop().await
    }

    fn state(&self) -> ServiceState {
        self.0.state()
    }
}

#[async_trait]
impl<A: BackendAdapter> MessageQueueWriter for Writer<A> {
    async fn write(&self, entries: Vec<Entry>) -> MessageQueueResult<()> {
        self.0.submit(entries).await
    }
}

/// Acknowledge side of the journal.
pub struct Acknowledger<A: BackendAdapter>(QueueService<A>);

impl<A: BackendAdapter> Acknowledger<A> {
    pub fn new(
        adapter: Arc<A>,
        config: ServiceConfig,
        on_outcome: Option<OutcomeCallback>,
    ) -> MessageQueueResult<Self> {
        QueueService::new("acknowledger", adapter, config, on_outcome).map(Self)
    }

    pub fn service(&self) -> &QueueService<A> {
        &self.0
    }
}

#[async_trait]
impl<A: BackendAdapter> Service for Acknowledger<A> {
    async fn start(&self) -> MessageQueueResult<()> {
        self.0.start().await
    }

    async fn stop(&self) -> MessageQueueResult<ShutdownReport> {
        self.0.stop().await
    }

    fn state(&self) -> ServiceState {
        self.0.state()
    }
}

#[async_trait]
impl<A: BackendAdapter> MessageQueueAcknowledger for Acknowledger<A> {
    async fn acknowledge(&self, entries: Vec<Entry>) -> MessageQueueResult<()> {
        let (acks, missing): (Vec<Entry>, Vec<Entry>) = entries
            .into_iter()
            .partition(|entry| entry.commit_handle().is_some());
        for entry in &missing {
            error!(
                backend = self.0.adapter.name(),
                entry = %entry,
                "Entry has no commit handle, skipping acknowledgment"
            );
        }
        self.0.submit(acks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_config_defaults() {
        let writes = ServiceConfig::writes();
        assert_eq!(writes.max_in_flight, 5);
        assert_eq!(writes.flush_interval, Duration::from_secs(1));
        assert_eq!(writes.shutdown_timeout, Duration::from_secs(5));
        assert!(writes.max_batch_count.is_none());

        let acks = ServiceConfig::acks();
        assert_eq!(acks.max_in_flight, 10);
    }
}
