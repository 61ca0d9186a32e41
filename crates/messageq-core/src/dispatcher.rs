//! Batch dispatcher.
//!
//! Owns the batch under assembly and a counting semaphore of `max_in_flight`
//! permits. Callers append entries; every batch the accumulator completes is
//! queued under the same lock that built it, then issued to the adapter in
//! queue order once a permit is free. Waiting for that permit is the
//! backpressure valve: producers that outrun the backend are parked in
//! `append` instead of buffering without bound.
//!
//! Issuing is serialized: a batch is only handed to the adapter after the
//! previous batch's `send_batch` has been polled once, so requests leave in
//! the order their batches were built. Completion is concurrent.
//!
//! The accumulator lock is only ever held for in-memory moves, never across
//! an await point.

use crate::{
    BackendAdapter, BackendError, Batch, BatchAccumulator, BatchLimits, Delivery, Entry,
    MessageQueueError, MessageQueueResult,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Invoked once per dispatched batch, from the task that ran the send.
pub type OutcomeCallback = Arc<dyn Fn(&DispatchReport) + Send + Sync>;

/// Result of one batch dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The backend answered; individual entries may still have failed.
    Delivered(Delivery),
    /// The whole batch failed.
    Failed(BackendError),
}

/// What the outcome callback receives.
#[derive(Debug)]
pub struct DispatchReport {
    pub backend: String,
    pub batch_size: usize,
    pub batch_bytes: usize,
    pub outcome: DispatchOutcome,
}

impl DispatchReport {
    /// Entries that reached the backend, with their commit handles.
    pub fn committed(&self) -> &[Entry] {
        match &self.outcome {
            DispatchOutcome::Delivered(delivery) => &delivery.committed,
            DispatchOutcome::Failed(_) => &[],
        }
    }

    /// Number of entries of this batch that did not make it.
    pub fn failed_entries(&self) -> usize {
        match &self.outcome {
            DispatchOutcome::Delivered(delivery) => delivery.failures.len(),
            DispatchOutcome::Failed(_) => self.batch_size,
        }
    }
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStatus {
    /// Entries waiting in the batch under assembly.
    pub pending_entries: usize,
    /// Entries in built batches still waiting for a permit.
    pub queued_entries: usize,
    /// Batches handed to the backend and not yet completed.
    pub in_flight_batches: usize,
    /// Batches the backend answered (fully or partially successful).
    pub dispatched_batches: u64,
    /// Batches that failed as a whole.
    pub failed_batches: u64,
    /// Entries the backend accepted.
    pub dispatched_entries: u64,
    /// Entries that failed, individually or with their batch.
    pub failed_entries: u64,
}

/// Result of waiting for queued and in-flight batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub drained: bool,
    /// Batches still in flight when the wait ended.
    pub in_flight_batches: usize,
}

struct Assembly {
    accumulator: BatchAccumulator,
    last_dispatch: Option<Instant>,
    sealed: bool,
    /// Built batches not yet handed to the adapter, oldest first.
    queue: VecDeque<Batch>,
    queued_entries: usize,
    /// Batches ever queued. A batch's ticket is the value before its push.
    built: u64,
    /// Batches ever taken off the queue.
    issued: u64,
}

impl Assembly {
    /// Queue `batch` and return the ticket count that covers it.
    fn enqueue(&mut self, batch: Batch) -> u64 {
        self.queued_entries += batch.len();
        self.queue.push_back(batch);
        self.built += 1;
        self.built
    }
}

struct Shared<A> {
    adapter: Arc<A>,
    limits: BatchLimits,
    assembly: Mutex<Assembly>,
    /// Held while issuing; carries the start signal of the last issued send.
    issuer: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    permits: Arc<Semaphore>,
    max_in_flight: u32,
    on_outcome: Option<OutcomeCallback>,
    pending_entries: AtomicUsize,
    in_flight: AtomicUsize,
    dispatched_batches: AtomicU64,
    failed_batches: AtomicU64,
    dispatched_entries: AtomicU64,
    failed_entries: AtomicU64,
}

/// Shared accumulator plus bounded concurrent dispatch to one adapter.
///
/// Cheap to clone; clones share the same accumulator and permits.
pub struct Dispatcher<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: BackendAdapter> Dispatcher<A> {
    pub fn new(
        adapter: Arc<A>,
        limits: BatchLimits,
        max_in_flight: usize,
        on_outcome: Option<OutcomeCallback>,
    ) -> MessageQueueResult<Self> {
        let permits = u32::try_from(max_in_flight)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                MessageQueueError::InvalidConfig(format!(
                    "max in-flight batches must be between 1 and {}, got {}",
                    u32::MAX,
                    max_in_flight
                ))
            })?;

        Ok(Self {
            shared: Arc::new(Shared {
                adapter,
                limits,
                assembly: Mutex::new(Assembly {
                    accumulator: BatchAccumulator::new(limits),
                    last_dispatch: None,
                    sealed: false,
                    queue: VecDeque::new(),
                    queued_entries: 0,
                    built: 0,
                    issued: 0,
                }),
                issuer: tokio::sync::Mutex::new(None),
                permits: Arc::new(Semaphore::new(permits as usize)),
                max_in_flight: permits,
                on_outcome,
                pending_entries: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                dispatched_batches: AtomicU64::new(0),
                failed_batches: AtomicU64::new(0),
                dispatched_entries: AtomicU64::new(0),
                failed_entries: AtomicU64::new(0),
            }),
        })
    }

    pub fn limits(&self) -> BatchLimits {
        self.shared.limits
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight as usize
    }

    /// Feed `items` through the accumulator and dispatch every batch they complete.
    ///
    /// Returns once those batches are in flight. Batches leave in the order
    /// they were built, so entries of one caller keep their relative order
    /// across batch boundaries and across calls. Concurrent callers
    /// interleave in the order they took the accumulator lock.
    ///
    /// If the dispatcher closes first, the batches stay queued and
    /// [`discard_queued`](Self::discard_queued) accounts for them.
    pub async fn append(&self, items: Vec<Entry>) -> MessageQueueResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let through = {
            let mut assembly = self.shared.assembly.lock();
            if assembly.sealed {
                return Err(MessageQueueError::ServiceStopped);
            }
            let mut ready = Vec::new();
            for entry in items {
                assembly.accumulator.push(entry, &mut ready);
            }
            if !ready.is_empty() {
                assembly.last_dispatch = Some(Instant::now());
            }
            for batch in ready {
                assembly.enqueue(batch);
            }
            self.shared
                .pending_entries
                .store(assembly.accumulator.len(), Ordering::Relaxed);
            assembly.built
        };

        self.issue_through(through).await
    }

    /// Dispatch the pending entries if nothing was dispatched for `interval`.
    ///
    /// Returns whether a batch was dispatched.
    pub async fn flush_if_idle(&self, interval: Duration) -> MessageQueueResult<bool> {
        let through = {
            let mut assembly = self.shared.assembly.lock();
            let idle = assembly
                .last_dispatch
                .map_or(true, |last| last.elapsed() >= interval);
            if !idle {
                return Ok(false);
            }
            self.take_locked(&mut assembly)
        };

        match through {
            Some(through) => {
                self.issue_through(through).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Dispatch the pending entries now, whatever their size.
    pub async fn flush(&self) -> MessageQueueResult<bool> {
        let through = {
            let mut assembly = self.shared.assembly.lock();
            self.take_locked(&mut assembly)
        };
        match through {
            Some(through) => {
                self.issue_through(through).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Refuse further appends and queue whatever was pending as the last batch.
    ///
    /// Returns the number of entries queued.
    pub fn seal(&self) -> usize {
        let mut assembly = self.shared.assembly.lock();
        assembly.sealed = true;
        let pending = assembly.accumulator.len();
        self.take_locked(&mut assembly);
        pending
    }

    /// Issue every queued batch and wait until every permit is back, or
    /// `deadline` passes.
    pub async fn drain(&self, deadline: Instant) -> DrainOutcome {
        let settle = async {
            let mut last_started = self.shared.issuer.lock().await;
            while self.issue_next(&mut last_started).await? {}
            Arc::clone(&self.shared.permits)
                .acquire_many_owned(self.shared.max_in_flight)
                .await
                .map_err(|_| MessageQueueError::ServiceStopped)
        };

        match tokio::time::timeout_at(deadline, settle).await {
            Ok(Ok(_permits)) => DrainOutcome {
                drained: true,
                in_flight_batches: 0,
            },
            Ok(Err(_)) | Err(_) => {
                let in_flight = self.shared.in_flight.load(Ordering::SeqCst);
                let queued = !self.shared.assembly.lock().queue.is_empty();
                DrainOutcome {
                    drained: in_flight == 0 && !queued,
                    in_flight_batches: in_flight,
                }
            }
        }
    }

    /// Stop handing out permits. Pending and future dispatches fail with
    /// `ServiceStopped`; sends already in flight are not interrupted.
    pub fn close(&self) {
        self.shared.permits.close();
    }

    /// Drop every batch that was built but never issued, after [`close`](Self::close).
    /// Returns how many entries that was. Callers still waiting on those
    /// batches get `ServiceStopped`.
    pub fn discard_queued(&self) -> usize {
        let mut assembly = self.shared.assembly.lock();
        let batches = assembly.queue.len();
        let entries = std::mem::take(&mut assembly.queued_entries);
        assembly.queue.clear();
        if entries > 0 {
            warn!(
                backend = self.shared.adapter.name(),
                batches,
                entries,
                "Queued batches discarded before reaching the backend"
            );
        }
        entries
    }

    pub fn status(&self) -> DispatcherStatus {
        let shared = &self.shared;
        DispatcherStatus {
            pending_entries: shared.pending_entries.load(Ordering::Relaxed),
            queued_entries: shared.assembly.lock().queued_entries,
            in_flight_batches: shared.in_flight.load(Ordering::SeqCst),
            dispatched_batches: shared.dispatched_batches.load(Ordering::Relaxed),
            failed_batches: shared.failed_batches.load(Ordering::Relaxed),
            dispatched_entries: shared.dispatched_entries.load(Ordering::Relaxed),
            failed_entries: shared.failed_entries.load(Ordering::Relaxed),
        }
    }

    /// Move the batch under assembly onto the queue.
    fn take_locked(&self, assembly: &mut Assembly) -> Option<u64> {
        let batch = assembly.accumulator.take()?;
        assembly.last_dispatch = Some(Instant::now());
        self.shared.pending_entries.store(0, Ordering::Relaxed);
        Some(assembly.enqueue(batch))
    }

    /// Issue queued batches until the first `through` batches ever built are
    /// in flight. Batches of other callers ahead in the queue go first.
    async fn issue_through(&self, through: u64) -> MessageQueueResult<()> {
        loop {
            let mut last_started = self.shared.issuer.lock().await;
            if self.shared.assembly.lock().issued >= through {
                return Ok(());
            }
            match self.issue_next(&mut last_started).await {
                Ok(true) => {}
                // Our batches were discarded.
                Ok(false) => return Err(MessageQueueError::ServiceStopped),
                Err(e) => {
                    warn!(
                        backend = self.shared.adapter.name(),
                        queued_entries = self.shared.assembly.lock().queued_entries,
                        "Dispatcher closed while batches were queued"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Hand the oldest queued batch to the adapter.
    ///
    /// Waits for the previous send to start, then for a permit. The permit is
    /// released when the send completes, whether it succeeded, failed, or
    /// panicked. Returns false when the queue was empty.
    ///
    /// Cancel safe: a batch only leaves the queue once nothing is left to
    /// await before its send task is spawned.
    async fn issue_next(
        &self,
        last_started: &mut Option<oneshot::Receiver<()>>,
    ) -> MessageQueueResult<bool> {
        if let Some(started) = last_started.as_mut() {
            // An error means the previous send panicked on its first poll.
            let _ = started.await;
        }
        *last_started = None;
        if self.shared.assembly.lock().queue.is_empty() {
            return Ok(false);
        }

        let backend = self.shared.adapter.name();
        let permit = match Arc::clone(&self.shared.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!(backend, "Dispatcher closed, batch not sent");
                return Err(MessageQueueError::ServiceStopped);
            }
        };

        let batch = {
            let mut assembly = self.shared.assembly.lock();
            let Some(batch) = assembly.queue.pop_front() else {
                return Ok(false);
            };
            assembly.issued += 1;
            assembly.queued_entries -= batch.len();
            batch
        };

        if batch.is_oversize(&self.shared.limits) {
            warn!(
                backend,
                batch_bytes = batch.encoded_bytes(),
                max_bytes = self.shared.limits.max_bytes(),
                "Oversize entry dispatched as its own batch"
            );
        }

        debug!(
            backend,
            batch_size = batch.len(),
            batch_bytes = batch.encoded_bytes(),
            "Dispatching batch"
        );

        let (started_tx, started_rx) = oneshot::channel();
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let in_flight = InFlight(&shared.in_flight);
            let mut started = Some(started_tx);
            let mut send = shared.adapter.send_batch(&batch);
            let result = poll_fn(|cx| {
                let poll = send.as_mut().poll(cx);
                if let Some(started) = started.take() {
                    let _ = started.send(());
                }
                poll
            })
            .await;
            drop(send);
            shared.complete(&batch, result);
            drop(in_flight);
            drop(permit);
        });
        *last_started = Some(started_rx);

        Ok(true)
    }
}

impl<A: BackendAdapter> Shared<A> {
    fn complete(&self, batch: &Batch, result: Result<Delivery, BackendError>) {
        let backend = self.adapter.name();

        let outcome = match result {
            Ok(delivery) => {
                self.dispatched_batches.fetch_add(1, Ordering::Relaxed);
                self.dispatched_entries
                    .fetch_add(delivery.committed.len() as u64, Ordering::Relaxed);
                self.failed_entries
                    .fetch_add(delivery.failures.len() as u64, Ordering::Relaxed);
                for failure in &delivery.failures {
                    error!(
                        backend,
                        entry = %failure.entry,
                        error = %failure.error,
                        "Entry rejected by backend"
                    );
                }
                debug!(
                    backend,
                    batch_size = batch.len(),
                    committed = delivery.committed.len(),
                    failed = delivery.failures.len(),
                    "Batch delivered"
                );
                DispatchOutcome::Delivered(delivery)
            }
            Err(e) => {
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.failed_entries
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                error!(
                    backend,
                    batch_size = batch.len(),
                    batch_bytes = batch.encoded_bytes(),
                    error = %e,
                    "Batch rejected by backend"
                );
                DispatchOutcome::Failed(e)
            }
        };

        if let Some(on_outcome) = &self.on_outcome {
            on_outcome(&DispatchReport {
                backend: backend.to_string(),
                batch_size: batch.len(),
                batch_bytes: batch.encoded_bytes(),
                outcome,
            });
        }
    }
}

/// Decrements the in-flight counter when the send task ends, even by panic.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
