//! Batch assembly and flow control for message queue journals.
//!
//! This crate provides:
//! - Entry / CommitHandle: one raw message and its backend-assigned receipt
//! - Batcher: greedy count/byte bounded partitioning (`partition`, `BatchAccumulator`)
//! - BackendAdapter: the contract every queue backend implements
//! - Dispatcher: accumulator plus semaphore-bounded concurrent dispatch
//! - LifecycleGate: readiness gating for write/acknowledge callers
//! - QueueService, Writer, Acknowledger: the services built on top
//!
//! ```text
//! write/acknowledge ──▶ LifecycleGate ──▶ Dispatcher.append ──▶ BatchAccumulator
//!                                              │
//!                         periodic flush ──────┤
//!                                              ▼
//!                                   permit ──▶ BackendAdapter.send_batch
//! ```

mod adapter;
mod batcher;
mod dispatcher;
mod entry;
mod error;
mod lifecycle;
mod service;

#[cfg(test)]
mod tests;

pub use adapter::{BackendAdapter, BackendError, Delivery, EntryFailure, FailureKind};
pub use batcher::{partition, Batch, BatchAccumulator, BatchLimits, EntrySizing, PayloadEncoding};
pub use dispatcher::{
    DispatchOutcome, DispatchReport, Dispatcher, DispatcherStatus, DrainOutcome, OutcomeCallback,
};
pub use entry::{CommitHandle, Entry};
pub use error::{MessageQueueError, MessageQueueResult};
pub use lifecycle::{LifecycleGate, ServiceState};
pub use service::{
    Acknowledger, MessageQueueAcknowledger, MessageQueueWriter, QueueService, Service,
    ServiceConfig, ShutdownReport, Writer, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_IN_FLIGHT_ACK_BATCHES,
    DEFAULT_MAX_IN_FLIGHT_WRITE_BATCHES, DEFAULT_SHUTDOWN_TIMEOUT,
};
