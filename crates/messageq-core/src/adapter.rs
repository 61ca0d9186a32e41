//! Backend adapter contract.
//!
//! An adapter is the only component that talks to the external queue. The
//! dispatcher hands it ready batches and never retries on its behalf: any
//! retry/backoff policy lives inside `send_batch`.

use crate::{Batch, BatchLimits, Entry};
use async_trait::async_trait;
use thiserror::Error;

/// Whether a failed request may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Fatal,
}

/// Error reported by a backend adapter.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Could not establish the backend connection
    #[error("Connection failed: {0}")]
    Connect(String),

    /// A request to the backend failed
    #[error("Request failed ({kind:?}): {message}")]
    Request { kind: FailureKind, message: String },

    /// The backend refused the batch or entry (e.g. size limit violation)
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    /// Commit handle of the wrong shape for this backend
    #[error("Malformed acknowledgment token: {0}")]
    MalformedAckToken(String),

    /// The client was already closed
    #[error("Backend client is closed")]
    Closed,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Request {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Request {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    /// Only transient request failures are worth repeating.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request {
                kind: FailureKind::Retryable,
                ..
            }
        )
    }
}

/// One entry of a batch that the backend did not accept.
#[derive(Debug)]
pub struct EntryFailure {
    pub entry: Entry,
    pub error: BackendError,
}

/// Outcome of a batch that reached the backend.
///
/// `committed` keeps input order and carries the commit handle the backend
/// assigned to each entry. Entries the backend refused individually land in
/// `failures` without failing the rest of the batch.
#[derive(Debug, Default)]
pub struct Delivery {
    pub committed: Vec<Entry>,
    pub failures: Vec<EntryFailure>,
}

impl Delivery {
    /// Every entry succeeded.
    pub fn all(committed: Vec<Entry>) -> Self {
        Self {
            committed,
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A pluggable queue backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// Short backend name for logs ("kafka", "sqs", ...).
    fn name(&self) -> &str;

    /// Count/byte ceilings and entry sizing for this backend's batches.
    fn limits(&self) -> BatchLimits;

    /// Open backend connections. Called once while the service is starting;
    /// failure aborts startup.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Send one batch. Retries, if any, reuse the same batch value.
    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError>;

    /// Release backend connections. Must be idempotent.
    async fn close(&self);
}
