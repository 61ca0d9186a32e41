//! Message queue error types.

use crate::{BackendError, ServiceState};
use thiserror::Error;

/// Error type for message queue service operations.
///
/// Backend failures of individual batches never show up here: they are
/// reported through the dispatcher's outcome callback. Only conditions that
/// make the call itself impossible are returned to the caller.
#[derive(Error, Debug)]
pub enum MessageQueueError {
    /// The service is stopping or terminated and accepts no more work.
    #[error("Message queue service is not running")]
    ServiceStopped,

    /// The backend could not be connected during startup.
    #[error("Failed to start {backend} backend: {source}")]
    StartupFailed {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// Invalid limits or service configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lifecycle transition that is not allowed from the current state.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: ServiceState, to: ServiceState },
}

/// Result type alias using MessageQueueError.
pub type MessageQueueResult<T> = Result<T, MessageQueueError>;
