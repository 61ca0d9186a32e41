//! Service lifecycle and readiness gating.
//!
//! ```text
//! Idle ──▶ Starting ──▶ Running ──▶ Stopping ──▶ Terminated
//!   │         │                        ▲
//!   └─────────┴────────────────────────┘   (stop before running)
//! ```
//!
//! Callers wait in `wait_ready` until the service is running. The readiness
//! latch is a fair semaphore that starts empty: becoming ready floods it with
//! permits so queued callers are released in arrival order, and stopping
//! closes it so anyone still queued fails fast.

use crate::{MessageQueueError, MessageQueueResult};
use std::fmt;
use tokio::sync::{watch, Semaphore};

/// Lifecycle state of a queue service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl ServiceState {
    /// Whether the service accepts no more work.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Stopping | Self::Terminated)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Start/ready/stop state machine guarding a service.
#[derive(Debug)]
pub struct LifecycleGate {
    state: watch::Sender<ServiceState>,
    ready: Semaphore,
}

impl Default for LifecycleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleGate {
    pub fn new() -> Self {
        Self {
            state: watch::channel(ServiceState::Idle).0,
            ready: Semaphore::new(0),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// `Idle -> Starting`.
    pub fn begin_start(&self) -> MessageQueueResult<()> {
        self.transition(&[ServiceState::Idle], ServiceState::Starting)
            .map(|_| ())
    }

    /// `Starting -> Running`, releasing every waiting caller.
    pub fn mark_running(&self) -> MessageQueueResult<()> {
        self.transition(&[ServiceState::Starting], ServiceState::Running)?;
        self.ready.add_permits(Semaphore::MAX_PERMITS);
        Ok(())
    }

    /// Enter `Stopping` from any live state.
    ///
    /// Returns the state the service was in, or `None` if it was already
    /// stopping or terminated. Waiting callers fail with `ServiceStopped`.
    pub fn begin_stop(&self) -> Option<ServiceState> {
        let previous = self
            .transition(
                &[
                    ServiceState::Idle,
                    ServiceState::Starting,
                    ServiceState::Running,
                ],
                ServiceState::Stopping,
            )
            .ok();
        self.ready.close();
        previous
    }

    /// Final state; reachable from anywhere.
    pub fn mark_terminated(&self) {
        self.ready.close();
        self.state.send_replace(ServiceState::Terminated);
    }

    /// Wait until the service is running.
    ///
    /// Returns immediately when running, suspends while idle or starting, and
    /// fails fast with `ServiceStopped` once stopping has begun.
    pub async fn wait_ready(&self) -> MessageQueueResult<()> {
        match self.state() {
            ServiceState::Running => return Ok(()),
            state if state.is_shutting_down() => return Err(MessageQueueError::ServiceStopped),
            _ => {}
        }

        let _permit = self
            .ready
            .acquire()
            .await
            .map_err(|_| MessageQueueError::ServiceStopped)?;

        if self.state() == ServiceState::Running {
            Ok(())
        } else {
            Err(MessageQueueError::ServiceStopped)
        }
    }

    fn transition(
        &self,
        allowed: &[ServiceState],
        to: ServiceState,
    ) -> MessageQueueResult<ServiceState> {
        let mut result = Err(MessageQueueError::InvalidState {
            from: self.state(),
            to,
        });
        self.state.send_if_modified(|current| {
            if allowed.contains(current) {
                result = Ok(*current);
                *current = to;
                true
            } else {
                result = Err(MessageQueueError::InvalidState { from: *current, to });
                false
            }
        });
        result
    }
}
