//! Pulsar-style journal.
//!
//! Message ids double as entry ids and commit handles; acknowledgments are
//! individual rather than cumulative.

use crate::client::{OutgoingMessage, PulsarClient, PulsarMessageId};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use messageq_core::{
    BackendAdapter, BackendError, Batch, BatchLimits, CommitHandle, Delivery, EntryFailure,
    EntrySizing, PayloadEncoding,
};
use std::sync::Arc;
use tracing::{debug, error};

pub const PULSAR_WRITE_LIMITS: BatchLimits = BatchLimits::ceiling(
    1000,
    5_242_880,
    EntrySizing::Payload {
        encoding: PayloadEncoding::Raw,
        overhead: 32,
    },
);

pub const PULSAR_ACK_LIMITS: BatchLimits =
    BatchLimits::ceiling(1000, usize::MAX, EntrySizing::Fixed(0));

pub struct PulsarWriter {
    client: Arc<dyn PulsarClient>,
    topic: String,
    retry: RetryPolicy,
}

impl PulsarWriter {
    pub fn new(client: Arc<dyn PulsarClient>, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl BackendAdapter for PulsarWriter {
    fn name(&self) -> &str {
        "pulsar"
    }

    fn limits(&self) -> BatchLimits {
        PULSAR_WRITE_LIMITS
    }

    async fn connect(&self) -> Result<(), BackendError> {
        debug!(topic = %self.topic, "Creating Pulsar producer");
        self.client.connect().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError> {
        let messages: Vec<OutgoingMessage> = batch
            .entries()
            .iter()
            .map(|entry| OutgoingMessage {
                key: entry.key().map(<[u8]>::to_vec),
                payload: entry.value().to_vec(),
                event_time: entry.timestamp(),
            })
            .collect();

        let client = &self.client;
        let topic = self.topic.as_str();
        let messages = &messages;
        let ids = self
            .retry
            .run("pulsar", "send", || client.send(topic, messages.clone()))
            .await?;

        if ids.len() != batch.len() {
            return Err(BackendError::fatal(format!(
                "producer returned {} message ids for {} messages",
                ids.len(),
                batch.len()
            )));
        }

        let committed = batch
            .entries()
            .iter()
            .zip(ids)
            .map(|(entry, id)| {
                entry
                    .clone()
                    .with_id(id.0.clone())
                    .with_commit_handle(CommitHandle::new(id))
            })
            .collect();
        Ok(Delivery::all(committed))
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

pub struct PulsarAcknowledger {
    client: Arc<dyn PulsarClient>,
    topic: String,
    subscription: String,
    retry: RetryPolicy,
}

impl PulsarAcknowledger {
    pub fn new(
        client: Arc<dyn PulsarClient>,
        topic: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Self {
        Self {
            client,
            topic: topic.into(),
            subscription: subscription.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl BackendAdapter for PulsarAcknowledger {
    fn name(&self) -> &str {
        "pulsar"
    }

    fn limits(&self) -> BatchLimits {
        PULSAR_ACK_LIMITS
    }

    async fn connect(&self) -> Result<(), BackendError> {
        debug!(topic = %self.topic, subscription = %self.subscription, "Subscribing Pulsar consumer");
        self.client.connect().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError> {
        let mut ids = Vec::with_capacity(batch.len());
        let mut delivery = Delivery::default();

        for entry in batch.entries() {
            match entry.commit_handle().and_then(|h| h.downcast_ref::<PulsarMessageId>()) {
                Some(id) => {
                    ids.push(id.clone());
                    delivery.committed.push(entry.clone());
                }
                None => {
                    error!(backend = "pulsar", entry = %entry, "Commit handle is not a Pulsar message id");
                    delivery.failures.push(EntryFailure {
                        entry: entry.clone(),
                        error: BackendError::MalformedAckToken(
                            "expected a Pulsar message id".into(),
                        ),
                    });
                }
            }
        }

        if ids.is_empty() {
            return Ok(delivery);
        }

        let client = &self.client;
        let (topic, subscription) = (self.topic.as_str(), self.subscription.as_str());
        let ids = &ids;
        self.retry
            .run("pulsar", "acknowledge", || {
                client.acknowledge(topic, subscription, ids.clone())
            })
            .await?;

        Ok(delivery)
    }

    async fn close(&self) {
        self.client.close().await;
    }
}
