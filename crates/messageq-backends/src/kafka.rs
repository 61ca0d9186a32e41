//! Kafka-style journal: produce on write, commit offsets on acknowledge.

use crate::client::{KafkaClient, KafkaOffset, ProducerRecord};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use messageq_core::{
    BackendAdapter, BackendError, Batch, BatchLimits, CommitHandle, Delivery, EntryFailure,
    EntrySizing, PayloadEncoding,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Producer ceilings: 500 records or 1 MiB per request.
pub const KAFKA_WRITE_LIMITS: BatchLimits = BatchLimits::ceiling(
    500,
    1_048_576,
    EntrySizing::Payload {
        encoding: PayloadEncoding::Raw,
        overhead: 24,
    },
);

/// Offset commits are bounded by count only.
pub const KAFKA_ACK_LIMITS: BatchLimits = BatchLimits::ceiling(500, usize::MAX, EntrySizing::Fixed(0));

/// Writes entries as records on one topic.
pub struct KafkaWriter {
    client: Arc<dyn KafkaClient>,
    topic: String,
    client_id: String,
    retry: RetryPolicy,
}

impl KafkaWriter {
    pub fn new(client: Arc<dyn KafkaClient>, topic: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            client_id: client_id.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl BackendAdapter for KafkaWriter {
    fn name(&self) -> &str {
        "kafka"
    }

    fn limits(&self) -> BatchLimits {
        KAFKA_WRITE_LIMITS
    }

    async fn connect(&self) -> Result<(), BackendError> {
        debug!(client_id = %self.client_id, topic = %self.topic, "Connecting Kafka producer");
        self.client.connect().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError> {
        let records: Vec<ProducerRecord> = batch
            .entries()
            .iter()
            .map(|entry| ProducerRecord {
                key: entry.key().map(<[u8]>::to_vec),
                value: entry.value().to_vec(),
                timestamp: entry.timestamp(),
            })
            .collect();

        let client = &self.client;
        let topic = self.topic.as_str();
        let records = &records;
        let offsets = self
            .retry
            .run("kafka", "produce", || client.produce(topic, records.clone()))
            .await?;

        if offsets.len() != batch.len() {
            return Err(BackendError::fatal(format!(
                "producer returned {} offsets for {} records",
                offsets.len(),
                batch.len()
            )));
        }

        let committed = batch
            .entries()
            .iter()
            .zip(offsets)
            .map(|(entry, offset)| entry.clone().with_commit_handle(CommitHandle::new(offset)))
            .collect();
        Ok(Delivery::all(committed))
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

/// Commits consumed offsets for a consumer group.
pub struct KafkaAcknowledger {
    client: Arc<dyn KafkaClient>,
    topic: String,
    group: String,
    retry: RetryPolicy,
}

impl KafkaAcknowledger {
    pub fn new(client: Arc<dyn KafkaClient>, topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            group: group.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl BackendAdapter for KafkaAcknowledger {
    fn name(&self) -> &str {
        "kafka"
    }

    fn limits(&self) -> BatchLimits {
        KAFKA_ACK_LIMITS
    }

    async fn connect(&self) -> Result<(), BackendError> {
        debug!(group = %self.group, topic = %self.topic, "Connecting Kafka consumer");
        self.client.connect().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError> {
        let mut next: BTreeMap<i32, i64> = BTreeMap::new();
        let mut delivery = Delivery::default();

        for entry in batch.entries() {
            match entry.commit_handle().and_then(|h| h.downcast_ref::<KafkaOffset>()) {
                Some(offset) => {
                    let slot = next.entry(offset.partition).or_insert(offset.offset + 1);
                    *slot = (*slot).max(offset.offset + 1);
                    delivery.committed.push(entry.clone());
                }
                None => {
                    error!(backend = "kafka", entry = %entry, "Commit handle is not a Kafka offset");
                    delivery.failures.push(EntryFailure {
                        entry: entry.clone(),
                        error: BackendError::MalformedAckToken("expected a Kafka offset".into()),
                    });
                }
            }
        }

        if next.is_empty() {
            return Ok(delivery);
        }

        let offsets: Vec<KafkaOffset> = next
            .into_iter()
            .map(|(partition, offset)| KafkaOffset { partition, offset })
            .collect();
        let client = &self.client;
        let (group, topic) = (self.group.as_str(), self.topic.as_str());
        let offsets = &offsets;
        self.retry
            .run("kafka", "commit", || client.commit(group, topic, offsets.clone()))
            .await?;

        Ok(delivery)
    }

    async fn close(&self) {
        self.client.close().await;
    }
}
