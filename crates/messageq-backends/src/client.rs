//! Network client contracts for each backend.
//!
//! Adapters are written against these traits so the batching and handle
//! bookkeeping can be exercised without a broker. The in-memory
//! implementations live in [`crate::memory`].

use async_trait::async_trait;
use messageq_core::BackendError;

/// A record handed to a Kafka producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

/// Position of a record within a topic. Commit handle of Kafka entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KafkaOffset {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait KafkaClient: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError>;

    /// Produce records in order. Returns one offset per record.
    async fn produce(
        &self,
        topic: &str,
        records: Vec<ProducerRecord>,
    ) -> Result<Vec<KafkaOffset>, BackendError>;

    /// Commit the next offset to consume for each listed partition.
    async fn commit(
        &self,
        group: &str,
        topic: &str,
        offsets: Vec<KafkaOffset>,
    ) -> Result<(), BackendError>;

    async fn close(&self);
}

/// A message handed to a Pulsar producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub event_time: i64,
}

/// Serialized Pulsar message id. Commit handle of Pulsar entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PulsarMessageId(pub Vec<u8>);

#[async_trait]
pub trait PulsarClient: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError>;

    /// Send messages in order. Returns one message id per message.
    async fn send(
        &self,
        topic: &str,
        messages: Vec<OutgoingMessage>,
    ) -> Result<Vec<PulsarMessageId>, BackendError>;

    async fn acknowledge(
        &self,
        topic: &str,
        subscription: &str,
        ids: Vec<PulsarMessageId>,
    ) -> Result<(), BackendError>;

    async fn close(&self);
}

/// One entry of a `SendMessageBatch` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsSendEntry {
    /// Unique within the request.
    pub id: String,
    /// Base64 of the raw payload.
    pub body: String,
    /// Base64 of the entry key, sent as a message attribute.
    pub key: Option<String>,
}

/// One entry of a `DeleteMessageBatch` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsDeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsBatchSuccess {
    pub id: String,
    /// Set for sends, absent for deletes.
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsBatchFailure {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

/// Per-entry outcome of an SQS batch request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqsBatchResponse {
    pub successful: Vec<SqsBatchSuccess>,
    pub failed: Vec<SqsBatchFailure>,
}

/// Id SQS assigned to a written message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqsMessageId(pub String);

/// Receipt handle of a received message. Commit handle for SQS acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqsReceiptHandle(pub String);

#[async_trait]
pub trait SqsClient: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError>;

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsSendEntry>,
    ) -> Result<SqsBatchResponse, BackendError>;

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsDeleteEntry>,
    ) -> Result<SqsBatchResponse, BackendError>;

    async fn close(&self);
}
