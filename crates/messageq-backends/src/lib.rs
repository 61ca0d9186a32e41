//! Backend adapters for the message journal.
//!
//! Each backend contributes a writer adapter and an acknowledger adapter,
//! both implementing [`messageq_core::BackendAdapter`]:
//!
//! | Backend | Write | Acknowledge | Commit handle |
//! |---------|-------|-------------|---------------|
//! | Kafka | produce records | commit highest offset + 1 per partition | [`KafkaOffset`] |
//! | Pulsar | send messages | individual ack by message id | [`PulsarMessageId`] |
//! | SQS | `SendMessageBatch` (base64 bodies) | `DeleteMessageBatch` | [`SqsReceiptHandle`] |
//!
//! Adapters talk to the outside world only through the client traits in
//! [`client`]; [`memory`] provides broker stand-ins. Retryable request
//! failures are repeated inside the adapter under a [`RetryPolicy`]; the
//! dispatcher above never retries.
//!
//! [`open_journal`] picks the pair matching the configured journal mode.

pub mod client;
mod journal;
mod kafka;
pub mod memory;
mod pulsar;
mod retry;
mod sqs;

pub use client::{
    KafkaClient, KafkaOffset, PulsarClient, PulsarMessageId, SqsClient, SqsMessageId,
    SqsReceiptHandle,
};
pub use journal::{open_journal, BrokerClients, Journal, JournalError, JournalHooks};
pub use kafka::{KafkaAcknowledger, KafkaWriter, KAFKA_ACK_LIMITS, KAFKA_WRITE_LIMITS};
pub use memory::{InMemoryKafka, InMemoryPulsar, InMemorySqs};
pub use pulsar::{PulsarAcknowledger, PulsarWriter, PULSAR_ACK_LIMITS, PULSAR_WRITE_LIMITS};
pub use retry::RetryPolicy;
pub use sqs::{
    SqsAcknowledger, SqsWriter, SQS_ACK_LIMITS, SQS_MAX_BATCH_BYTES, SQS_MAX_BATCH_COUNT,
    SQS_WRITE_LIMITS,
};
