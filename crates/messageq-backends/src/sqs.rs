//! SQS-style journal.
//!
//! Bodies travel base64-encoded and batch requests answer per entry, so a
//! batch can partially succeed. Acknowledgment deletes received messages by
//! receipt handle.

use crate::client::{
    SqsBatchResponse, SqsBatchSuccess, SqsClient, SqsDeleteEntry, SqsMessageId, SqsReceiptHandle,
    SqsSendEntry,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use messageq_core::{
    BackendAdapter, BackendError, Batch, BatchLimits, CommitHandle, Delivery, Entry, EntryFailure,
    EntrySizing, PayloadEncoding,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Entries per SQS batch request.
pub const SQS_MAX_BATCH_COUNT: usize = 10;

/// Total payload of one SQS batch request.
pub const SQS_MAX_BATCH_BYTES: usize = 262_144;

pub const SQS_WRITE_LIMITS: BatchLimits = BatchLimits::ceiling(
    SQS_MAX_BATCH_COUNT,
    SQS_MAX_BATCH_BYTES,
    EntrySizing::Payload {
        encoding: PayloadEncoding::Base64,
        overhead: 0,
    },
);

pub const SQS_ACK_LIMITS: BatchLimits =
    BatchLimits::ceiling(SQS_MAX_BATCH_COUNT, usize::MAX, EntrySizing::Fixed(0));

pub struct SqsWriter {
    client: Arc<dyn SqsClient>,
    queue_url: String,
    retry: RetryPolicy,
}

impl SqsWriter {
    pub fn new(client: Arc<dyn SqsClient>, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl BackendAdapter for SqsWriter {
    fn name(&self) -> &str {
        "sqs"
    }

    fn limits(&self) -> BatchLimits {
        SQS_WRITE_LIMITS
    }

    async fn connect(&self) -> Result<(), BackendError> {
        debug!(queue_url = %self.queue_url, "Connecting SQS client");
        self.client.connect().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError> {
        let request: Vec<SqsSendEntry> = batch
            .entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| SqsSendEntry {
                id: index.to_string(),
                body: BASE64.encode(entry.value()),
                key: entry.key().map(|key| BASE64.encode(key)),
            })
            .collect();

        let client = &self.client;
        let queue_url = self.queue_url.as_str();
        let request = &request;
        let response = self
            .retry
            .run("sqs", "send_message_batch", || {
                client.send_message_batch(queue_url, request.clone())
            })
            .await?;

        Ok(split_response(batch.entries(), response, |success| {
            success
                .message_id
                .map(|id| CommitHandle::new(SqsMessageId(id)))
        }))
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

pub struct SqsAcknowledger {
    client: Arc<dyn SqsClient>,
    queue_url: String,
    retry: RetryPolicy,
}

impl SqsAcknowledger {
    pub fn new(client: Arc<dyn SqsClient>, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl BackendAdapter for SqsAcknowledger {
    fn name(&self) -> &str {
        "sqs"
    }

    fn limits(&self) -> BatchLimits {
        SQS_ACK_LIMITS
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.client.connect().await
    }

    async fn send_batch(&self, batch: &Batch) -> Result<Delivery, BackendError> {
        let mut request = Vec::with_capacity(batch.len());
        let mut valid: Vec<Entry> = Vec::with_capacity(batch.len());
        let mut malformed = Vec::new();

        for entry in batch.entries() {
            match entry.commit_handle().and_then(|h| h.downcast_ref::<SqsReceiptHandle>()) {
                Some(receipt) => {
                    request.push(SqsDeleteEntry {
                        id: valid.len().to_string(),
                        receipt_handle: receipt.0.clone(),
                    });
                    valid.push(entry.clone());
                }
                None => {
                    error!(backend = "sqs", entry = %entry, "Commit handle is not an SQS receipt handle");
                    malformed.push(EntryFailure {
                        entry: entry.clone(),
                        error: BackendError::MalformedAckToken(
                            "expected an SQS receipt handle".into(),
                        ),
                    });
                }
            }
        }

        let mut delivery = if request.is_empty() {
            Delivery::default()
        } else {
            let client = &self.client;
            let queue_url = self.queue_url.as_str();
            let request = &request;
            let response = self
                .retry
                .run("sqs", "delete_message_batch", || {
                    client.delete_message_batch(queue_url, request.clone())
                })
                .await?;
            split_response(&valid, response, |_| None)
        };
        delivery.failures.extend(malformed);
        Ok(delivery)
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

/// Match a per-entry response back to the request entries, whose ids are
/// their indexes. Entries the response does not mention count as failed.
fn split_response(
    entries: &[Entry],
    response: SqsBatchResponse,
    handle: impl Fn(SqsBatchSuccess) -> Option<CommitHandle>,
) -> Delivery {
    let mut committed: HashMap<usize, Option<CommitHandle>> = HashMap::new();
    let mut failed: HashMap<usize, BackendError> = HashMap::new();

    for success in response.successful {
        if let Ok(index) = success.id.parse::<usize>() {
            committed.insert(index, handle(success));
        }
    }
    for failure in response.failed {
        if let Ok(index) = failure.id.parse::<usize>() {
            warn!(
                backend = "sqs",
                code = %failure.code,
                sender_fault = failure.sender_fault,
                "Batch entry failed: {}",
                failure.message
            );
            failed.insert(
                index,
                BackendError::Rejected(format!("{}: {}", failure.code, failure.message)),
            );
        }
    }

    let mut delivery = Delivery::default();
    for (index, entry) in entries.iter().enumerate() {
        if let Some(error) = failed.remove(&index) {
            delivery.failures.push(EntryFailure {
                entry: entry.clone(),
                error,
            });
        } else if let Some(handle) = committed.remove(&index) {
            let entry = match handle {
                Some(handle) => entry.clone().with_commit_handle(handle),
                None => entry.clone(),
            };
            delivery.committed.push(entry);
        } else {
            delivery.failures.push(EntryFailure {
                entry: entry.clone(),
                error: BackendError::fatal(format!("entry {index} missing from batch response")),
            });
        }
    }
    delivery
}
