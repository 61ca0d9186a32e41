//! In-memory brokers for the three backends.
//!
//! They implement the client traits and also expose the consumer side
//! (`poll`, `receive`) so a process can journal, read back and acknowledge
//! without external infrastructure. Used by the `messageq pump` command and
//! by tests. Failures can be injected with `fail_next`/`fail_connect`.
//!
//! A client shared by a writer and an acknowledger is connected twice; it
//! stays usable until both have closed it.

use crate::client::{
    KafkaClient, KafkaOffset, OutgoingMessage, ProducerRecord, PulsarClient, PulsarMessageId,
    SqsBatchFailure, SqsBatchResponse, SqsBatchSuccess, SqsClient, SqsDeleteEntry,
    SqsReceiptHandle, SqsSendEntry,
};
use crate::sqs::{SQS_MAX_BATCH_BYTES, SQS_MAX_BATCH_COUNT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use messageq_core::{BackendError, CommitHandle, Entry};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Default)]
struct Sessions {
    open: usize,
    connects: usize,
    connect_failure: Option<BackendError>,
    failures: VecDeque<BackendError>,
}

impl Sessions {
    fn connect(&mut self) -> Result<(), BackendError> {
        if let Some(error) = self.connect_failure.take() {
            return Err(error);
        }
        self.open += 1;
        self.connects += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = self.open.saturating_sub(1);
    }

    /// Gate for every request: must be connected, then consume an injected failure.
    fn request(&mut self) -> Result<(), BackendError> {
        if self.open == 0 {
            return Err(BackendError::Closed);
        }
        match self.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Kafka
// ---------------------------------------------------------------------------

type GroupPartition = (String, String, i32);

#[derive(Default)]
struct KafkaState {
    sessions: Sessions,
    /// topic -> partition -> records
    logs: HashMap<String, Vec<Vec<ProducerRecord>>>,
    round_robin: usize,
    positions: HashMap<GroupPartition, i64>,
    committed: HashMap<GroupPartition, i64>,
}

/// Partitioned log with consumer-group offsets.
pub struct InMemoryKafka {
    partitions: usize,
    state: Mutex<KafkaState>,
}

impl InMemoryKafka {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(KafkaState::default()),
        }
    }

    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().sessions.failures.push_back(error);
    }

    pub fn fail_connect(&self, error: BackendError) {
        self.state.lock().sessions.connect_failure = Some(error);
    }

    pub fn connects(&self) -> usize {
        self.state.lock().sessions.connects
    }

    /// Every record of `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<ProducerRecord> {
        self.state
            .lock()
            .logs
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Fetch up to `max` records past the group's position, advancing it.
    /// Consumption starts from the committed offset.
    pub fn poll(&self, group: &str, topic: &str, max: usize) -> Vec<Entry> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let Some(partitions) = state.logs.get(topic) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (partition, log) in partitions.iter().enumerate() {
            let key = (group.to_string(), topic.to_string(), partition as i32);
            let start = state
                .positions
                .get(&key)
                .or_else(|| state.committed.get(&key))
                .copied()
                .unwrap_or(0);

            let mut position = start;
            for record in log.iter().skip(start as usize) {
                if out.len() == max {
                    break;
                }
                let offset = KafkaOffset {
                    partition: partition as i32,
                    offset: position,
                };
                let mut entry = Entry::new(record.value.clone())
                    .with_timestamp(record.timestamp)
                    .with_commit_handle(CommitHandle::new(offset));
                if let Some(k) = &record.key {
                    entry = entry.with_key(k.clone());
                }
                out.push(entry);
                position += 1;
            }
            state.positions.insert(key, position);
        }
        out
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn partition_for(&self, state: &mut KafkaState, key: Option<&[u8]>) -> usize {
        match key {
            Some(key) => {
                let hash = key
                    .iter()
                    .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(*b as usize));
                hash % self.partitions
            }
            None => {
                state.round_robin = state.round_robin.wrapping_add(1);
                state.round_robin % self.partitions
            }
        }
    }
}

#[async_trait]
impl KafkaClient for InMemoryKafka {
    async fn connect(&self) -> Result<(), BackendError> {
        self.state.lock().sessions.connect()
    }

    async fn produce(
        &self,
        topic: &str,
        records: Vec<ProducerRecord>,
    ) -> Result<Vec<KafkaOffset>, BackendError> {
        let mut state = self.state.lock();
        state.sessions.request()?;

        let mut offsets = Vec::with_capacity(records.len());
        for record in records {
            let partition = self.partition_for(&mut state, record.key.as_deref());
            let log = state
                .logs
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            log[partition].push(record);
            offsets.push(KafkaOffset {
                partition: partition as i32,
                offset: log[partition].len() as i64 - 1,
            });
        }
        Ok(offsets)
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        offsets: Vec<KafkaOffset>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.sessions.request()?;
        for offset in offsets {
            state.committed.insert(
                (group.to_string(), topic.to_string(), offset.partition),
                offset.offset,
            );
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().sessions.close();
    }
}

// ---------------------------------------------------------------------------
// Pulsar
// ---------------------------------------------------------------------------

struct StoredMessage {
    id: PulsarMessageId,
    message: OutgoingMessage,
}

#[derive(Default)]
struct Cursor {
    read: usize,
    acked: HashSet<PulsarMessageId>,
}

#[derive(Default)]
struct PulsarState {
    sessions: Sessions,
    topics: HashMap<String, Vec<StoredMessage>>,
    cursors: HashMap<(String, String), Cursor>,
    sequence: u64,
}

/// Topics with per-subscription individual acknowledgment.
#[derive(Default)]
pub struct InMemoryPulsar {
    state: Mutex<PulsarState>,
}

impl InMemoryPulsar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().sessions.failures.push_back(error);
    }

    pub fn fail_connect(&self, error: BackendError) {
        self.state.lock().sessions.connect_failure = Some(error);
    }

    /// Deliver up to `max` unread messages to `subscription`.
    pub fn receive(&self, topic: &str, subscription: &str, max: usize) -> Vec<Entry> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let Some(messages) = state.topics.get(topic) else {
            return Vec::new();
        };
        let cursor = state
            .cursors
            .entry((topic.to_string(), subscription.to_string()))
            .or_default();

        let delivered: Vec<Entry> = messages
            .iter()
            .skip(cursor.read)
            .take(max)
            .map(|stored| {
                let mut entry = Entry::new(stored.message.payload.clone())
                    .with_id(stored.id.0.clone())
                    .with_timestamp(stored.message.event_time)
                    .with_commit_handle(CommitHandle::new(stored.id.clone()));
                if let Some(key) = &stored.message.key {
                    entry = entry.with_key(key.clone());
                }
                entry
            })
            .collect();
        cursor.read += delivered.len();
        delivered
    }

    /// Messages on `topic` the subscription has not acknowledged.
    pub fn unacknowledged(&self, topic: &str, subscription: &str) -> usize {
        let state = self.state.lock();
        let total = state.topics.get(topic).map_or(0, Vec::len);
        let acked = state
            .cursors
            .get(&(topic.to_string(), subscription.to_string()))
            .map_or(0, |cursor| cursor.acked.len());
        total.saturating_sub(acked)
    }
}

#[async_trait]
impl PulsarClient for InMemoryPulsar {
    async fn connect(&self) -> Result<(), BackendError> {
        self.state.lock().sessions.connect()
    }

    async fn send(
        &self,
        topic: &str,
        messages: Vec<OutgoingMessage>,
    ) -> Result<Vec<PulsarMessageId>, BackendError> {
        let mut state = self.state.lock();
        state.sessions.request()?;

        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            state.sequence += 1;
            let id = PulsarMessageId(format!("0:{}:-1", state.sequence).into_bytes());
            ids.push(id.clone());
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(StoredMessage { id, message });
        }
        Ok(ids)
    }

    async fn acknowledge(
        &self,
        topic: &str,
        subscription: &str,
        ids: Vec<PulsarMessageId>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.sessions.request()?;
        let cursor = state
            .cursors
            .entry((topic.to_string(), subscription.to_string()))
            .or_default();
        cursor.acked.extend(ids);
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().sessions.close();
    }
}

// ---------------------------------------------------------------------------
// SQS
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StoredSqsMessage {
    message_id: String,
    body: String,
    key: Option<String>,
}

#[derive(Default)]
struct SqsQueue {
    visible: VecDeque<StoredSqsMessage>,
    /// receipt handle -> message
    in_flight: HashMap<String, StoredSqsMessage>,
}

#[derive(Default)]
struct SqsState {
    sessions: Sessions,
    queues: HashMap<String, SqsQueue>,
    poisoned: Vec<Vec<u8>>,
}

impl SqsState {
    fn queue(&mut self, queue_url: &str) -> Result<&mut SqsQueue, BackendError> {
        self.queues.get_mut(queue_url).ok_or_else(|| {
            BackendError::fatal(format!(
                "AWS.SimpleQueueService.NonExistentQueue: {queue_url}"
            ))
        })
    }
}

/// Queues with SQS batch limits, receipt handles and per-entry results.
#[derive(Default)]
pub struct InMemorySqs {
    state: Mutex<SqsState>,
}

impl InMemorySqs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_queue(&self, queue_url: &str) {
        self.state
            .lock()
            .queues
            .entry(queue_url.to_string())
            .or_default();
    }

    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().sessions.failures.push_back(error);
    }

    pub fn fail_connect(&self, error: BackendError) {
        self.state.lock().sessions.connect_failure = Some(error);
    }

    /// Refuse, per entry, any message whose payload equals `payload`.
    pub fn poison(&self, payload: &[u8]) {
        self.state.lock().poisoned.push(payload.to_vec());
    }

    /// Receive up to `max` (at most ten) visible messages. Each carries a
    /// fresh receipt handle as its commit handle.
    pub fn receive(&self, queue_url: &str, max: usize) -> Vec<Entry> {
        let mut state = self.state.lock();
        let Some(queue) = state.queues.get_mut(queue_url) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        while out.len() < max.min(SQS_MAX_BATCH_COUNT) {
            let Some(message) = queue.visible.pop_front() else {
                break;
            };
            let receipt = uuid::Uuid::new_v4().to_string();
            let body = BASE64
                .decode(&message.body)
                .unwrap_or_else(|_| message.body.clone().into_bytes());
            let mut entry = Entry::new(body)
                .with_id(message.message_id.clone())
                .with_commit_handle(CommitHandle::new(SqsReceiptHandle(receipt.clone())));
            if let Some(key) = message.key.as_ref().and_then(|k| BASE64.decode(k).ok()) {
                entry = entry.with_key(key);
            }
            queue.in_flight.insert(receipt, message);
            out.push(entry);
        }
        out
    }

    /// Received but not yet deleted.
    pub fn in_flight(&self, queue_url: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue_url)
            .map_or(0, |queue| queue.in_flight.len())
    }

    /// Waiting to be received.
    pub fn visible(&self, queue_url: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue_url)
            .map_or(0, |queue| queue.visible.len())
    }
}

fn check_batch_count(len: usize) -> Result<(), BackendError> {
    if len == 0 {
        return Err(BackendError::fatal(
            "AWS.SimpleQueueService.EmptyBatchRequest",
        ));
    }
    if len > SQS_MAX_BATCH_COUNT {
        return Err(BackendError::fatal(
            "AWS.SimpleQueueService.TooManyEntriesInBatchRequest",
        ));
    }
    Ok(())
}

#[async_trait]
impl SqsClient for InMemorySqs {
    async fn connect(&self) -> Result<(), BackendError> {
        self.state.lock().sessions.connect()
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsSendEntry>,
    ) -> Result<SqsBatchResponse, BackendError> {
        let mut state = self.state.lock();
        state.sessions.request()?;
        check_batch_count(entries.len())?;

        let total: usize = entries
            .iter()
            .map(|e| e.body.len() + e.key.as_ref().map_or(0, String::len))
            .sum();
        if total > SQS_MAX_BATCH_BYTES {
            return Err(BackendError::Rejected(format!(
                "AWS.SimpleQueueService.BatchRequestTooLong: {total} bytes"
            )));
        }

        let poisoned = state.poisoned.clone();
        let queue = state.queue(queue_url)?;
        let mut response = SqsBatchResponse::default();
        for entry in entries {
            let payload = BASE64.decode(&entry.body).unwrap_or_default();
            if poisoned.contains(&payload) {
                response.failed.push(SqsBatchFailure {
                    id: entry.id,
                    code: "InvalidMessageContents".to_string(),
                    message: "message contents rejected".to_string(),
                    sender_fault: true,
                });
                continue;
            }

            let message_id = uuid::Uuid::new_v4().to_string();
            queue.visible.push_back(StoredSqsMessage {
                message_id: message_id.clone(),
                body: entry.body,
                key: entry.key,
            });
            response.successful.push(SqsBatchSuccess {
                id: entry.id,
                message_id: Some(message_id),
            });
        }
        Ok(response)
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsDeleteEntry>,
    ) -> Result<SqsBatchResponse, BackendError> {
        let mut state = self.state.lock();
        state.sessions.request()?;
        check_batch_count(entries.len())?;

        let queue = state.queue(queue_url)?;
        let mut response = SqsBatchResponse::default();
        for entry in entries {
            if queue.in_flight.remove(&entry.receipt_handle).is_some() {
                response.successful.push(SqsBatchSuccess {
                    id: entry.id,
                    message_id: None,
                });
            } else {
                response.failed.push(SqsBatchFailure {
                    id: entry.id,
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: format!("unknown receipt handle {}", entry.receipt_handle),
                    sender_fault: true,
                });
            }
        }
        Ok(response)
    }

    async fn close(&self) {
        self.state.lock().sessions.close();
    }
}
