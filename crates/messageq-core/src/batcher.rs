//! Greedy count/byte bounded batching.
//!
//! `partition` is the pure form used for planning and tests; the dispatcher
//! feeds entries one by one through a `BatchAccumulator`, which applies the
//! exact same boundary rules incrementally.

use crate::{Entry, MessageQueueError, MessageQueueResult};
use std::mem;

/// How a payload is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    Raw,
    /// Standard padded base64 (4 output bytes per 3 input bytes).
    Base64,
}

impl PayloadEncoding {
    /// Encoded length of `raw_len` payload bytes.
    pub fn encoded_len(self, raw_len: usize) -> usize {
        match self {
            Self::Raw => raw_len,
            Self::Base64 => raw_len.div_ceil(3) * 4,
        }
    }
}

/// How an entry is weighed against the byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySizing {
    /// Encoded key and value plus a fixed per-entry envelope.
    Payload {
        encoding: PayloadEncoding,
        overhead: usize,
    },
    /// Every entry weighs the same regardless of contents (acknowledgment paths).
    Fixed(usize),
}

impl EntrySizing {
    pub fn size_of(&self, entry: &Entry) -> usize {
        match *self {
            Self::Payload { encoding, overhead } => {
                let key_len = entry.key().map_or(0, |k| encoding.encoded_len(k.len()));
                encoding.encoded_len(entry.value().len()) + key_len + overhead
            }
            Self::Fixed(size) => size,
        }
    }
}

/// Per-batch limits imposed by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    max_count: usize,
    max_bytes: usize,
    sizing: EntrySizing,
}

impl BatchLimits {
    pub fn new(max_count: usize, max_bytes: usize, sizing: EntrySizing) -> MessageQueueResult<Self> {
        if max_count == 0 {
            return Err(MessageQueueError::InvalidConfig(
                "max batch count must be positive".to_string(),
            ));
        }
        if max_bytes == 0 {
            return Err(MessageQueueError::InvalidConfig(
                "max batch bytes must be positive".to_string(),
            ));
        }
        Ok(Self {
            max_count,
            max_bytes,
            sizing,
        })
    }

    /// Fixed ceilings of a backend, usable in `const` items. Zero is raised
    /// to one.
    pub const fn ceiling(max_count: usize, max_bytes: usize, sizing: EntrySizing) -> Self {
        Self {
            max_count: if max_count == 0 { 1 } else { max_count },
            max_bytes: if max_bytes == 0 { 1 } else { max_bytes },
            sizing,
        }
    }

    /// Lower the limits to configured values.
    ///
    /// Backend limits are ceilings: an override above them is rejected rather
    /// than silently clamped.
    pub fn capped(
        self,
        max_count: Option<usize>,
        max_bytes: Option<usize>,
    ) -> MessageQueueResult<Self> {
        let count = match max_count {
            Some(count) if count > self.max_count => {
                return Err(MessageQueueError::InvalidConfig(format!(
                    "max batch count {} exceeds backend ceiling {}",
                    count, self.max_count
                )));
            }
            Some(count) => count,
            None => self.max_count,
        };
        let bytes = match max_bytes {
            Some(bytes) if bytes > self.max_bytes => {
                return Err(MessageQueueError::InvalidConfig(format!(
                    "max batch bytes {} exceeds backend ceiling {}",
                    bytes, self.max_bytes
                )));
            }
            Some(bytes) => bytes,
            None => self.max_bytes,
        };
        Self::new(count, bytes, self.sizing)
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn sizing(&self) -> EntrySizing {
        self.sizing
    }

    /// Encoded size of `entry` under these limits.
    pub fn entry_size(&self, entry: &Entry) -> usize {
        self.sizing.size_of(entry)
    }
}

/// An ordered group of entries dispatched together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<Entry>,
    encoded_bytes: usize,
}

impl Batch {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the encoded sizes of all members.
    pub fn encoded_bytes(&self) -> usize {
        self.encoded_bytes
    }

    /// A singleton whose only entry is larger than the byte limit.
    pub fn is_oversize(&self, limits: &BatchLimits) -> bool {
        self.encoded_bytes > limits.max_bytes
    }
}

/// The batch currently under assembly.
#[derive(Debug)]
pub struct BatchAccumulator {
    limits: BatchLimits,
    entries: Vec<Entry>,
    bytes: usize,
}

impl BatchAccumulator {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            entries: Vec::new(),
            bytes: 0,
        }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Add one entry, pushing every batch it completes onto `ready`.
    ///
    /// An entry larger than the byte limit closes the pending batch and is
    /// emitted on its own; it is never dropped here.
    pub fn push(&mut self, entry: Entry, ready: &mut Vec<Batch>) {
        let size = self.limits.entry_size(&entry);

        if size > self.limits.max_bytes {
            ready.extend(self.take());
            ready.push(Batch {
                entries: vec![entry],
                encoded_bytes: size,
            });
            return;
        }

        if !self.entries.is_empty()
            && (self.bytes + size > self.limits.max_bytes
                || self.entries.len() + 1 > self.limits.max_count)
        {
            ready.extend(self.take());
        }

        self.bytes += size;
        self.entries.push(entry);

        if self.entries.len() >= self.limits.max_count {
            ready.extend(self.take());
        }
    }

    /// Swap out the pending entries as a batch, if there are any.
    pub fn take(&mut self) -> Option<Batch> {
        if self.entries.is_empty() {
            return None;
        }
        Some(Batch {
            entries: mem::take(&mut self.entries),
            encoded_bytes: mem::replace(&mut self.bytes, 0),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.bytes
    }
}

/// Split `entries` into ordered batches that respect `limits`.
///
/// Concatenating the returned batches reproduces `entries` exactly. No batch
/// exceeds the count limit, and none exceeds the byte limit unless it holds a
/// single oversize entry.
pub fn partition(entries: &[Entry], limits: &BatchLimits) -> Vec<Batch> {
    let mut accumulator = BatchAccumulator::new(*limits);
    let mut batches = Vec::new();
    for entry in entries {
        accumulator.push(entry.clone(), &mut batches);
    }
    batches.extend(accumulator.take());
    batches
}
