//! Message entries flowing through the write and acknowledge paths.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Backend-opaque acknowledgment token.
///
/// Produced by a backend adapter once an entry is persisted or received, and
/// handed back unmodified at acknowledge time. The core never looks inside;
/// only the adapter that created it knows the concrete type.
#[derive(Clone)]
pub struct CommitHandle(Arc<dyn Any + Send + Sync>);

impl CommitHandle {
    /// Wrap a backend-specific token.
    pub fn new<T: Any + Send + Sync>(token: T) -> Self {
        Self(Arc::new(token))
    }

    /// Borrow the token as `T`, or `None` if it was produced by another backend.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }

    /// Whether the token is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        (*self.0).is::<T>()
    }
}

impl fmt::Debug for CommitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommitHandle(..)")
    }
}

/// One raw message.
///
/// Equality and hashing cover the message data only; two entries that differ
/// just in their commit handle are the same message.
#[derive(Debug, Clone)]
pub struct Entry {
    id: Vec<u8>,
    key: Option<Vec<u8>>,
    value: Vec<u8>,
    timestamp: i64,
    commit_handle: Option<CommitHandle>,
}

impl Entry {
    /// Create an entry for `value`, stamped with the current time.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Vec::new(),
            key: None,
            value: value.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            commit_handle: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Override the event time (milliseconds since epoch).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_commit_handle(mut self, handle: CommitHandle) -> Self {
        self.commit_handle = Some(handle);
        self
    }

    /// Backend-assigned id; empty until the entry has been accepted.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn commit_handle(&self) -> Option<&CommitHandle> {
        self.commit_handle.as_ref()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.key == other.key
            && self.value == other.value
            && self.timestamp == other.timestamp
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.key.hash(state);
        self.value.hash(state);
        self.timestamp.hash(state);
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entry{{id.len={}, key.len={}, value.len={}, timestamp={}}}",
            self.id.len(),
            self.key.as_ref().map_or(0, Vec::len),
            self.value.len(),
            self.timestamp
        )
    }
}
