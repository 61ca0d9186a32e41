//! Configuration, paths, and logging setup for the message queue journal.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, JournalMode, KafkaConfig, PulsarConfig, SqsConfig, DEFAULT_FLUSH_INTERVAL_NANOS,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_INFLIGHT_ACK_BATCHES, DEFAULT_MAX_INFLIGHT_WRITE_BATCHES,
    DEFAULT_PULSAR_SERVICE_URL, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_TOPIC,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
