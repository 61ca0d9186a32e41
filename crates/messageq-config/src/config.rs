//! Configuration management for the message queue journal.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default in-flight write batches.
pub const DEFAULT_MAX_INFLIGHT_WRITE_BATCHES: usize = 5;

/// Default in-flight acknowledgment batches.
pub const DEFAULT_MAX_INFLIGHT_ACK_BATCHES: usize = 10;

/// Default idle flush cadence (one second).
pub const DEFAULT_FLUSH_INTERVAL_NANOS: u64 = 1_000_000_000;

/// Default bound on the final flush at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Default topic raw messages are journaled to.
pub const DEFAULT_TOPIC: &str = "message-input";

/// Default Pulsar broker.
pub const DEFAULT_PULSAR_SERVICE_URL: &str = "pulsar://localhost:6650";

const ENV_LOG_LEVEL: &str = "MESSAGEQ_LOG_LEVEL";
const ENV_JOURNAL_MODE: &str = "MESSAGEQ_JOURNAL_MODE";
const ENV_SQS_QUEUE_URL: &str = "MESSAGEQ_SQS_QUEUE_URL";

/// Which backend journals raw messages. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Kafka,
    Pulsar,
    Sqs,
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Kafka => "kafka",
            Self::Pulsar => "pulsar",
            Self::Sqs => "sqs",
        };
        f.write_str(name)
    }
}

impl FromStr for JournalMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "pulsar" => Ok(Self::Pulsar),
            "sqs" => Ok(Self::Sqs),
            other => Err(CoreError::Config(format!(
                "unknown journal mode \"{other}\" (expected kafka, pulsar or sqs)"
            ))),
        }
    }
}

/// Kafka-style backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    pub bootstrap_servers: String,
    pub topic: String,
    pub consumer_group: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: "messageq".to_string(),
        }
    }
}

/// Pulsar-style backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulsarConfig {
    /// `pulsar://` or `pulsar+ssl://` broker URL.
    pub service_url: String,
    pub topic: String,
    pub subscription: String,
}

impl Default for PulsarConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_PULSAR_SERVICE_URL.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            subscription: "messageq".to_string(),
        }
    }
}

/// SQS-style backend settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    /// Absolute queue URL; required in `sqs` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
}

/// Main journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend used for the journal.
    #[serde(default)]
    pub message_journal_mode: JournalMode,
    /// Identifies this node to the backend.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Write batches allowed in flight at once.
    #[serde(default = "default_max_inflight_write_batches")]
    pub max_inflight_write_batches: usize,
    /// Acknowledgment batches allowed in flight at once.
    #[serde(default = "default_max_inflight_ack_batches")]
    pub max_inflight_ack_batches: usize,
    /// Lower batch count limit than the backend's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_count: Option<usize>,
    /// Lower batch byte limit than the backend's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_bytes: Option<usize>,
    /// Idle flush cadence in nanoseconds.
    #[serde(default = "default_flush_interval_nanos")]
    pub flush_interval_nanos: u64,
    /// Bound on the final flush at shutdown, in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub pulsar: PulsarConfig,
    #[serde(default)]
    pub sqs: SqsConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_max_inflight_write_batches() -> usize {
    DEFAULT_MAX_INFLIGHT_WRITE_BATCHES
}

fn default_max_inflight_ack_batches() -> usize {
    DEFAULT_MAX_INFLIGHT_ACK_BATCHES
}

fn default_flush_interval_nanos() -> u64 {
    DEFAULT_FLUSH_INTERVAL_NANOS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            message_journal_mode: JournalMode::default(),
            node_id: default_node_id(),
            max_inflight_write_batches: DEFAULT_MAX_INFLIGHT_WRITE_BATCHES,
            max_inflight_ack_batches: DEFAULT_MAX_INFLIGHT_ACK_BATCHES,
            max_batch_count: None,
            max_batch_bytes: None,
            flush_interval_nanos: DEFAULT_FLUSH_INTERVAL_NANOS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            kafka: KafkaConfig::default(),
            pulsar: PulsarConfig::default(),
            sqs: SqsConfig::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> CoreResult<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from the config file, falling back to defaults,
    /// apply environment overrides, and validate the result.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from `MESSAGEQ_*` environment variables.
    fn load_from_env(&mut self) -> CoreResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> CoreResult<()> {
        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(mode) = lookup(ENV_JOURNAL_MODE) {
            self.message_journal_mode = mode.parse()?;
        }
        if let Some(queue_url) = lookup(ENV_SQS_QUEUE_URL) {
            self.sqs.queue_url = Some(queue_url);
        }
        Ok(())
    }

    /// Check every option for a usable value.
    pub fn validate(&self) -> CoreResult<()> {
        positive("max_inflight_write_batches", self.max_inflight_write_batches as u64)?;
        positive("max_inflight_ack_batches", self.max_inflight_ack_batches as u64)?;
        if let Some(count) = self.max_batch_count {
            positive("max_batch_count", count as u64)?;
        }
        if let Some(bytes) = self.max_batch_bytes {
            positive("max_batch_bytes", bytes as u64)?;
        }
        positive("flush_interval_nanos", self.flush_interval_nanos)?;
        positive("shutdown_timeout_ms", self.shutdown_timeout_ms)?;

        self.pulsar_service_url()?;
        let queue_url = self.sqs_queue_url()?;
        if self.message_journal_mode == JournalMode::Sqs && queue_url.is_none() {
            return Err(CoreError::Config(
                "Running with journal mode \"sqs\" but configuration parameter \"sqs.queue_url\" is missing"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// The Pulsar broker URL, checked for a Pulsar scheme.
    pub fn pulsar_service_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.pulsar.service_url)?;
        match url.scheme() {
            "pulsar" | "pulsar+ssl" => Ok(url),
            scheme => Err(CoreError::Config(format!(
                "pulsar.service_url must use pulsar:// or pulsar+ssl://, got {scheme}://"
            ))),
        }
    }

    /// The SQS queue URL, if configured. Relative URLs are rejected.
    pub fn sqs_queue_url(&self) -> CoreResult<Option<Url>> {
        self.sqs
            .queue_url
            .as_deref()
            .map(|raw| Url::parse(raw).map_err(CoreError::from))
            .transpose()
    }

    /// Kafka client id derived from the node id.
    pub fn kafka_client_id(&self) -> String {
        format!("messageq-node-{}", self.node_id)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_nanos(self.flush_interval_nanos)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn positive(name: &str, value: u64) -> CoreResult<()> {
    if value == 0 {
        return Err(CoreError::Config(format!(
            "{name} must be a positive integer"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn sqs_config(queue_url: Option<&str>) -> Config {
        Config {
            message_journal_mode: JournalMode::Sqs,
            sqs: SqsConfig {
                queue_url: queue_url.map(str::to_string),
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.message_journal_mode, JournalMode::Kafka);
        assert_eq!(config.max_inflight_write_batches, 5);
        assert_eq!(config.max_inflight_ack_batches, 10);
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.kafka.topic, DEFAULT_TOPIC);
        assert_eq!(config.pulsar.service_url, DEFAULT_PULSAR_SERVICE_URL);
        assert!(config.sqs.queue_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "message_journal_mode": "pulsar",
            "max_batch_count": 50,
            "pulsar": { "topic": "raw" }
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.message_journal_mode, JournalMode::Pulsar);
        assert_eq!(config.max_batch_count, Some(50));
        assert_eq!(config.pulsar.topic, "raw");
        assert_eq!(config.pulsar.subscription, "messageq");
        assert_eq!(config.max_inflight_ack_batches, 10);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = sqs_config(Some("https://sqs.eu-west-1.amazonaws.com/1234/raw"));
        config.max_inflight_write_batches = 3;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.message_journal_mode, JournalMode::Sqs);
        assert_eq!(loaded.max_inflight_write_batches, 3);
        assert_eq!(loaded.node_id, config.node_id);
        assert_eq!(loaded.sqs, config.sqs);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load_from_file(&paths.config_file());
        assert!(matches!(config, Err(CoreError::Io(_))));

        let config = Config::default();
        assert_eq!(config.pulsar.service_url, DEFAULT_PULSAR_SERVICE_URL);
    }

    #[test]
    fn test_unknown_journal_mode_rejected() {
        let json = r#"{ "message_journal_mode": "disk" }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
        assert!("disk".parse::<JournalMode>().is_err());
        assert_eq!("SQS".parse::<JournalMode>().unwrap(), JournalMode::Sqs);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LOG_LEVEL, "trace"),
            (ENV_JOURNAL_MODE, "sqs"),
            (ENV_SQS_QUEUE_URL, "https://queue.example.com/raw"),
        ]);
        let mut config = Config::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.message_journal_mode, JournalMode::Sqs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_bad_mode() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == ENV_JOURNAL_MODE).then(|| "disk".to_string())
        });
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_sqs_mode_requires_queue_url() {
        let err = sqs_config(None).validate().unwrap_err();
        assert!(err.to_string().contains("sqs.queue_url"));
    }

    #[test]
    fn test_sqs_queue_url_must_be_absolute() {
        let result = sqs_config(Some("queues/raw")).validate();
        assert!(matches!(result, Err(CoreError::InvalidUrl(_))));
    }

    #[test]
    fn test_pulsar_scheme_checked() {
        let mut config = Config::default();
        config.pulsar.service_url = "http://localhost:6650".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        config.pulsar.service_url = "pulsar+ssl://broker:6651".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_positive_values_rejected() {
        let cases: Vec<fn(&mut Config)> = vec![
            |c| c.max_inflight_write_batches = 0,
            |c| c.max_inflight_ack_batches = 0,
            |c| c.max_batch_count = Some(0),
            |c| c.max_batch_bytes = Some(0),
            |c| c.flush_interval_nanos = 0,
            |c| c.shutdown_timeout_ms = 0,
        ];
        for mutate in cases {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(CoreError::Config(_))));
        }
    }

    #[test]
    fn test_kafka_client_id() {
        let config = Config {
            node_id: "abc".to_string(),
            ..Config::default()
        };
        assert_eq!(config.kafka_client_id(), "messageq-node-abc");
    }

    #[test]
    fn test_load_validates() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        std::fs::write(paths.config_file(), r#"{ "max_inflight_ack_batches": 0 }"#).unwrap();

        assert!(Config::load(&paths).is_err());
    }
}
