//! Journal selection: build the writer/acknowledger pair for the configured
//! backend.

use crate::client::{KafkaClient, PulsarClient, SqsClient};
use crate::kafka::{KafkaAcknowledger, KafkaWriter};
use crate::pulsar::{PulsarAcknowledger, PulsarWriter};
use crate::sqs::{SqsAcknowledger, SqsWriter};
use messageq_config::{Config, CoreError, JournalMode};
use messageq_core::{
    Acknowledger, BackendAdapter, MessageQueueAcknowledger, MessageQueueError, MessageQueueWriter,
    OutcomeCallback, ServiceConfig, Writer,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Broker clients for one backend.
#[derive(Clone)]
pub enum BrokerClients {
    Kafka(Arc<dyn KafkaClient>),
    Pulsar(Arc<dyn PulsarClient>),
    Sqs(Arc<dyn SqsClient>),
}

impl BrokerClients {
    pub fn mode(&self) -> JournalMode {
        match self {
            Self::Kafka(_) => JournalMode::Kafka,
            Self::Pulsar(_) => JournalMode::Pulsar,
            Self::Sqs(_) => JournalMode::Sqs,
        }
    }
}

impl fmt::Debug for BrokerClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerClients({})", self.mode())
    }
}

/// Optional per-batch callbacks for each side of the journal.
#[derive(Clone, Default)]
pub struct JournalHooks {
    pub on_write: Option<OutcomeCallback>,
    pub on_acknowledge: Option<OutcomeCallback>,
}

#[derive(Error, Debug)]
pub enum JournalError {
    #[error(transparent)]
    Config(#[from] CoreError),

    #[error(transparent)]
    Queue(#[from] MessageQueueError),

    #[error("journal mode is {mode} but {supplied} clients were supplied")]
    ClientMismatch {
        mode: JournalMode,
        supplied: JournalMode,
    },
}

/// The two services of the journal. Neither is started.
pub struct Journal {
    pub mode: JournalMode,
    pub writer: Arc<dyn MessageQueueWriter>,
    pub acknowledger: Arc<dyn MessageQueueAcknowledger>,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal").field("mode", &self.mode).finish()
    }
}

/// Validate `config` and wire the adapters for `config.message_journal_mode`.
pub fn open_journal(
    config: &Config,
    clients: BrokerClients,
    hooks: JournalHooks,
) -> Result<Journal, JournalError> {
    config.validate()?;

    let mode = config.message_journal_mode;
    if clients.mode() != mode {
        return Err(JournalError::ClientMismatch {
            mode,
            supplied: clients.mode(),
        });
    }

    let writes = ServiceConfig {
        max_in_flight: config.max_inflight_write_batches,
        flush_interval: config.flush_interval(),
        shutdown_timeout: config.shutdown_timeout(),
        max_batch_count: config.max_batch_count,
        max_batch_bytes: config.max_batch_bytes,
    };
    let acks = ServiceConfig {
        max_in_flight: config.max_inflight_ack_batches,
        max_batch_count: None,
        max_batch_bytes: None,
        ..writes.clone()
    };

    let journal = match clients {
        BrokerClients::Kafka(client) => {
            let writer = KafkaWriter::new(
                client.clone(),
                config.kafka.topic.clone(),
                config.kafka_client_id(),
            );
            let acknowledger = KafkaAcknowledger::new(
                client,
                config.kafka.topic.clone(),
                config.kafka.consumer_group.clone(),
            );
            build(mode, writer, acknowledger, writes, acks, hooks)?
        }
        BrokerClients::Pulsar(client) => {
            let service_url = config.pulsar_service_url()?;
            info!(service_url = %service_url, "Using Pulsar journal");
            let writer = PulsarWriter::new(client.clone(), config.pulsar.topic.clone());
            let acknowledger = PulsarAcknowledger::new(
                client,
                config.pulsar.topic.clone(),
                config.pulsar.subscription.clone(),
            );
            build(mode, writer, acknowledger, writes, acks, hooks)?
        }
        BrokerClients::Sqs(client) => {
            let queue_url = config.sqs_queue_url()?.ok_or_else(|| {
                CoreError::Config("sqs.queue_url is required in sqs mode".to_string())
            })?;
            let writer = SqsWriter::new(client.clone(), queue_url.as_str());
            let acknowledger = SqsAcknowledger::new(client, queue_url.as_str());
            build(mode, writer, acknowledger, writes, acks, hooks)?
        }
    };

    info!(
        mode = %journal.mode,
        max_inflight_write_batches = config.max_inflight_write_batches,
        max_inflight_ack_batches = config.max_inflight_ack_batches,
        "Message journal opened"
    );
    Ok(journal)
}

fn build<W, A>(
    mode: JournalMode,
    writer: W,
    acknowledger: A,
    writes: ServiceConfig,
    acks: ServiceConfig,
    hooks: JournalHooks,
) -> Result<Journal, MessageQueueError>
where
    W: BackendAdapter,
    A: BackendAdapter,
{
    let writer = Writer::new(Arc::new(writer), writes, hooks.on_write)?;
    let acknowledger = Acknowledger::new(Arc::new(acknowledger), acks, hooks.on_acknowledge)?;
    Ok(Journal {
        mode,
        writer: Arc::new(writer),
        acknowledger: Arc::new(acknowledger),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryKafka, InMemoryPulsar, InMemorySqs};
    use messageq_config::SqsConfig;
    use messageq_core::{DispatchReport, Entry, ServiceState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const QUEUE: &str = "https://sqs.us-east-1.amazonaws.com/1/raw";

    fn config(mode: JournalMode) -> Config {
        Config {
            message_journal_mode: mode,
            flush_interval_nanos: Duration::from_millis(10).as_nanos() as u64,
            sqs: SqsConfig {
                queue_url: Some(QUEUE.to_string()),
            },
            ..Config::default()
        }
    }

    #[test]
    fn mismatched_clients_rejected() {
        let clients = BrokerClients::Pulsar(Arc::new(InMemoryPulsar::new()));
        let result = open_journal(&config(JournalMode::Kafka), clients, JournalHooks::default());
        assert!(matches!(
            result,
            Err(JournalError::ClientMismatch {
                mode: JournalMode::Kafka,
                supplied: JournalMode::Pulsar
            })
        ));
    }

    #[test]
    fn invalid_config_rejected() {
        let mut config = config(JournalMode::Sqs);
        config.sqs.queue_url = None;
        let clients = BrokerClients::Sqs(Arc::new(InMemorySqs::new()));
        let result = open_journal(&config, clients, JournalHooks::default());
        assert!(matches!(result, Err(JournalError::Config(_))));
    }

    #[test]
    fn batch_override_above_ceiling_rejected() {
        let mut config = config(JournalMode::Sqs);
        config.max_batch_count = Some(11);
        let clients = BrokerClients::Sqs(Arc::new(InMemorySqs::new()));
        let result = open_journal(&config, clients, JournalHooks::default());
        assert!(matches!(
            result,
            Err(JournalError::Queue(MessageQueueError::InvalidConfig(_)))
        ));
    }

    #[tokio::test]
    async fn kafka_journal_end_to_end() {
        let broker = Arc::new(InMemoryKafka::new(3));
        let written = Arc::new(AtomicUsize::new(0));
        let hooks = JournalHooks {
            on_write: Some({
                let written = written.clone();
                Arc::new(move |report: &DispatchReport| {
                    written.fetch_add(report.committed().len(), Ordering::SeqCst);
                })
            }),
            on_acknowledge: None,
        };
        let journal = open_journal(
            &config(JournalMode::Kafka),
            BrokerClients::Kafka(broker.clone()),
            hooks,
        )
        .unwrap();
        journal.writer.start().await.unwrap();
        journal.acknowledger.start().await.unwrap();

        let entries: Vec<Entry> = (0..25)
            .map(|i| Entry::new(format!("payload-{i}")).with_key(format!("k{}", i % 4)))
            .collect();
        journal.writer.write(entries).await.unwrap();
        let report = journal.writer.stop().await.unwrap();
        assert!(report.drained);
        assert_eq!(written.load(Ordering::SeqCst), 25);
        assert_eq!(journal.writer.state(), ServiceState::Terminated);

        let received = broker.poll("messageq", "message-input", 100);
        assert_eq!(received.len(), 25);
        journal.acknowledger.acknowledge(received).await.unwrap();
        let report = journal.acknowledger.stop().await.unwrap();
        assert!(report.drained);

        let committed: i64 = (0..3)
            .filter_map(|p| broker.committed_offset("messageq", "message-input", p))
            .sum();
        assert_eq!(committed, 25);
    }

    #[tokio::test]
    async fn sqs_journal_end_to_end() {
        let broker = Arc::new(InMemorySqs::new());
        broker.create_queue(QUEUE);
        let journal = open_journal(
            &config(JournalMode::Sqs),
            BrokerClients::Sqs(broker.clone()),
            JournalHooks::default(),
        )
        .unwrap();
        journal.writer.start().await.unwrap();
        journal.acknowledger.start().await.unwrap();

        let entries: Vec<Entry> = (0..23).map(|i| Entry::new(format!("m{i}"))).collect();
        journal.writer.write(entries).await.unwrap();
        journal.writer.stop().await.unwrap();
        assert_eq!(broker.visible(QUEUE), 23);

        let mut received = Vec::new();
        loop {
            let chunk = broker.receive(QUEUE, 10);
            if chunk.is_empty() {
                break;
            }
            received.extend(chunk);
        }
        assert_eq!(received.len(), 23);

        journal.acknowledger.acknowledge(received).await.unwrap();
        journal.acknowledger.stop().await.unwrap();
        assert_eq!(broker.in_flight(QUEUE), 0);
    }
}
