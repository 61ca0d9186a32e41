//! `messageq pump`: journal input lines, read them back, acknowledge them.

use messageq_backends::{
    open_journal, BrokerClients, InMemoryKafka, InMemoryPulsar, InMemorySqs, JournalHooks,
};
use messageq_config::{Config, JournalMode};
use messageq_core::{DispatchReport, Entry, OutcomeCallback, ShutdownReport};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// Entries handed to `write`/`acknowledge` per call.
const CHUNK_SIZE: usize = 100;

/// What a pump run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PumpSummary {
    pub read: usize,
    pub written: usize,
    pub acknowledged: usize,
    pub failed_batches: usize,
    pub failed_entries: usize,
    pub lost_entries: usize,
    pub interrupted: bool,
}

#[derive(Default)]
struct Counters {
    committed: AtomicUsize,
    failed_batches: AtomicUsize,
    failed_entries: AtomicUsize,
}

impl Counters {
    fn callback(self: &Arc<Self>) -> OutcomeCallback {
        let counters = Arc::clone(self);
        Arc::new(move |report: &DispatchReport| {
            counters
                .committed
                .fetch_add(report.committed().len(), Ordering::Relaxed);
            let failed = report.failed_entries();
            if failed > 0 {
                counters.failed_entries.fetch_add(failed, Ordering::Relaxed);
            }
            if report.committed().is_empty() && failed > 0 {
                counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            }
        })
    }
}

/// In-memory broker for the configured journal mode.
enum Broker {
    Kafka(Arc<InMemoryKafka>),
    Pulsar(Arc<InMemoryPulsar>),
    Sqs(Arc<InMemorySqs>, String),
}

impl Broker {
    fn for_config(config: &Config) -> Self {
        match config.message_journal_mode {
            JournalMode::Kafka => Self::Kafka(Arc::new(InMemoryKafka::new(4))),
            JournalMode::Pulsar => Self::Pulsar(Arc::new(InMemoryPulsar::new())),
            JournalMode::Sqs => {
                let queue_url = config.sqs.queue_url.clone().unwrap_or_default();
                let sqs = InMemorySqs::new();
                sqs.create_queue(&queue_url);
                Self::Sqs(Arc::new(sqs), queue_url)
            }
        }
    }

    fn clients(&self) -> BrokerClients {
        match self {
            Self::Kafka(kafka) => BrokerClients::Kafka(kafka.clone()),
            Self::Pulsar(pulsar) => BrokerClients::Pulsar(pulsar.clone()),
            Self::Sqs(sqs, _) => BrokerClients::Sqs(sqs.clone()),
        }
    }

    /// Read the next chunk of journaled entries as a consumer would.
    fn consume(&self, config: &Config) -> Vec<Entry> {
        match self {
            Self::Kafka(kafka) => kafka.poll(
                &config.kafka.consumer_group,
                &config.kafka.topic,
                CHUNK_SIZE,
            ),
            Self::Pulsar(pulsar) => pulsar.receive(
                &config.pulsar.topic,
                &config.pulsar.subscription,
                CHUNK_SIZE,
            ),
            Self::Sqs(sqs, queue_url) => sqs.receive(queue_url, CHUNK_SIZE),
        }
    }
}

/// Run the pump until `input` is exhausted or `shutdown` resolves. Either way
/// both services are stopped gracefully before returning.
pub async fn run_pump<R, S>(
    config: Config,
    input: R,
    shutdown: S,
) -> Result<PumpSummary, Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let broker = Broker::for_config(&config);
    let writes = Arc::new(Counters::default());
    let acks = Arc::new(Counters::default());
    let journal = open_journal(
        &config,
        broker.clients(),
        JournalHooks {
            on_write: Some(writes.callback()),
            on_acknowledge: Some(acks.callback()),
        },
    )?;

    journal.writer.start().await?;
    journal.acknowledger.start().await?;
    info!(mode = %journal.mode, "Pump started");

    let mut summary = PumpSummary::default();
    let mut lines = input.lines();
    let mut chunk = Vec::with_capacity(CHUNK_SIZE);
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                warn!("Interrupted, stopping pump");
                summary.interrupted = true;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.is_empty() {
            continue;
        }
        summary.read += 1;
        chunk.push(Entry::new(line));
        if chunk.len() == CHUNK_SIZE {
            journal.writer.write(std::mem::take(&mut chunk)).await?;
        }
    }
    if !chunk.is_empty() {
        journal.writer.write(chunk).await?;
    }

    let report = journal.writer.stop().await?;
    record_shutdown(&mut summary, "writer", report);

    if !summary.interrupted {
        loop {
            let received = broker.consume(&config);
            if received.is_empty() {
                break;
            }
            journal.acknowledger.acknowledge(received).await?;
        }
    }
    let report = journal.acknowledger.stop().await?;
    record_shutdown(&mut summary, "acknowledger", report);

    summary.written = writes.committed.load(Ordering::Relaxed);
    summary.acknowledged = acks.committed.load(Ordering::Relaxed);
    summary.failed_batches = writes.failed_batches.load(Ordering::Relaxed)
        + acks.failed_batches.load(Ordering::Relaxed);
    summary.failed_entries = writes.failed_entries.load(Ordering::Relaxed)
        + acks.failed_entries.load(Ordering::Relaxed);
    Ok(summary)
}

fn record_shutdown(summary: &mut PumpSummary, role: &str, report: ShutdownReport) {
    if !report.drained || report.lost_entries > 0 {
        warn!(
            role,
            lost_entries = report.lost_entries,
            lost_in_flight_batches = report.lost_in_flight_batches,
            "Shutdown left work behind"
        );
    }
    summary.lost_entries += report.lost_entries;
}

#[cfg(test)]
mod tests {
    use super::*;
    use messageq_config::SqsConfig;

    fn config(mode: JournalMode) -> Config {
        Config {
            message_journal_mode: mode,
            flush_interval_nanos: 5_000_000,
            sqs: SqsConfig {
                queue_url: Some("https://sqs.us-east-1.amazonaws.com/1/raw".to_string()),
            },
            ..Config::default()
        }
    }

    fn input(lines: usize) -> Vec<u8> {
        let mut text = String::new();
        for i in 0..lines {
            text.push_str(&format!("line {i}\n"));
        }
        text.into_bytes()
    }

    #[tokio::test]
    async fn pumps_every_line_for_each_mode() {
        for mode in [JournalMode::Kafka, JournalMode::Pulsar, JournalMode::Sqs] {
            let data = input(250);
            let summary = run_pump(config(mode), data.as_slice(), std::future::pending())
                .await
                .unwrap();

            assert_eq!(summary.read, 250, "{mode}");
            assert_eq!(summary.written, 250, "{mode}");
            assert_eq!(summary.acknowledged, 250, "{mode}");
            assert_eq!(summary.failed_batches, 0, "{mode}");
            assert_eq!(summary.lost_entries, 0, "{mode}");
            assert!(!summary.interrupted);
        }
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let data = b"a\n\nb\n\n".to_vec();
        let summary = run_pump(config(JournalMode::Kafka), data.as_slice(), std::future::pending())
            .await
            .unwrap();
        assert_eq!(summary.read, 2);
        assert_eq!(summary.acknowledged, 2);
    }

    #[tokio::test]
    async fn shutdown_stops_before_reading() {
        let data = input(10);
        let summary = run_pump(config(JournalMode::Pulsar), data.as_slice(), async {})
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.read, 0);
        assert_eq!(summary.acknowledged, 0);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_starting() {
        let mut config = config(JournalMode::Sqs);
        config.sqs.queue_url = None;
        let data = input(1);
        assert!(run_pump(config, data.as_slice(), std::future::pending())
            .await
            .is_err());
    }
}
