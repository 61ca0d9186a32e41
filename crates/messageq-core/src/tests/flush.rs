//! Idle flush and shutdown flush/drain.

use super::harness::{entries, entry, MockAdapter};
use crate::{
    MessageQueueError, MessageQueueWriter, Service, ServiceConfig, ServiceState, ShutdownReport,
    Writer,
};
use std::sync::Arc;
use std::time::Duration;

fn config(flush_interval: Duration) -> ServiceConfig {
    ServiceConfig {
        flush_interval,
        ..ServiceConfig::writes()
    }
}

#[tokio::test(start_paused = true)]
async fn idle_entry_flushed_after_interval() {
    let adapter = Arc::new(MockAdapter::counting(10));
    let writer = Writer::new(adapter.clone(), config(Duration::from_secs(1)), None).unwrap();
    writer.start().await.unwrap();

    writer.write(vec![entry(0)]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(adapter.sent_entries().is_empty(), "flushed too early");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(adapter.wait_for_entries(1, Duration::from_millis(10)).await);
    assert_eq!(adapter.batch_sizes(), vec![1]);
    assert_eq!(writer.service().status().pending_entries, 0);

    writer.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn recent_dispatch_defers_idle_flush() {
    let adapter = Arc::new(MockAdapter::counting(10));
    let writer = Writer::new(adapter.clone(), config(Duration::from_secs(1)), None).unwrap();
    writer.start().await.unwrap();

    // At 0.9s a full batch goes out and one entry stays behind.
    tokio::time::sleep(Duration::from_millis(900)).await;
    writer.write(entries(0, 11)).await.unwrap();
    assert!(adapter.wait_for_entries(10, Duration::from_millis(10)).await);
    assert_eq!(adapter.batch_sizes(), vec![10]);

    // The tick at 1s sees a dispatch 0.1s ago and leaves the entry alone.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(adapter.batch_sizes(), vec![10]);

    // The tick at 2s finds the accumulator idle for 1.1s.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(adapter.wait_for_entries(11, Duration::from_millis(10)).await);
    assert_eq!(adapter.batch_sizes(), vec![10, 1]);

    writer.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn no_flush_while_accumulator_empty() {
    let adapter = Arc::new(MockAdapter::counting(10));
    let writer = Writer::new(adapter.clone(), config(Duration::from_millis(100)), None).unwrap();
    writer.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(adapter.sent_batches().is_empty());

    writer.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_flushes_pending_entries() {
    let adapter = Arc::new(MockAdapter::counting(10));
    let writer = Writer::new(adapter.clone(), config(Duration::from_secs(60)), None).unwrap();
    writer.start().await.unwrap();

    writer.write(entries(0, 3)).await.unwrap();
    let report = writer.stop().await.unwrap();

    assert_eq!(report.flushed_entries, 3);
    assert_eq!(report.lost_entries, 0);
    assert!(report.drained);
    assert_eq!(adapter.sent_entries(), entries(0, 3));
    assert_eq!(adapter.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_gives_up_on_stuck_batches() {
    let adapter = Arc::new(MockAdapter::counting(10));
    adapter.set_send_delay(Duration::from_secs(60));
    let config = ServiceConfig {
        shutdown_timeout: Duration::from_secs(1),
        ..config(Duration::from_secs(1))
    };
    let writer = Writer::new(adapter.clone(), config, None).unwrap();
    writer.start().await.unwrap();

    writer.write(entries(0, 10)).await.unwrap();
    let report = writer.stop().await.unwrap();

    assert!(!report.drained);
    assert_eq!(report.lost_in_flight_batches, 1);
    assert_eq!(writer.state(), ServiceState::Terminated);
    assert_eq!(adapter.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn final_flush_lost_when_permits_never_free() {
    let adapter = Arc::new(MockAdapter::counting(10));
    adapter.set_send_delay(Duration::from_secs(60));
    let config = ServiceConfig {
        max_in_flight: 1,
        shutdown_timeout: Duration::from_secs(1),
        ..config(Duration::from_secs(30))
    };
    let writer = Writer::new(adapter.clone(), config, None).unwrap();
    writer.start().await.unwrap();

    writer.write(entries(0, 12)).await.unwrap();
    let report = writer.stop().await.unwrap();

    assert_eq!(report.flushed_entries, 0);
    assert_eq!(report.lost_entries, 2);
    assert!(!report.drained);
    assert_eq!(report.lost_in_flight_batches, 1);
    assert_eq!(adapter.batch_sizes(), vec![10]);
}

async fn wait_for_queued(writer: &Writer<MockAdapter>, entries: usize) {
    for _ in 0..1000 {
        if writer.service().status().queued_entries == entries {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "expected {entries} queued entries, found {}",
        writer.service().status().queued_entries
    );
}

#[tokio::test(start_paused = true)]
async fn stop_dispatches_batches_of_a_waiting_write() {
    let adapter = Arc::new(MockAdapter::counting(10));
    adapter.set_send_delay(Duration::from_millis(100));
    let config = ServiceConfig {
        max_in_flight: 1,
        ..config(Duration::from_secs(30))
    };
    let writer = Arc::new(Writer::new(adapter.clone(), config, None).unwrap());
    writer.start().await.unwrap();

    writer.write(entries(0, 10)).await.unwrap();
    let waiting = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.write(entries(10, 20)).await })
    };
    // Two full batches built, both behind the only permit.
    wait_for_queued(&writer, 20).await;

    let report = writer.stop().await.unwrap();

    assert!(waiting.await.unwrap().is_ok());
    assert_eq!(
        report,
        ShutdownReport {
            flushed_entries: 0,
            lost_entries: 0,
            drained: true,
            lost_in_flight_batches: 0,
        }
    );
    assert_eq!(adapter.sent_entries(), entries(0, 30));
    assert_eq!(adapter.batch_sizes(), vec![10, 10, 10]);
}

#[tokio::test(start_paused = true)]
async fn batches_queued_at_deadline_reported_lost() {
    let adapter = Arc::new(MockAdapter::counting(10));
    adapter.set_send_delay(Duration::from_secs(60));
    let config = ServiceConfig {
        max_in_flight: 1,
        shutdown_timeout: Duration::from_secs(1),
        ..config(Duration::from_secs(30))
    };
    let writer = Arc::new(Writer::new(adapter.clone(), config, None).unwrap());
    writer.start().await.unwrap();

    writer.write(entries(0, 10)).await.unwrap();
    let waiting = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.write(entries(10, 25)).await })
    };
    wait_for_queued(&writer, 20).await;

    let report = writer.stop().await.unwrap();

    // Both queued batches, including the one the write was waiting on, plus
    // the five-entry remainder.
    assert_eq!(report.lost_entries, 25);
    assert_eq!(report.flushed_entries, 0);
    assert!(!report.drained);
    assert_eq!(report.lost_in_flight_batches, 1);
    assert!(matches!(
        waiting.await.unwrap(),
        Err(MessageQueueError::ServiceStopped)
    ));
    assert_eq!(adapter.sent_entries(), entries(0, 10));
    assert_eq!(writer.service().status().queued_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn idle_flush_waiting_for_permit_counted_at_stop() {
    let adapter = Arc::new(MockAdapter::counting(10));
    adapter.set_send_delay(Duration::from_secs(60));
    let config = ServiceConfig {
        max_in_flight: 1,
        shutdown_timeout: Duration::from_secs(1),
        ..config(Duration::from_millis(100))
    };
    let writer = Writer::new(adapter.clone(), config, None).unwrap();
    writer.start().await.unwrap();

    writer.write(entries(0, 13)).await.unwrap();
    // The tick at 100ms takes the three-entry remainder and waits for a permit.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let status = writer.service().status();
    assert_eq!(status.pending_entries, 0);
    assert_eq!(status.queued_entries, 3);

    let report = writer.stop().await.unwrap();

    assert_eq!(report.lost_entries, 3);
    assert_eq!(report.flushed_entries, 0);
    assert_eq!(adapter.sent_entries(), entries(0, 10));
}

#[test]
fn zero_flush_interval_rejected() {
    let adapter = Arc::new(MockAdapter::counting(10));
    assert!(Writer::new(adapter, config(Duration::ZERO), None).is_err());
}
