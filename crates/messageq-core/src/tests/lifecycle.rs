//! Readiness gating, fail-fast after stop, and startup failure.

use super::harness::{entries, entry, MockAdapter};
use crate::{
    Acknowledger, BackendError, CommitHandle, MessageQueueAcknowledger, MessageQueueError,
    MessageQueueWriter, Service, ServiceConfig, ServiceState, Writer,
};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_state(writer: &Writer<MockAdapter>, state: ServiceState) {
    let mut rx = writer.service().gate().subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .unwrap();
}

fn writer(adapter: MockAdapter) -> (Arc<Writer<MockAdapter>>, Arc<MockAdapter>) {
    let adapter = Arc::new(adapter);
    let writer = Writer::new(adapter.clone(), ServiceConfig::writes(), None).unwrap();
    (Arc::new(writer), adapter)
}

#[tokio::test(start_paused = true)]
async fn write_during_starting_waits_for_running() {
    let (writer, adapter) = writer(MockAdapter::counting(10).with_blocked_connect());

    let starter = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.start().await })
    };
    wait_for_state(&writer, ServiceState::Starting).await;

    let write = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.write(entries(0, 10)).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!write.is_finished(), "write must wait for the backend");
    assert!(adapter.sent_entries().is_empty());

    adapter.release_connect();
    starter.await.unwrap().unwrap();
    write.await.unwrap().unwrap();

    assert!(adapter.wait_for_entries(10, Duration::from_secs(1)).await);
    assert_eq!(adapter.batch_sizes(), vec![10]);
    assert_eq!(writer.state(), ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn waiting_writers_released_in_arrival_order() {
    let adapter = Arc::new(MockAdapter::counting(1).with_blocked_connect());
    let config = ServiceConfig {
        max_in_flight: 1,
        ..ServiceConfig::writes()
    };
    let writer = Arc::new(Writer::new(adapter.clone(), config, None).unwrap());

    let starter = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.start().await })
    };
    wait_for_state(&writer, ServiceState::Starting).await;

    let mut writes = Vec::new();
    for i in 0..5 {
        let writer = writer.clone();
        writes.push(tokio::spawn(async move { writer.write(vec![entry(i)]).await }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    adapter.release_connect();
    starter.await.unwrap().unwrap();
    for write in writes {
        write.await.unwrap().unwrap();
    }

    assert!(adapter.wait_for_entries(5, Duration::from_secs(1)).await);
    assert_eq!(adapter.sent_entries(), entries(0, 5));
}

#[tokio::test(start_paused = true)]
async fn write_during_stopping_fails_fast() {
    let (writer, adapter) = writer(MockAdapter::counting(10));
    adapter.set_send_delay(Duration::from_secs(1));
    writer.start().await.unwrap();

    // A full batch that stays in flight while stop drains.
    writer.write(entries(0, 10)).await.unwrap();

    let stopper = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.stop().await })
    };
    wait_for_state(&writer, ServiceState::Stopping).await;

    let result = writer.write(vec![entry(99)]).await;
    assert!(matches!(result, Err(MessageQueueError::ServiceStopped)));

    let report = stopper.await.unwrap().unwrap();
    assert!(report.drained);
    assert_eq!(writer.state(), ServiceState::Terminated);
    assert!(!adapter.sent_entries().contains(&entry(99)));
    assert_eq!(adapter.closes(), 1);
}

#[tokio::test]
async fn write_after_terminated_fails() {
    let (writer, adapter) = writer(MockAdapter::counting(10));
    writer.start().await.unwrap();
    writer.stop().await.unwrap();

    let result = writer.write(vec![entry(0)]).await;
    assert!(matches!(result, Err(MessageQueueError::ServiceStopped)));
    assert!(adapter.sent_entries().is_empty());
}

#[tokio::test]
async fn connect_failure_terminates_service() {
    let (writer, adapter) = writer(MockAdapter::counting(10));
    adapter.fail_connect(BackendError::Connect("connection refused".into()));

    let result = writer.start().await;
    assert!(matches!(
        result,
        Err(MessageQueueError::StartupFailed { ref backend, .. }) if backend == "mock"
    ));
    assert_eq!(writer.state(), ServiceState::Terminated);
    assert_eq!(adapter.closes(), 1);

    let write = writer.write(vec![entry(0)]).await;
    assert!(matches!(write, Err(MessageQueueError::ServiceStopped)));
}

#[tokio::test(start_paused = true)]
async fn stop_while_starting_releases_waiters() {
    let (writer, adapter) = writer(MockAdapter::counting(10).with_blocked_connect());

    let starter = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.start().await })
    };
    wait_for_state(&writer, ServiceState::Starting).await;

    let write = {
        let writer = writer.clone();
        tokio::spawn(async move { writer.write(vec![entry(0)]).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    writer.stop().await.unwrap();
    assert!(matches!(
        write.await.unwrap(),
        Err(MessageQueueError::ServiceStopped)
    ));

    adapter.release_connect();
    assert!(matches!(
        starter.await.unwrap(),
        Err(MessageQueueError::ServiceStopped)
    ));
    assert_eq!(writer.state(), ServiceState::Terminated);
    assert!(adapter.sent_entries().is_empty());
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (writer, adapter) = writer(MockAdapter::counting(10));
    writer.start().await.unwrap();
    assert!(matches!(
        writer.start().await,
        Err(MessageQueueError::InvalidState { .. })
    ));
    assert_eq!(adapter.connects(), 1);
    writer.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (writer, adapter) = writer(MockAdapter::counting(10));
    writer.start().await.unwrap();
    writer.stop().await.unwrap();
    let second = writer.stop().await.unwrap();
    assert!(second.drained);
    assert_eq!(adapter.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn acknowledge_skips_entries_without_handle() {
    let adapter = Arc::new(MockAdapter::counting(10));
    let acknowledger =
        Acknowledger::new(adapter.clone(), ServiceConfig::acks(), None).unwrap();
    acknowledger.start().await.unwrap();

    let with_handle = entry(1).with_commit_handle(CommitHandle::new(1u64));
    acknowledger
        .acknowledge(vec![entry(0), with_handle.clone()])
        .await
        .unwrap();
    let report = acknowledger.stop().await.unwrap();

    assert_eq!(report.flushed_entries, 1);
    assert_eq!(adapter.sent_entries(), vec![with_handle]);
}
