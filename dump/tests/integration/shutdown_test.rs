use std::pin::Pin;
use std::time::Duration;

use dump::concurrency::pause::PauseReason;
use dump::concurrency::shutdown::cancelled;
use dump::control::{ControlSignal, ShutdownCoordinator};
use dump::error::ErrorKind;
use dump::journal::{JOURNAL_FILE_NAME, PARTIAL_JOURNAL_FILE_NAME};
use dump::test_utils::discovery::StaticDiscovery;
use dump::test_utils::executor::RecordingExecutor;
use futures::Stream;
use telemetry::tracing::init_test_tracing;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::common::*;

type SignalStream = Pin<Box<dyn Stream<Item = ControlSignal> + Send>>;

fn signal_stream() -> (mpsc::UnboundedSender<ControlSignal>, SignalStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|signal| (signal, rx))
    });

    (tx, Box::pin(stream))
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_before_start_leaves_a_partial_journal() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let run = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor);
    run.shutdown_tx().shutdown();

    let err = run.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OperationCanceled);
    assert!(executor.executed().is_empty());
    assert!(executor.metadata_written().is_empty());
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    assert!(dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
    assert!(!dir.path().join(JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_during_a_job_drains_the_queue() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::gated();
    let run = test_run(&server, dump_config(dir.path(), 1), shop_discovery(), &executor);
    let shutdown_tx = run.shutdown_tx().clone();
    let started = executor.started();

    let handle = tokio::spawn(run.run());

    started.notified().await;
    shutdown_tx.shutdown();
    executor.open_gate();

    let err = handle.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OperationCanceled);
    assert_eq!(executor.executed(), vec!["schema shop"]);
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    assert!(dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn operator_can_resume_an_interrupted_run() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::gated();
    let run = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor);

    let (signals, stream) = signal_stream();
    let (mut answers, input) = tokio::io::duplex(64);
    let mut pause_rx = run.pause_tx().subscribe();
    let coordinator = ShutdownCoordinator::start(
        stream,
        BufReader::new(input),
        tokio::io::sink(),
        false,
        run.pause_tx().clone(),
        run.shutdown_tx().clone(),
    );
    let started = executor.started();

    let handle = tokio::spawn(run.run());
    started.notified().await;

    signals.send(ControlSignal::Interrupt).unwrap();
    pause_rx
        .wait_for(|state| state.contains(PauseReason::Operator))
        .await
        .unwrap();
    answers.write_all(b"n\n").await.unwrap();
    pause_rx.wait_for(|state| !state.is_paused()).await.unwrap();
    executor.open_gate();

    let summary = handle.await.unwrap().unwrap();

    assert_eq!(summary.error_count, 0);
    assert_eq!(executor.executed().len(), 7);
    assert!(dir.path().join(JOURNAL_FILE_NAME).exists());
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn operator_can_cancel_an_interrupted_run() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::gated();
    let run = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor);

    let (signals, stream) = signal_stream();
    let (mut answers, input) = tokio::io::duplex(64);
    let mut shutdown_rx = run.shutdown_tx().subscribe();
    let coordinator = ShutdownCoordinator::start(
        stream,
        BufReader::new(input),
        tokio::io::sink(),
        false,
        run.pause_tx().clone(),
        run.shutdown_tx().clone(),
    );
    let started = executor.started();

    let handle = tokio::spawn(run.run());
    started.notified().await;

    signals.send(ControlSignal::Interrupt).unwrap();
    answers.write_all(b"y\n").await.unwrap();
    cancelled(&mut shutdown_rx).await;
    executor.open_gate();

    let err = handle.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OperationCanceled);
    assert!(dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
    assert!(!dir.path().join(JOURNAL_FILE_NAME).exists());
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn terminate_cancels_without_asking() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::gated();
    let run = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor);

    let (signals, stream) = signal_stream();
    let (_answers, input) = tokio::io::duplex(64);
    let mut shutdown_rx = run.shutdown_tx().subscribe();
    let coordinator = ShutdownCoordinator::start(
        stream,
        BufReader::new(input),
        tokio::io::sink(),
        true,
        run.pause_tx().clone(),
        run.shutdown_tx().clone(),
    );
    let started = executor.started();

    let handle = tokio::spawn(run.run());
    started.notified().await;

    signals.send(ControlSignal::Interrupt).unwrap();
    signals.send(ControlSignal::Terminate).unwrap();
    cancelled(&mut shutdown_rx).await;
    executor.open_gate();

    let err = handle.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OperationCanceled);
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_job_releases_locks_and_fails_the_run() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    executor.panic_on("table shop.log");
    let discovery = StaticDiscovery::new().with_table("shop", "log", false, 30);
    let run = test_run(&server, dump_config(dir.path(), 1), discovery, &executor);

    let err = tokio::time::timeout(Duration::from_secs(10), run.run())
        .await
        .expect("run hung after a worker panic")
        .unwrap_err();

    assert!(err.kinds().contains(&ErrorKind::WorkerPanic));
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    assert!(dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
    assert!(!dir.path().join(JOURNAL_FILE_NAME).exists());
}
