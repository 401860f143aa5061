use std::fs;

use config::shared::DiskLimitsConfig;
use dump::client::QueryResult;
use dump::error::ErrorKind;
use dump::journal::{JOURNAL_FILE_NAME, PARTIAL_JOURNAL_FILE_NAME};
use dump::lock::LockMode;
use dump::not_updated::NOT_UPDATED_TABLES_FILE_NAME;
use dump::test_utils::discovery::StaticDiscovery;
use dump::test_utils::executor::RecordingExecutor;
use dump::test_utils::server::MockServer;
use telemetry::tracing::init_test_tracing;

use crate::common::*;

#[tokio::test(flavor = "multi_thread")]
async fn full_run_dumps_every_object_and_finalizes_the_journal() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();

    let summary = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.lock_mode, LockMode::FlushWithReadLock);
    assert_eq!(summary.error_count, 0);
    assert_eq!(summary.dispatch.non_transactional_tables, 2);
    assert_eq!(summary.dispatch.transactional_tables, 2);
    assert_eq!(summary.journal_path, dir.path().join(JOURNAL_FILE_NAME));

    assert_eq!(
        sorted(executor.executed()),
        vec![
            "post schema shop",
            "schema shop",
            "table shop.audit",
            "table shop.customers",
            "table shop.log",
            "table shop.orders",
            "view shop.recent_orders",
        ]
    );
    assert_eq!(
        sorted(executor.metadata_written()),
        vec!["shop.audit", "shop.customers", "shop.log", "shop.orders"]
    );

    let journal = fs::read_to_string(dir.path().join(JOURNAL_FILE_NAME)).unwrap();
    let lines: Vec<&str> = journal.lines().collect();
    assert!(lines[0].starts_with("Started dump at: "));
    assert_eq!(
        &lines[1..5],
        &[
            "SHOW MASTER STATUS:",
            "\tLog: binlog.000042",
            "\tPos: 157",
            "\tGTID:",
        ]
    );
    assert!(lines.last().unwrap().starts_with("Finished dump at: "));
    assert!(!dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn locks_are_released_after_the_last_non_transactional_read() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();

    test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    let unlock = main_position(&server, "UNLOCK TABLES");
    assert!(server.position_of("FLUSH TABLES WITH READ LOCK").unwrap() < unlock);
    assert!(read_position(&server, "log") < unlock);
    assert!(read_position(&server, "audit") < unlock);
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn locks_are_released_exactly_once_in_every_mode() {
    init_test_tracing();

    for less_locking in [false, true] {
        for non_transactional in [0usize, 1, 3] {
            let dir = tempfile::tempdir().unwrap();
            let server = mysql_server();
            let executor = RecordingExecutor::new();

            let mut discovery = StaticDiscovery::new().with_table("shop", "orders", true, 10);
            for index in 0..non_transactional {
                discovery = discovery.with_table("shop", &format!("log_{index}"), false, 10);
            }

            let mut config = dump_config(dir.path(), 2);
            config.less_locking = less_locking;

            let summary = test_run(&server, config, discovery, &executor)
                .run()
                .await
                .unwrap();

            assert_eq!(
                main_count(&server, "UNLOCK TABLES"),
                1,
                "less_locking={less_locking}, non_transactional={non_transactional}"
            );
            assert_eq!(summary.dispatch.non_transactional_tables, non_transactional);
            assert_eq!(executor.executed().len(), non_transactional + 2);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn less_locking_copies_non_transactional_tables_on_the_pre_pass() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 2);
    config.less_locking = true;

    let summary = test_run(&server, config, shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.dispatch.less_locking_batches, 2);

    // Sessions open in order: main, two pre-pass workers, two main workers.
    let pre_pass_sessions = [2, 3];
    let main_sessions = [4, 5];
    for (session, job) in executor.executed_by() {
        match job.as_str() {
            "table shop.log" | "table shop.audit" => assert!(pre_pass_sessions.contains(&session)),
            "table shop.orders" | "table shop.customers" => {
                assert!(main_sessions.contains(&session))
            }
            _ => {}
        }
    }

    let batch_locks = server.matching("LOCK TABLE `shop`.");
    assert_eq!(batch_locks.len(), 2);
    for session in pre_pass_sessions {
        let statements = server.statements_of(session);
        assert!(!statements.iter().any(|statement| statement.starts_with("START TRANSACTION")));
    }
    for session in main_sessions {
        assert!(server.statements_of(session)[0].starts_with("START TRANSACTION"));
    }

    let unlock = main_position(&server, "UNLOCK TABLES");
    assert!(read_position(&server, "log") < unlock);
    assert!(read_position(&server, "audit") < unlock);
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn checksums_precede_their_table() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 1);
    config.dump_checksums = true;
    let discovery = StaticDiscovery::new()
        .with_table("shop", "orders", true, 10)
        .with_table("shop", "log", false, 10);

    test_run(&server, config, discovery, &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(
        executor.executed(),
        vec![
            "schema shop",
            "checksum shop.log",
            "table shop.log",
            "checksum shop.orders",
            "table shop.orders",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn distributed_servers_bind_the_token_on_every_session() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.respond_version(
        "TiDB Server (Apache License 2.0) Community Edition, MySQL 5.7 compatible",
        "5.7.25-TiDB-v7.5.1",
    );
    server.respond(
        "SHOW MASTER STATUS",
        QueryResult::from_rows(
            &["File", "Position", "Binlog_Do_DB", "Binlog_Ignore_DB", "Executed_Gtid_Set"],
            [[Some("tidb-binlog"), Some("446120998232981505"), Some(""), Some(""), Some("")]],
        ),
    );
    let executor = RecordingExecutor::new();

    let summary = test_run(&server, dump_config(dir.path(), 3), shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    let bind = "SET SESSION tidb_snapshot = '446120998232981505'";
    assert_eq!(summary.lock_mode, LockMode::None);
    assert_eq!(server.count_of(bind), 4);
    assert_eq!(server.count_of("FLUSH TABLES WITH READ LOCK"), 0);
    for session in 2..=4 {
        let statements = server.statements_of(session);
        assert_eq!(statements[0], bind);
        assert!(!statements.iter().any(|statement| statement.starts_with("START TRANSACTION")));
    }

    let journal = fs::read_to_string(dir.path().join(JOURNAL_FILE_NAME)).unwrap();
    assert!(!journal.contains("SHOW MASTER STATUS:"));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_tables_are_listed_before_locking() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.respond(
        "SELECT TABLE_SCHEMA, TABLE_NAME",
        QueryResult::from_rows(
            &["TABLE_SCHEMA", "TABLE_NAME"],
            [[Some("shop"), Some("archive")]],
        ),
    );
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 1);
    config.updated_since_days = Some(30);

    test_run(&server, config, shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join(NOT_UPDATED_TABLES_FILE_NAME)).unwrap(),
        "shop.archive\n"
    );
    assert!(
        server.position_of("SELECT TABLE_SCHEMA, TABLE_NAME").unwrap()
            < server.position_of("SHOW PROCESSLIST").unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn disk_monitor_runs_alongside_the_dump() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 2);
    config.disk_limits = Some(DiskLimitsConfig::new(1, 2));

    let summary = test_run(&server, config, shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.error_count, 0);
    assert!(dir.path().join(JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_jobs_are_counted_and_the_run_completes() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    executor.fail_on("table shop.orders");
    executor.fail_on("view shop.recent_orders");

    let summary = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.error_count, 2);
    assert!(dir.path().join(JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_startup_failure_is_fatal_and_keeps_the_partial_journal() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.fail_connections_after(1);
    let executor = RecordingExecutor::new();

    let err = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WorkerStartupFailed);
    assert!(dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
    assert!(!dir.path().join(JOURNAL_FILE_NAME).exists());
    assert!(executor.executed().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_failure_stops_the_run() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let discovery = shop_discovery().failing("information_schema is unreadable");

    let err = test_run(&server, dump_config(dir.path(), 2), discovery, &executor)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DiscoveryFailed);
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    assert!(!dir.path().join(JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_server_is_fatal() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.respond_version("Some Other Database", "1.0.0");
    let executor = RecordingExecutor::new();

    let err = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerTypeUndetectable);
    assert!(!dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
}
