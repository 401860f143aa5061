use std::fs;

use dump::client::{QueryResult, ServerError};
use dump::error::ErrorKind;
use dump::journal::{JOURNAL_FILE_NAME, PARTIAL_JOURNAL_FILE_NAME};
use dump::lock::LockMode;
use dump::test_utils::discovery::StaticDiscovery;
use dump::test_utils::executor::RecordingExecutor;
use dump::types::QualifiedTableName;
use telemetry::tracing::init_test_tracing;

use crate::common::*;

#[tokio::test(flavor = "multi_thread")]
async fn backup_locks_are_preferred_and_released_together() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.respond(
        "SELECT @@have_backup_locks",
        QueryResult::from_rows(&["@@have_backup_locks"], [[Some("YES")]]),
    );
    let executor = RecordingExecutor::new();

    let summary = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.lock_mode, LockMode::BackupLocks);
    assert_eq!(server.count_of("FLUSH TABLES WITH READ LOCK"), 0);
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    assert_eq!(main_count(&server, "UNLOCK BINLOG"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_global_lock_degrades_to_an_unlocked_dump() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.fail(
        "FLUSH TABLES WITH READ LOCK",
        ServerError::new(1227, "Access denied; you need the RELOAD privilege"),
    );
    let executor = RecordingExecutor::new();

    let summary = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.lock_mode, LockMode::None);
    assert_eq!(summary.error_count, 1);
    assert_eq!(server.count_of("UNLOCK TABLES"), 0);
    assert!(dir.path().join(JOURNAL_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_all_tables_skips_the_main_transaction() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.fail_times(
        "LOCK TABLE ",
        ServerError::new(1146, "Table 'shop.t2' doesn't exist")
            .with_table(QualifiedTableName::new("shop", "t2")),
        1,
    );
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 2);
    config.lock.lock_all_tables = true;
    let discovery = StaticDiscovery::new()
        .with_table("shop", "t1", true, 1)
        .with_table("shop", "t2", true, 1)
        .with_table("shop", "t3", true, 1);

    let summary = test_run(&server, config, discovery, &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary.lock_mode,
        LockMode::LockAllTables(vec![
            QualifiedTableName::new("shop", "t1"),
            QualifiedTableName::new("shop", "t3"),
        ])
    );
    assert!(
        !server
            .statements_of(MAIN_CONNECTION)
            .iter()
            .any(|statement| statement.starts_with("START TRANSACTION"))
    );
    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    // Workers still join the snapshot.
    assert_eq!(server.count_of("START TRANSACTION"), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn transactional_consistency_releases_before_discovery() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 2);
    config.trx_consistency_only = true;
    config.less_locking = true;

    let summary = test_run(&server, config, shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(main_count(&server, "UNLOCK TABLES"), 1);
    assert!(main_position(&server, "UNLOCK TABLES") < main_position(&server, "SHOW DATABASES"));
    // Reduced locking has nothing to gain once locks are released early.
    assert_eq!(summary.dispatch.less_locking_batches, 0);
    assert_eq!(server.count_of("LOCK TABLE "), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_locks_skip_the_guard_and_the_release() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 2);
    config.lock.no_locks = true;

    let summary = test_run(&server, config, shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.lock_mode, LockMode::None);
    assert_eq!(server.count_of("SHOW PROCESSLIST"), 0);
    assert_eq!(server.count_of("UNLOCK TABLES"), 0);
    assert_eq!(executor.executed().len(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn long_queries_block_the_run_before_locking() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.respond(
        "SHOW PROCESSLIST",
        QueryResult::from_rows(
            &["Id", "User", "Host", "db", "Command", "Time", "State", "Info"],
            [[
                Some("77"),
                Some("report"),
                Some("10.0.0.9:50122"),
                Some("shop"),
                Some("Query"),
                Some("3600"),
                Some("Sending data"),
                Some("SELECT * FROM orders"),
            ]],
        ),
    );
    let executor = RecordingExecutor::new();

    let err = test_run(&server, dump_config(dir.path(), 2), shop_discovery(), &executor)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LongQueryBlocked);
    assert_eq!(server.count_of("FLUSH TABLES WITH READ LOCK"), 0);
    assert!(dir.path().join(PARTIAL_JOURNAL_FILE_NAME).exists());
    assert_eq!(
        fs::read_to_string(dir.path().join(PARTIAL_JOURNAL_FILE_NAME)).unwrap(),
        ""
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn long_queries_are_killed_when_allowed() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let server = mysql_server();
    server.respond(
        "SHOW PROCESSLIST",
        QueryResult::from_rows(
            &["Id", "User", "Host", "db", "Command", "Time", "State", "Info"],
            [[
                Some("77"),
                Some("report"),
                Some("10.0.0.9:50122"),
                Some("shop"),
                Some("Query"),
                Some("3600"),
                Some("Sending data"),
                Some("SELECT * FROM orders"),
            ]],
        ),
    );
    let executor = RecordingExecutor::new();
    let mut config = dump_config(dir.path(), 2);
    config.lock.long_query.kill_long_queries = true;

    let summary = test_run(&server, config, shop_discovery(), &executor)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.lock_mode, LockMode::FlushWithReadLock);
    assert!(server.position_of("KILL 77").unwrap() < server.position_of("FLUSH TABLES").unwrap());
}
