use std::path::Path;

use config::shared::DumpConfig;
use dump::run::DumpRun;
use dump::test_utils::discovery::StaticDiscovery;
use dump::test_utils::executor::RecordingExecutor;
use dump::test_utils::server::{MockConnector, MockServer};

pub type TestRun = DumpRun<MockConnector, StaticDiscovery, RecordingExecutor>;

/// Id of the first session opened by a run.
pub const MAIN_CONNECTION: usize = 1;

pub const BINLOG_FILE: &str = "binlog.000042";
pub const BINLOG_POSITION: &str = "157";

pub fn mysql_server() -> MockServer {
    let server = MockServer::new();
    server.respond_version("MySQL Community Server - GPL", "8.0.36");
    server.respond_primary_status(BINLOG_FILE, BINLOG_POSITION);
    server
}

pub fn dump_config(output_directory: &Path, threads: u16) -> DumpConfig {
    let mut config = DumpConfig::new(output_directory);
    config.threads = threads;
    config
}

/// Two InnoDB tables, two MyISAM tables, a view and the routines of `shop`.
pub fn shop_discovery() -> StaticDiscovery {
    StaticDiscovery::new()
        .with_table("shop", "orders", true, 100)
        .with_table("shop", "log", false, 30)
        .with_table("shop", "customers", true, 50)
        .with_table("shop", "audit", false, 20)
        .with_view("shop", "recent_orders")
        .with_post_schema("shop")
}

pub fn test_run(
    server: &MockServer,
    config: DumpConfig,
    discovery: StaticDiscovery,
    executor: &RecordingExecutor,
) -> TestRun {
    DumpRun::new(config, server.connector(), discovery, executor.clone())
}

/// Statements equal to `statement` issued on the main session.
pub fn main_count(server: &MockServer, statement: &str) -> usize {
    server
        .statements_of(MAIN_CONNECTION)
        .iter()
        .filter(|issued| issued.as_str() == statement)
        .count()
}

/// Position in the server log of the read of `table`.
pub fn read_position(server: &MockServer, table: &str) -> usize {
    server
        .position_of(&format!("SELECT /*!40001 SQL_NO_CACHE */ * FROM `shop`.`{table}`"))
        .unwrap_or_else(|| panic!("table {table} was never read"))
}

pub fn sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values
}

/// Position in the server log of the first `statement` issued on the main session.
pub fn main_position(server: &MockServer, statement: &str) -> usize {
    server
        .log()
        .iter()
        .position(|(session, issued)| *session == MAIN_CONNECTION && issued == statement)
        .unwrap_or_else(|| panic!("`{statement}` was never issued on the main session"))
}
