use std::time::Duration;

use config::shared::LongQueryGuardConfig;
use tracing::{info, warn};

use crate::bail;
use crate::client::DumpConnection;
use crate::concurrency::shutdown::{ShutdownRx, cancelled, is_cancelled};
use crate::error::{DumpResult, ErrorKind};

/// Pre-check refusing to lock while long running queries could be blocked by the lock.
#[derive(Debug)]
pub struct LongQueryGuard<'a> {
    config: &'a LongQueryGuardConfig,
}

impl<'a> LongQueryGuard<'a> {
    pub fn new(config: &'a LongQueryGuardConfig) -> Self {
        Self { config }
    }

    /// Waits until no query runs longer than the threshold.
    ///
    /// Long queries are killed when enabled, otherwise they block. Blockers left once the retries
    /// are exhausted abort the run. A server that refuses `SHOW PROCESSLIST` leaves the guard
    /// disabled.
    pub async fn check<C>(&self, connection: &mut C, shutdown_rx: &mut ShutdownRx) -> DumpResult<()>
    where
        C: DumpConnection,
    {
        let mut retries_left = self.config.retries;

        loop {
            let blockers = match self.count_blockers(connection).await? {
                Some(blockers) => blockers,
                None => return Ok(()),
            };

            if blockers == 0 {
                return Ok(());
            }

            if retries_left == 0 {
                bail!(
                    ErrorKind::LongQueryBlocked,
                    "Queries running longer than the long query guard block the dump",
                    format!(
                        "{blockers} queries running longer than {}s, kill them or raise the threshold",
                        self.config.threshold_secs
                    )
                );
            }

            retries_left -= 1;
            warn!(
                blockers,
                threshold_secs = self.config.threshold_secs,
                retry_in_secs = self.config.retry_interval_secs,
                retries_left,
                "long running queries found, retrying"
            );

            if is_cancelled(shutdown_rx) {
                bail!(ErrorKind::OperationCanceled, "Long query guard cancelled");
            }

            tokio::select! {
                biased;

                _ = cancelled(shutdown_rx) => {
                    bail!(ErrorKind::OperationCanceled, "Long query guard cancelled");
                }
                _ = tokio::time::sleep(Duration::from_secs(self.config.retry_interval_secs)) => {}
            }
        }
    }

    /// Returns the number of blocking queries, or `None` when the process list is unavailable.
    async fn count_blockers<C>(&self, connection: &mut C) -> DumpResult<Option<usize>>
    where
        C: DumpConnection,
    {
        let processes = match connection.query("SHOW PROCESSLIST").await {
            Ok(processes) => processes,
            Err(err) => {
                warn!(error = %err, "could not check the process list, long query guard disabled");
                return Ok(None);
            }
        };

        let (Some(id_column), Some(command_column), Some(time_column)) = (
            processes.column_index("Id"),
            processes.column_index("Command"),
            processes.column_index("Time"),
        ) else {
            bail!(
                ErrorKind::ProcessListUnreadable,
                "Could not read the process list",
                format!("columns: {}", processes.columns.join(", "))
            );
        };
        let user_column = processes.column_index("User");

        let mut blockers = 0;
        for row in 0..processes.rows.len() {
            if processes
                .cell(row, command_column)
                .is_some_and(|command| command != "Query")
            {
                continue;
            }

            if user_column
                .and_then(|column| processes.cell(row, column))
                .is_some_and(|user| user == "system user")
            {
                continue;
            }

            let time: u64 = processes
                .cell(row, time_column)
                .and_then(|time| time.trim().parse().ok())
                .unwrap_or(0);
            if time <= self.config.threshold_secs {
                continue;
            }

            let id = processes.cell(row, id_column).unwrap_or_default();
            if !self.config.kill_long_queries {
                blockers += 1;
                continue;
            }

            match connection.execute(&format!("KILL {id}")).await {
                Ok(()) => info!(id, time, "killed a long running query"),
                Err(err) => {
                    warn!(id, error = %err, "could not kill a long running query");
                    blockers += 1;
                }
            }
        }

        Ok(Some(blockers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{QueryResult, ServerError};
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::test_utils::server::MockServer;

    fn processlist(rows: Vec<[Option<&'static str>; 5]>) -> QueryResult {
        QueryResult::from_rows(&["Id", "User", "Host", "Command", "Time"], rows)
    }

    fn guard_config(retries: u32, kill_long_queries: bool) -> LongQueryGuardConfig {
        LongQueryGuardConfig {
            threshold_secs: 60,
            retries,
            retry_interval_secs: 1,
            kill_long_queries,
        }
    }

    const LONG_QUERY: [Option<&str>; 5] = [
        Some("12"),
        Some("app"),
        Some("10.0.0.2"),
        Some("Query"),
        Some("3600"),
    ];

    #[tokio::test]
    async fn idle_and_system_sessions_are_ignored() {
        let server = MockServer::new();
        server.respond(
            "SHOW PROCESSLIST",
            processlist(vec![
                [Some("1"), Some("app"), None, Some("Sleep"), Some("9000")],
                [Some("2"), Some("system user"), None, Some("Query"), Some("9000")],
                [Some("3"), Some("app"), None, Some("Query"), Some("60")],
            ]),
        );
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(0, false);
        LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blockers_without_retries_are_fatal() {
        let server = MockServer::new();
        server.respond("SHOW PROCESSLIST", processlist(vec![LONG_QUERY]));
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(0, false);
        let err = LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LongQueryBlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn blockers_are_retried_until_they_finish() {
        let server = MockServer::new();
        server.respond_sequence(
            "SHOW PROCESSLIST",
            vec![
                processlist(vec![LONG_QUERY]),
                processlist(vec![LONG_QUERY]),
                processlist(Vec::new()),
            ],
        );
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(2, false);
        LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap();

        assert_eq!(server.count_of("SHOW PROCESSLIST"), 3);
    }

    #[tokio::test]
    async fn long_queries_are_killed_when_enabled() {
        let server = MockServer::new();
        server.respond("SHOW PROCESSLIST", processlist(vec![LONG_QUERY]));
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(0, true);
        LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap();

        assert_eq!(server.count_of("KILL 12"), 1);
    }

    #[tokio::test]
    async fn failed_kill_counts_as_blocker() {
        let server = MockServer::new();
        server.respond("SHOW PROCESSLIST", processlist(vec![LONG_QUERY]));
        server.fail("KILL", ServerError::new(1094, "Unknown thread id: 12"));
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(0, true);
        let err = LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LongQueryBlocked);
    }

    #[tokio::test]
    async fn unavailable_process_list_disables_the_guard() {
        let server = MockServer::new();
        server.fail("SHOW PROCESSLIST", ServerError::new(1227, "Access denied"));
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(0, false);
        LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_columns_are_fatal() {
        let server = MockServer::new();
        server.respond(
            "SHOW PROCESSLIST",
            QueryResult::from_rows(&["Id", "Info"], [[Some("1"), None]]),
        );
        let mut connection = server.connection();
        let (_tx, mut shutdown_rx) = create_shutdown_channel();

        let config = guard_config(0, false);
        let err = LongQueryGuard::new(&config)
            .check(&mut connection, &mut shutdown_rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProcessListUnreadable);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_retry_sleep() {
        let server = MockServer::new();
        server.respond("SHOW PROCESSLIST", processlist(vec![LONG_QUERY]));
        let mut connection = server.connection();
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let mut config = guard_config(5, false);
        config.retry_interval_secs = 3600;

        let check = async {
            LongQueryGuard::new(&config)
                .check(&mut connection, &mut shutdown_rx)
                .await
        };
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown_tx.shutdown();
        };

        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(check, cancel)
        })
        .await
        .unwrap();

        assert_eq!(result.unwrap_err().kind(), ErrorKind::OperationCanceled);
    }
}
