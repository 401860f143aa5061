use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::{Connector, DumpConnection, QueryResult, ServerError};
use crate::server::{ServerInfo, ServerKind};

/// Columns returned by `SHOW PROCESSLIST` when no test scripted it.
const PROCESSLIST_COLUMNS: &[&str] = &[
    "Id", "User", "Host", "db", "Command", "Time", "State", "Info",
];

#[derive(Debug)]
struct Response {
    prefix: String,
    results: VecDeque<QueryResult>,
}

#[derive(Debug)]
struct Failure {
    prefix: String,
    error: ServerError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct ConnectionPolicy {
    fail_next: usize,
    succeed_before_failing: Option<usize>,
}

#[derive(Debug, Default)]
struct ServerState {
    next_connection_id: usize,
    connections_opened: usize,
    log: Vec<(usize, String)>,
    responses: Vec<Response>,
    failures: Vec<Failure>,
    connection_policy: ConnectionPolicy,
}

impl ServerState {
    /// Returns the scripted outcome of `statement`, newest script first.
    fn outcome(&mut self, statement: &str) -> Result<Option<QueryResult>, ServerError> {
        if let Some(failure) = self
            .failures
            .iter_mut()
            .rev()
            .find(|failure| statement.starts_with(&failure.prefix) && failure.remaining != Some(0))
        {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }

            return Err(failure.error.clone());
        }

        let Some(response) = self
            .responses
            .iter_mut()
            .rev()
            .find(|response| statement.starts_with(&response.prefix))
        else {
            return Ok(None);
        };

        let result = if response.results.len() > 1 {
            response.results.pop_front()
        } else {
            response.results.front().cloned()
        };

        Ok(result)
    }
}

/// Scripted server shared by every [`MockConnection`] it opens.
///
/// Statements are matched against scripts by prefix; later scripts win over earlier ones. Queries
/// without a script return an empty result, except `SHOW PROCESSLIST` which returns its columns
/// and no row.
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(ServerState::default())),
        };
        server.respond(
            "SHOW PROCESSLIST",
            QueryResult::new(
                PROCESSLIST_COLUMNS.iter().map(|column| column.to_string()).collect(),
                Vec::new(),
            ),
        );

        server
    }

    /// Answers the version query used to detect the server.
    pub fn respond_version(&self, version_comment: &'static str, version: &'static str) {
        self.respond(
            "SELECT @@version_comment, @@version",
            QueryResult::from_rows(
                &["@@version_comment", "@@version"],
                [[Some(version_comment), Some(version)]],
            ),
        );
    }

    /// Answers `SHOW MASTER STATUS` with a binary log position and no GTID column.
    pub fn respond_primary_status(&self, log_file: &'static str, position: &'static str) {
        self.respond(
            "SHOW MASTER STATUS",
            QueryResult::from_rows(
                &["File", "Position", "Binlog_Do_DB", "Binlog_Ignore_DB"],
                [[Some(log_file), Some(position), Some(""), Some("")]],
            ),
        );
    }

    /// Returns `result` for every query starting with `prefix`.
    pub fn respond(&self, prefix: &str, result: QueryResult) {
        self.respond_sequence(prefix, vec![result]);
    }

    /// Returns `results` in order for queries starting with `prefix`, repeating the last one.
    pub fn respond_sequence(&self, prefix: &str, results: Vec<QueryResult>) {
        self.lock().responses.push(Response {
            prefix: prefix.to_owned(),
            results: results.into(),
        });
    }

    /// Fails every statement starting with `prefix`.
    pub fn fail(&self, prefix: &str, error: ServerError) {
        self.lock().failures.push(Failure {
            prefix: prefix.to_owned(),
            error,
            remaining: None,
        });
    }

    /// Fails the next `times` statements starting with `prefix`.
    pub fn fail_times(&self, prefix: &str, error: ServerError, times: usize) {
        self.lock().failures.push(Failure {
            prefix: prefix.to_owned(),
            error,
            remaining: Some(times),
        });
    }

    /// Refuses the next `count` connection attempts.
    pub fn fail_connections(&self, count: usize) {
        self.lock().connection_policy.fail_next = count;
    }

    /// Accepts `count` more connections, then refuses every attempt.
    pub fn fail_connections_after(&self, count: usize) {
        let mut state = self.lock();
        let opened = state.connections_opened;
        state.connection_policy.succeed_before_failing = Some(opened + count);
    }

    /// Opens a session directly, bypassing connection failures.
    pub fn connection(&self) -> MockConnection {
        let mut state = self.lock();
        state.next_connection_id += 1;
        state.connections_opened += 1;

        MockConnection {
            id: state.next_connection_id,
            server: self.clone(),
        }
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            server: self.clone(),
        }
    }

    /// Every statement issued so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .map(|(_, statement)| statement.clone())
            .collect()
    }

    /// Every statement with the id of the session that issued it, in order.
    pub fn log(&self) -> Vec<(usize, String)> {
        self.lock().log.clone()
    }

    /// Statements issued by one session, in order.
    pub fn statements_of(&self, connection_id: usize) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(id, _)| *id == connection_id)
            .map(|(_, statement)| statement.clone())
            .collect()
    }

    /// Statements starting with `prefix`, in order.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(_, statement)| statement.starts_with(prefix))
            .map(|(_, statement)| statement.clone())
            .collect()
    }

    pub fn count_of(&self, prefix: &str) -> usize {
        self.matching(prefix).len()
    }

    /// Position of the first statement starting with `prefix` in the global log.
    pub fn position_of(&self, prefix: &str) -> Option<usize> {
        self.lock()
            .log
            .iter()
            .position(|(_, statement)| statement.starts_with(prefix))
    }

    fn try_connect(&self) -> Result<MockConnection, ServerError> {
        {
            let mut state = self.lock();
            if state.connection_policy.fail_next > 0 {
                state.connection_policy.fail_next -= 1;
                return Err(ServerError::new(2003, "Can't connect to MySQL server"));
            }

            if state
                .connection_policy
                .succeed_before_failing
                .is_some_and(|limit| state.connections_opened >= limit)
            {
                return Err(ServerError::new(1040, "Too many connections"));
            }
        }

        Ok(self.connection())
    }

    fn run(
        &self,
        connection_id: usize,
        statement: &str,
    ) -> Result<Option<QueryResult>, ServerError> {
        let mut state = self.lock();
        state.log.push((connection_id, statement.to_owned()));
        state.outcome(statement)
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Session on a [`MockServer`].
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    server: MockServer,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl DumpConnection for MockConnection {
    async fn execute(&mut self, statement: &str) -> Result<(), ServerError> {
        let outcome = self.server.run(self.id, statement);
        tokio::task::yield_now().await;

        outcome.map(|_| ())
    }

    async fn query(&mut self, statement: &str) -> Result<QueryResult, ServerError> {
        let outcome = self.server.run(self.id, statement);
        tokio::task::yield_now().await;

        outcome.map(Option::unwrap_or_default)
    }
}

/// Opens sessions on a [`MockServer`], honoring its connection failures.
#[derive(Debug, Clone)]
pub struct MockConnector {
    server: MockServer,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, ServerError> {
        self.server.try_connect()
    }
}

pub fn mysql_server_info() -> ServerInfo {
    ServerInfo {
        kind: ServerKind::MySql,
        version_comment: "MySQL Community Server - GPL".to_owned(),
        version: "8.0.36".to_owned(),
        numeric_version: 80036,
    }
}

pub fn tidb_server_info() -> ServerInfo {
    ServerInfo {
        kind: ServerKind::TiDb,
        version_comment: "TiDB Server (Apache License 2.0) Community Edition, MySQL 5.7 compatible"
            .to_owned(),
        version: "5.7.25-TiDB-v7.5.1".to_owned(),
        numeric_version: 50725,
    }
}
