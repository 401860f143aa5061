//! Point-in-time read view shared by the main connection and every main-pass worker.

use tracing::{info, warn};

use crate::client::DumpConnection;
use crate::error::{DumpResult, ErrorKind};
use crate::server::{CONSISTENT_SNAPSHOT_MIN_VERSION, ServerInfo, ServerKind};
use crate::{bail, dump_error};

const START_CONSISTENT_SNAPSHOT: &str = "START TRANSACTION /*!40108 WITH CONSISTENT SNAPSHOT */";

/// Dummy table read right after the transaction starts on servers predating consistent snapshots.
const LEGACY_DUMMY_TABLE: DummyTable = DummyTable {
    name: "mysql.mydumperdummy",
    engine: "INNODB",
};

/// Dummy table read on servers running TokuDB, which ignores consistent snapshot requests.
const TOKUDB_DUMMY_TABLE: DummyTable = DummyTable {
    name: "mysql.tokudbdummy",
    engine: "TokuDB",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DummyTable {
    name: &'static str,
    engine: &'static str,
}

impl DummyTable {
    fn create_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (a INT) ENGINE={}",
            self.name, self.engine
        )
    }

    fn read_statement(&self) -> String {
        format!("SELECT /*!40001 SQL_NO_CACHE */ * FROM {}", self.name)
    }
}

/// How sessions join the run's snapshot.
///
/// Built once on the main connection by [`SnapshotPlan::establish`] and replayed on every
/// main-pass worker connection by [`SnapshotPlan::bind_worker`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotPlan {
    /// Distributed snapshot token bound on every session.
    token: Option<String>,
    dummy_tables: Vec<DummyTable>,
}

impl SnapshotPlan {
    /// Fixes the snapshot on the main connection.
    ///
    /// `configured_token` is used on distributed servers when present; otherwise the token is read
    /// from the current log position. `holds_table_locks` skips the main connection's transaction,
    /// since starting one silently drops `LOCK TABLE` locks.
    pub async fn establish<C>(
        connection: &mut C,
        server: &ServerInfo,
        configured_token: Option<&str>,
        holds_table_locks: bool,
    ) -> DumpResult<Self>
    where
        C: DumpConnection,
    {
        let token = match server.kind {
            ServerKind::TiDb => {
                let token = match configured_token {
                    Some(token) => token.to_owned(),
                    None => derive_token(connection).await?,
                };
                bind_token(connection, &token).await?;

                Some(token)
            }
            ServerKind::MySql | ServerKind::Drizzle => None,
        };

        let mut dummy_tables = Vec::new();

        if server.numeric_version < CONSISTENT_SNAPSHOT_MIN_VERSION {
            info!(
                version = server.numeric_version,
                "server predates consistent snapshots, using a dummy table read"
            );
            dummy_tables.push(LEGACY_DUMMY_TABLE);
        }

        let tokudb = connection.query("SELECT @@tokudb_version").await;
        if matches!(tokudb, Ok(result) if !result.is_empty()) {
            info!("TokuDB detected, using a dummy table read");
            dummy_tables.push(TOKUDB_DUMMY_TABLE);
        }

        for dummy in &dummy_tables {
            if let Err(err) = connection.execute(&dummy.create_statement()).await {
                warn!(table = dummy.name, error = %err, "could not create dummy table");
            }
        }

        let plan = Self {
            token,
            dummy_tables,
        };

        if !holds_table_locks {
            start_transaction(connection).await?;
        }
        plan.read_dummies(connection).await;

        Ok(plan)
    }

    /// Joins a worker session to the snapshot.
    pub async fn bind_worker<C>(&self, connection: &mut C) -> DumpResult<()>
    where
        C: DumpConnection,
    {
        match &self.token {
            Some(token) => bind_token(connection, token).await?,
            None => start_transaction(connection).await?,
        }

        self.read_dummies(connection).await;

        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn uses_dummy_reads(&self) -> bool {
        !self.dummy_tables.is_empty()
    }

    async fn read_dummies<C>(&self, connection: &mut C)
    where
        C: DumpConnection,
    {
        for dummy in &self.dummy_tables {
            if let Err(err) = connection.query(&dummy.read_statement()).await {
                warn!(table = dummy.name, error = %err, "dummy table read failed");
            }
        }
    }
}

async fn start_transaction<C>(connection: &mut C) -> DumpResult<()>
where
    C: DumpConnection,
{
    connection
        .execute(START_CONSISTENT_SNAPSHOT)
        .await
        .map_err(|err| {
            dump_error!(
                ErrorKind::SnapshotFailed,
                "Could not start the consistent snapshot transaction",
                err.to_string(),
                source: err
            )
        })
}

/// Reads the current log position, which distributed servers accept as a snapshot token.
async fn derive_token<C>(connection: &mut C) -> DumpResult<String>
where
    C: DumpConnection,
{
    let result = connection.query("SHOW MASTER STATUS").await.map_err(|err| {
        dump_error!(
            ErrorKind::SnapshotTokenFailed,
            "Could not derive the snapshot token",
            err.to_string(),
            source: err
        )
    })?;

    let Some(position) = result.value(0, "Position").or_else(|| result.cell(0, 1)) else {
        bail!(
            ErrorKind::SnapshotTokenFailed,
            "Could not derive the snapshot token",
            "SHOW MASTER STATUS returned no position"
        );
    };

    Ok(position.to_owned())
}

async fn bind_token<C>(connection: &mut C, token: &str) -> DumpResult<()>
where
    C: DumpConnection,
{
    let statement = format!("SET SESSION tidb_snapshot = '{}'", token.replace('\'', "''"));

    connection.execute(&statement).await.map_err(|err| {
        dump_error!(
            ErrorKind::SnapshotTokenFailed,
            "Could not bind the snapshot token",
            err.to_string(),
            source: err
        )
    })?;

    info!(token, "session bound to snapshot token");

    Ok(())
}
