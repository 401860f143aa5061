use tracing::{debug, warn};

use crate::client::{DumpConnection, QueryResult, ServerError};
use crate::types::{PrimaryStatus, ReplicaStatus, ReplicationSnapshotInfo};

/// Reads the primary and replica coordinates of the server.
///
/// Must run on the main connection while the dump lock is held. A server that is not writing a
/// binary log, or whose primary status cannot be read, has no primary block. Replica blocks are
/// only kept when they name a source host.
pub async fn read_replication_snapshot<C>(connection: &mut C) -> ReplicationSnapshotInfo
where
    C: DumpConnection,
{
    let primary = match read_primary_status(connection).await {
        Ok(primary) => primary,
        Err(err) => {
            warn!(error = %err, "could not read the primary status");
            None
        }
    };

    let multi_source = matches!(
        connection.query("SELECT @@default_master_connection").await,
        Ok(result) if !result.is_empty()
    );

    let statement = if multi_source {
        "SHOW ALL SLAVES STATUS"
    } else {
        "SHOW SLAVE STATUS"
    };

    let replicas = match connection.query(statement).await {
        Ok(result) => replica_statuses(&result, multi_source),
        Err(err) => {
            warn!(statement, error = %err, "could not read replica status");
            Vec::new()
        }
    };

    if replicas.len() > 1 {
        warn!(
            replicas = replicas.len(),
            "several replication sources found, replica positions are only accurate per source"
        );
    }

    ReplicationSnapshotInfo {
        primary,
        replicas,
        multi_source,
    }
}

async fn read_primary_status<C>(connection: &mut C) -> Result<Option<PrimaryStatus>, ServerError>
where
    C: DumpConnection,
{
    let result = connection.query("SHOW MASTER STATUS").await?;

    let (Some(log_file), Some(position)) = (result.cell(0, 0), result.cell(0, 1)) else {
        debug!("binary log disabled, no primary status");
        return Ok(None);
    };

    let gtid = match result.cell(0, 4) {
        Some(gtid) => Some(gtid.to_owned()),
        None => match connection.query("SELECT @@gtid_binlog_pos").await {
            Ok(gtid) => gtid.cell(0, 0).map(str::to_owned),
            Err(err) => {
                debug!(error = %err, "no binlog gtid position");
                None
            }
        },
    };

    Ok(Some(PrimaryStatus {
        log_file: log_file.to_owned(),
        position: position.to_owned(),
        gtid,
    }))
}

fn replica_statuses(result: &QueryResult, multi_source: bool) -> Vec<ReplicaStatus> {
    let gtid_column = result
        .column_index("Executed_Gtid_Set")
        .or_else(|| result.column_index("Gtid_Slave_Pos"));

    (0..result.rows.len())
        .filter_map(|row| {
            let host = result.value(row, "Master_Host")?;

            Some(ReplicaStatus {
                connection_name: multi_source
                    .then(|| result.value(row, "Connection_name").map(str::to_owned))
                    .flatten(),
                host: host.to_owned(),
                log_file: result
                    .value(row, "Relay_Master_Log_File")
                    .unwrap_or_default()
                    .to_owned(),
                position: result
                    .value(row, "Exec_Master_Log_Pos")
                    .unwrap_or_default()
                    .to_owned(),
                gtid: gtid_column
                    .and_then(|column| result.cell(row, column))
                    .map(str::to_owned),
            })
        })
        .collect()
}
