use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::client::DumpConnection;
use crate::dump_error;
use crate::error::{DumpResult, ErrorKind};
use crate::types::QualifiedTableName;

/// File listing the tables not updated within the configured window.
pub const NOT_UPDATED_TABLES_FILE_NAME: &str = "not_updated_tables";

fn not_updated_query(days: u32) -> String {
    format!(
        "SELECT TABLE_SCHEMA, TABLE_NAME FROM information_schema.TABLES \
         WHERE TABLE_TYPE = 'BASE TABLE' AND UPDATE_TIME < NOW() - INTERVAL {days} DAY"
    )
}

/// Lists base tables whose last update is older than `days` days and writes them, one
/// `db.table` per line, to `<output_directory>/not_updated_tables`.
///
/// Not being able to create the file is fatal. A failed query leaves the list empty.
pub async fn collect_not_updated_tables<C>(
    connection: &mut C,
    days: u32,
    output_directory: &Path,
) -> DumpResult<Vec<QualifiedTableName>>
where
    C: DumpConnection,
{
    let path = output_directory.join(NOT_UPDATED_TABLES_FILE_NAME);
    let mut file = File::create(&path).await.map_err(|err| {
        dump_error!(
            ErrorKind::OutputFileFailed,
            "Could not create the not updated tables file",
            format!("{}: {err}", path.display()),
            source: err
        )
    })?;

    let tables: Vec<QualifiedTableName> = match connection.query(&not_updated_query(days)).await {
        Ok(result) => (0..result.rows.len())
            .filter_map(|row| Some((result.cell(row, 0)?, result.cell(row, 1)?)))
            .map(|(database, table)| QualifiedTableName::new(database, table))
            .collect(),
        Err(err) => {
            warn!(error = %err, "could not list tables not updated recently");
            Vec::new()
        }
    };

    let mut contents = String::new();
    for table in &tables {
        contents.push_str(&table.to_string());
        contents.push('\n');
    }

    let write_error = |err: std::io::Error| {
        dump_error!(
            ErrorKind::OutputFileFailed,
            "Could not write the not updated tables file",
            err.to_string(),
            source: err
        )
    };
    file.write_all(contents.as_bytes())
        .await
        .map_err(write_error)?;
    file.flush().await.map_err(write_error)?;

    info!(tables = tables.len(), days, "tables not updated recently listed");

    Ok(tables)
}
