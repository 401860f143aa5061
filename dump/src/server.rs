use std::fmt;

use tracing::info;

use crate::bail;
use crate::client::DumpConnection;
use crate::error::{DumpResult, ErrorKind};

/// Family of the dumped server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// MySQL and its forks (Percona Server, MariaDB).
    MySql,
    Drizzle,
    /// Distributed server pinned through a snapshot token instead of locks.
    TiDb,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::MySql => f.write_str("MySQL"),
            ServerKind::Drizzle => f.write_str("Drizzle"),
            ServerKind::TiDb => f.write_str("TiDB"),
        }
    }
}

/// Server identity read from the main connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub kind: ServerKind,
    pub version_comment: String,
    pub version: String,
    /// `major * 10000 + minor * 100 + patch`, `5.7.23-log` reads as `50723`.
    pub numeric_version: u32,
}

impl ServerInfo {
    /// Whether the server is Percona Server 8, which dropped `LOCK BINLOG FOR BACKUP`.
    pub fn is_percona_8(&self) -> bool {
        self.version_comment.starts_with("Percona") && self.version.starts_with("8.")
    }
}

/// Version below which `START TRANSACTION WITH CONSISTENT SNAPSHOT` is not supported.
pub const CONSISTENT_SNAPSHOT_MIN_VERSION: u32 = 40108;

/// Identifies the server behind `connection` and prepares the session for dumping.
///
/// Fails when the server family or its version cannot be determined.
pub async fn detect_server<C>(connection: &mut C) -> DumpResult<ServerInfo>
where
    C: DumpConnection,
{
    let result = connection
        .query("SELECT @@version_comment, @@version")
        .await
        .map_err(|err| {
            crate::dump_error!(
                ErrorKind::ServerVersionUnreadable,
                "Could not read the server version",
                err.to_string(),
                source: err
            )
        })?;

    let (Some(version_comment), Some(version)) = (result.cell(0, 0), result.cell(0, 1)) else {
        bail!(
            ErrorKind::ServerVersionUnreadable,
            "Could not read the server version",
            "the version query returned no row"
        );
    };

    let Some(kind) = classify_server(version_comment, version) else {
        bail!(
            ErrorKind::ServerTypeUndetectable,
            "Cannot detect server type",
            format!("version comment `{version_comment}`, version `{version}`")
        );
    };

    let Some(numeric_version) = parse_numeric_version(version) else {
        bail!(
            ErrorKind::ServerVersionUnreadable,
            "Could not parse the server version",
            version.to_owned()
        );
    };

    let info = ServerInfo {
        kind,
        version_comment: version_comment.to_owned(),
        version: version.to_owned(),
        numeric_version,
    };

    info!(server = %kind, version = %info.version, "connected to server");

    if kind == ServerKind::MySql {
        connection
            .execute("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .await?;
    }

    Ok(info)
}

fn classify_server(version_comment: &str, version: &str) -> Option<ServerKind> {
    if version.contains("TiDB") || version_comment.contains("TiDB") {
        return Some(ServerKind::TiDb);
    }

    if version_comment.contains("Drizzle") {
        return Some(ServerKind::Drizzle);
    }

    let comment = version_comment.to_ascii_lowercase();
    let is_mysql_family = ["mysql", "percona", "mariadb", "source distribution"]
        .iter()
        .any(|marker| comment.contains(marker))
        || version.to_ascii_lowercase().contains("mariadb");

    is_mysql_family.then_some(ServerKind::MySql)
}

/// Parses the leading `major.minor.patch` of a version string.
pub fn parse_numeric_version(version: &str) -> Option<u32> {
    let mut parts = version.split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u32>().ok()
    });

    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);

    Some(major * 10_000 + minor * 100 + patch)
}
