/// Replication coordinates captured once while the dump lock is held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationSnapshotInfo {
    pub primary: Option<PrimaryStatus>,
    pub replicas: Vec<ReplicaStatus>,
    /// Whether the server replicates from several sources, in which case every replica block
    /// names its connection.
    pub multi_source: bool,
}

/// Binary log position of the dumped server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryStatus {
    pub log_file: String,
    pub position: String,
    pub gtid: Option<String>,
}

/// Position of the dumped server within one of its replication sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub connection_name: Option<String>,
    pub host: String,
    pub log_file: String,
    pub position: String,
    pub gtid: Option<String>,
}
