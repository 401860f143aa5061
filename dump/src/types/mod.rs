//! Passive records describing dumped objects and captured replication coordinates.

mod replication;
mod table;

pub use replication::{PrimaryStatus, ReplicaStatus, ReplicationSnapshotInfo};
pub use table::{DatabaseDescriptor, QualifiedTableName, TableDescriptor};
