//! Worked orchestration routines built on the pipeline engine.
//!
//! Each routine gathers its facts up front (catalog queries, topology
//! prechecks), then assembles a deterministic pipeline. A failed fact query
//! aborts construction before any remote side effect.

mod add_slave;
mod migrate;
mod rollback;

pub use add_slave::{build_add_slave_pipeline, precheck_add_slave, AddSlaveParams};
pub use migrate::{build_migrate_pipeline, MigrateCluster, MigrateParams, ShardPair};
pub use rollback::{build_rollback_pipeline, RollbackParams, RollbackSource};

/// Component references the flow routines dispatch through.
///
/// Resolved against a [`crate::component::ComponentRegistry`] at submission.
pub mod components {
    /// Delivers installation media to target hosts.
    pub const TRANSFER_FILES: &str = "transfer-files";
    /// Runs an actuator script on target hosts.
    pub const REMOTE_SCRIPT: &str = "remote-script";
    /// Downloads full-backup files from the backup system.
    pub const BACKUP_DOWNLOADER: &str = "backup-downloader";
    /// Downloads binlog files from the backup system.
    pub const BINLOG_DOWNLOADER: &str = "binlog-downloader";
    /// Restores a downloaded backup onto an instance.
    pub const RESTORE_TOOL: &str = "restore-tool";
    /// Replays binlog up to a target instant.
    pub const BINLOG_REPLAYER: &str = "binlog-replayer";
    /// Applies cluster metadata mutations.
    pub const META_STORE: &str = "meta-store";
    /// Establishes replication from a running instance to a new one.
    pub const DATA_SYNC: &str = "data-sync";
}
