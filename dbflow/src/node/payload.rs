//! Typed activity payloads.
//!
//! One explicit record per activity kind instead of a free-form map, so
//! missing fields surface at construction time. Payload fields whose values
//! are *context variable names* (the `*_var` fields) declare the node's
//! execution-time reads; the parallel-group validator analyzes exactly these.

use crate::topology::ClusterType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The input payload of an activity node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActPayload {
    /// Transfer installation media or tooling to target hosts.
    TransferFiles {
        /// Cloud/network zone of the targets.
        cloud_id: u64,
        /// Hosts receiving the files.
        exec_ips: Vec<String>,
        /// Files to deliver.
        file_list: Vec<String>,
    },

    /// Run an actuator script on target hosts.
    RemoteScript {
        /// Cloud/network zone of the targets.
        cloud_id: u64,
        /// Hosts the script runs on.
        exec_ips: Vec<String>,
        /// Cluster type, when the script is type-specific.
        cluster_type: Option<ClusterType>,
        /// Which script payload to build on the agent side.
        script: String,
        /// Context variables handed to the script as inputs.
        input_vars: Vec<String>,
    },

    /// Download a full-backup manifest from the backup system.
    DownloadBackup {
        /// Cloud/network zone of the destination.
        cloud_id: u64,
        /// Backup-system task ids of the files.
        task_ids: Vec<String>,
        /// Destination host.
        dest_ip: String,
        /// Destination directory.
        dest_dir: String,
        /// Audit reason recorded with the download.
        reason: String,
    },

    /// Download binlog files resolved from a context-bound manifest.
    DownloadBinlog {
        /// Cloud/network zone of the destination.
        cloud_id: u64,
        /// Context variable holding the binlog manifest.
        manifest_var: String,
        /// Destination host.
        dest_ip: String,
        /// Destination directory.
        dest_dir: String,
    },

    /// Restore data from a downloaded backup.
    RestoreData {
        /// Host performing the restore.
        exec_ip: String,
        /// Context variable holding the backup manifest.
        manifest_var: String,
        /// Context variable holding the binlog file list.
        binlogs_var: String,
    },

    /// Replay binlog up to a target instant.
    ReplayBinlog {
        /// Host performing the replay.
        exec_ip: String,
        /// Context variable holding the binlog file list.
        binlogs_var: String,
        /// Replay stop point.
        target_time: DateTime<Utc>,
    },

    /// Mutate cluster metadata after a phase completes.
    MetaMutation {
        /// The metadata operation, dispatched by the metadata component.
        op: String,
        /// The cluster being mutated.
        cluster_id: u64,
    },

    /// Sync data from a running instance to a new one.
    SyncData {
        /// Source `ip:port`.
        source: String,
        /// Target `ip:port`.
        target: String,
        /// Shard the pair belongs to, for sharded clusters.
        shard_id: Option<u32>,
    },
}

impl ActPayload {
    /// Returns the context variable names this payload reads at execution.
    #[must_use]
    pub fn reads(&self) -> Vec<String> {
        match self {
            Self::RemoteScript { input_vars, .. } => input_vars.clone(),
            Self::DownloadBinlog { manifest_var, .. } => vec![manifest_var.clone()],
            Self::RestoreData {
                manifest_var,
                binlogs_var,
                ..
            } => vec![manifest_var.clone(), binlogs_var.clone()],
            Self::ReplayBinlog { binlogs_var, .. } => vec![binlogs_var.clone()],
            Self::TransferFiles { .. }
            | Self::DownloadBackup { .. }
            | Self::MetaMutation { .. }
            | Self::SyncData { .. } => Vec::new(),
        }
    }

    /// Returns a short label for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransferFiles { .. } => "transfer-files",
            Self::RemoteScript { .. } => "remote-script",
            Self::DownloadBackup { .. } => "download-backup",
            Self::DownloadBinlog { .. } => "download-binlog",
            Self::RestoreData { .. } => "restore-data",
            Self::ReplayBinlog { .. } => "replay-binlog",
            Self::MetaMutation { .. } => "meta-mutation",
            Self::SyncData { .. } => "sync-data",
        }
    }
}
