//! Point-in-time rollback: restore a cluster onto a temporary instance and
//! replay binlog to the target instant.

use super::components;
use crate::catalog::{select_restore_point, select_restore_point_by_id, BackupCatalog};
use crate::errors::FlowError;
use crate::node::{ActPayload, BackoffConfig, RetryPolicy};
use crate::pipeline::{Pipeline, PipelineBuilder, SubProcessBuilder};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Where the backup comes from and how it is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackSource {
    /// Latest remote backup at or before the target instant.
    RemoteAndTime,
    /// A named remote backup, replayed forward to the target instant.
    RemoteAndBackupId {
        /// The backup system's snapshot id.
        backup_id: String,
    },
    /// A named backup already present on the rollback host. Downloads are
    /// skipped; the catalog still supplies the manifest.
    LocalAndBackupId {
        /// The backup system's snapshot id.
        backup_id: String,
    },
}

/// Parameters for one rollback pipeline.
#[derive(Debug, Clone)]
pub struct RollbackParams {
    /// The cluster being rolled back.
    pub cluster_id: u64,
    /// Cloud/network zone of the hosts involved.
    pub cloud_id: u64,
    /// Instance whose binlogs drive the replay.
    pub master_ip: String,
    /// Port of that instance.
    pub master_port: u16,
    /// Host receiving the temporary rollback instance.
    pub rollback_ip: String,
    /// Directory backup and binlog files land in.
    pub backup_dir: String,
    /// Installation media for the rollback instance.
    pub pkg_files: Vec<String>,
    /// The instant the cluster is rolled back to.
    pub target_time: DateTime<Utc>,
    /// Backup selection mode.
    pub source: RollbackSource,
}

/// Builds a rollback pipeline from catalog facts.
///
/// Queries the backup catalog first; a missing backup or binlog gap fails
/// here, before the pipeline exists. The selected manifest and binlog list
/// are seeded into the context; the restore and replay activities read them
/// through their declared variables.
///
/// # Errors
///
/// Returns `Precondition` errors from catalog selection and `Build` errors
/// from pipeline assembly.
pub async fn build_rollback_pipeline(
    catalog: &dyn BackupCatalog,
    params: &RollbackParams,
) -> Result<Pipeline, FlowError> {
    let point = match &params.source {
        RollbackSource::RemoteAndTime => {
            select_restore_point(
                catalog,
                params.cluster_id,
                &params.master_ip,
                params.master_port,
                params.target_time,
            )
            .await?
        }
        RollbackSource::RemoteAndBackupId { backup_id }
        | RollbackSource::LocalAndBackupId { backup_id } => {
            select_restore_point_by_id(
                catalog,
                params.cluster_id,
                &params.master_ip,
                params.master_port,
                backup_id,
                params.target_time,
            )
            .await?
        }
    };
    let remote = !matches!(params.source, RollbackSource::LocalAndBackupId { .. });

    let binlog_names: Vec<&str> = point.binlogs.iter().map(|b| b.file_name.as_str()).collect();
    let mut seed = HashMap::new();
    seed.insert(
        "cluster_id".to_string(),
        serde_json::json!(params.cluster_id),
    );
    seed.insert(
        "target_time".to_string(),
        serde_json::json!(point.target_time),
    );
    seed.insert(
        "backup_manifest".to_string(),
        serde_json::json!(point.snapshot.file_list),
    );
    seed.insert("binlog_files".to_string(), serde_json::json!(binlog_names));

    let mut builder = PipelineBuilder::new(seed, &["cluster_id", "target_time"])?;

    let mut install = SubProcessBuilder::new();
    install
        .add_activity(
            "transfer install package",
            components::TRANSFER_FILES,
            ActPayload::TransferFiles {
                cloud_id: params.cloud_id,
                exec_ips: vec![params.rollback_ip.clone()],
                file_list: params.pkg_files.clone(),
            },
            None,
            RetryPolicy::Automatic(BackoffConfig::default()),
        )?
        .add_activity(
            "install rollback instance",
            components::REMOTE_SCRIPT,
            ActPayload::RemoteScript {
                cloud_id: params.cloud_id,
                exec_ips: vec![params.rollback_ip.clone()],
                cluster_type: None,
                script: "install_rollback_instance".to_string(),
                input_vars: vec![],
            },
            None,
            RetryPolicy::Manual,
        )?;
    builder.add_sub_process(install.build("install rollback instance")?)?;

    if remote {
        builder
            .add_activity(
                "download backup",
                components::BACKUP_DOWNLOADER,
                ActPayload::DownloadBackup {
                    cloud_id: params.cloud_id,
                    task_ids: point.snapshot.task_ids.clone(),
                    dest_ip: params.rollback_ip.clone(),
                    dest_dir: params.backup_dir.clone(),
                    reason: format!("rollback cluster {}", params.cluster_id),
                },
                None,
                RetryPolicy::Automatic(BackoffConfig::default()),
            )?
            .add_activity(
                "download binlog",
                components::BINLOG_DOWNLOADER,
                ActPayload::DownloadBinlog {
                    cloud_id: params.cloud_id,
                    manifest_var: "binlog_files".to_string(),
                    dest_ip: params.rollback_ip.clone(),
                    dest_dir: params.backup_dir.clone(),
                },
                None,
                RetryPolicy::Automatic(BackoffConfig::default()),
            )?;
    }

    builder
        .add_activity(
            "restore data",
            components::RESTORE_TOOL,
            ActPayload::RestoreData {
                exec_ip: params.rollback_ip.clone(),
                manifest_var: "backup_manifest".to_string(),
                binlogs_var: "binlog_files".to_string(),
            },
            Some("restore_result"),
            RetryPolicy::Manual,
        )?
        .add_activity(
            "replay binlog",
            components::BINLOG_REPLAYER,
            ActPayload::ReplayBinlog {
                exec_ip: params.rollback_ip.clone(),
                binlogs_var: "binlog_files".to_string(),
                target_time: point.target_time,
            },
            None,
            RetryPolicy::Manual,
        )?;

    let pipeline = builder.build(format!("rollback cluster {}", params.cluster_id))?;
    Ok(pipeline)
}
