//! Phased storage-pair migration: install new nodes, sync data per shard,
//! cut over, decommission the old nodes. Two manual gates guard the
//! irreversible phases and cannot be skipped.

use super::components;
use crate::errors::{BuildError, FlowError};
use crate::node::{ActPayload, BackoffConfig, RetryPolicy};
use crate::pipeline::{Pipeline, PipelineBuilder, SubProcess, SubProcessBuilder};
use crate::topology::ClusterType;
use std::collections::HashMap;

/// One shard's replication pair during the sync phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPair {
    /// Shard number.
    pub shard_id: u32,
    /// Source `ip:port` (old storage).
    pub source: String,
    /// Target `ip:port` (new storage).
    pub target: String,
}

/// One cluster participating in the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateCluster {
    /// The cluster id.
    pub cluster_id: u64,
    /// New hosts receiving installations.
    pub new_hosts: Vec<String>,
    /// Old hosts decommissioned at the end.
    pub old_hosts: Vec<String>,
    /// Replication pairs, one per shard.
    pub shards: Vec<ShardPair>,
}

/// Parameters for one migration pipeline.
#[derive(Debug, Clone)]
pub struct MigrateParams {
    /// Cloud/network zone of all hosts involved.
    pub cloud_id: u64,
    /// Cluster type of the fleet being migrated.
    pub cluster_type: ClusterType,
    /// Installation media for the new nodes.
    pub pkg_files: Vec<String>,
    /// Clusters migrated together in one ticket.
    pub clusters: Vec<MigrateCluster>,
}

/// Builds the phased migration pipeline.
///
/// Phase order: install new nodes (parallel per cluster), sync data
/// (parallel per shard), install surrounding services, manual gate, cut-over
/// (parallel per cluster), re-install surrounding services, manual gate,
/// decommission old nodes (parallel per host).
///
/// # Errors
///
/// Returns `Build` errors from pipeline assembly, including an `Empty` error
/// when no clusters are given.
pub fn build_migrate_pipeline(params: &MigrateParams) -> Result<Pipeline, FlowError> {
    let cluster_ids: Vec<u64> = params.clusters.iter().map(|c| c.cluster_id).collect();
    let mut seed = HashMap::new();
    seed.insert("cluster_ids".to_string(), serde_json::json!(cluster_ids));

    if params.clusters.is_empty() {
        return Err(BuildError::Empty {
            name: "migrate storage pairs".to_string(),
        }
        .into());
    }

    let mut builder = PipelineBuilder::new(seed, &["cluster_ids"])?;

    let mut install_branches = Vec::with_capacity(params.clusters.len());
    for cluster in &params.clusters {
        install_branches.push(install_branch(params, cluster)?);
    }
    builder.add_parallel_group(install_branches)?;

    let mut sync_branches = Vec::new();
    for cluster in &params.clusters {
        for shard in &cluster.shards {
            sync_branches.push(sync_branch(cluster.cluster_id, shard)?);
        }
    }
    if !sync_branches.is_empty() {
        builder.add_parallel_group(sync_branches)?;
    }

    builder.add_activity(
        "install surrounding services",
        components::REMOTE_SCRIPT,
        surrounding_payload(params, true),
        None,
        RetryPolicy::Automatic(BackoffConfig::default()),
    )?;

    builder.add_pause("confirm cut-over")?;

    let mut cutover_branches = Vec::with_capacity(params.clusters.len());
    for cluster in &params.clusters {
        cutover_branches.push(cutover_branch(params, cluster)?);
    }
    builder.add_parallel_group(cutover_branches)?;

    builder.add_activity(
        "reinstall surrounding services",
        components::REMOTE_SCRIPT,
        surrounding_payload(params, false),
        None,
        RetryPolicy::Automatic(BackoffConfig::default()),
    )?;

    builder.add_pause("confirm decommission")?;

    let mut decommission_branches = Vec::new();
    for cluster in &params.clusters {
        for host in &cluster.old_hosts {
            decommission_branches.push(decommission_branch(params, cluster.cluster_id, host)?);
        }
    }
    if !decommission_branches.is_empty() {
        builder.add_parallel_group(decommission_branches)?;
    }

    let pipeline = builder.build("migrate storage pairs")?;
    Ok(pipeline)
}

fn install_branch(
    params: &MigrateParams,
    cluster: &MigrateCluster,
) -> Result<SubProcess, FlowError> {
    let mut branch = SubProcessBuilder::new();
    branch
        .add_activity(
            format!("transfer packages to cluster {}", cluster.cluster_id),
            components::TRANSFER_FILES,
            ActPayload::TransferFiles {
                cloud_id: params.cloud_id,
                exec_ips: cluster.new_hosts.clone(),
                file_list: params.pkg_files.clone(),
            },
            None,
            RetryPolicy::Automatic(BackoffConfig::default()),
        )?
        .add_activity(
            format!("install new nodes for cluster {}", cluster.cluster_id),
            components::REMOTE_SCRIPT,
            ActPayload::RemoteScript {
                cloud_id: params.cloud_id,
                exec_ips: cluster.new_hosts.clone(),
                cluster_type: Some(params.cluster_type),
                script: "install_storage_instance".to_string(),
                input_vars: vec![],
            },
            None,
            RetryPolicy::Manual,
        )?;
    Ok(branch.build(format!("install cluster {}", cluster.cluster_id))?)
}

fn sync_branch(cluster_id: u64, shard: &ShardPair) -> Result<SubProcess, FlowError> {
    let binding = format!("sync_result_c{}_s{}", cluster_id, shard.shard_id);
    let mut branch = SubProcessBuilder::new();
    branch.add_activity(
        format!("sync shard {} of cluster {cluster_id}", shard.shard_id),
        components::DATA_SYNC,
        ActPayload::SyncData {
            source: shard.source.clone(),
            target: shard.target.clone(),
            shard_id: Some(shard.shard_id),
        },
        Some(&binding),
        RetryPolicy::Manual,
    )?;
    Ok(branch.build(format!("sync cluster {cluster_id} shard {}", shard.shard_id))?)
}

fn cutover_branch(
    params: &MigrateParams,
    cluster: &MigrateCluster,
) -> Result<SubProcess, FlowError> {
    let mut branch = SubProcessBuilder::new();
    branch
        .add_activity(
            format!("switch traffic for cluster {}", cluster.cluster_id),
            components::REMOTE_SCRIPT,
            ActPayload::RemoteScript {
                cloud_id: params.cloud_id,
                exec_ips: cluster.new_hosts.clone(),
                cluster_type: Some(params.cluster_type),
                script: "switch_storage_pair".to_string(),
                input_vars: vec![],
            },
            None,
            RetryPolicy::Manual,
        )?
        .add_activity(
            format!("record switch for cluster {}", cluster.cluster_id),
            components::META_STORE,
            ActPayload::MetaMutation {
                op: "switch_storage_pair".to_string(),
                cluster_id: cluster.cluster_id,
            },
            None,
            RetryPolicy::Automatic(BackoffConfig::default()),
        )?;
    Ok(branch.build(format!("cut over cluster {}", cluster.cluster_id))?)
}

fn decommission_branch(
    params: &MigrateParams,
    cluster_id: u64,
    host: &str,
) -> Result<SubProcess, FlowError> {
    let mut branch = SubProcessBuilder::new();
    branch
        .add_activity(
            format!("uninstall instances on {host}"),
            components::REMOTE_SCRIPT,
            ActPayload::RemoteScript {
                cloud_id: params.cloud_id,
                exec_ips: vec![host.to_string()],
                cluster_type: Some(params.cluster_type),
                script: "uninstall_storage_instance".to_string(),
                input_vars: vec![],
            },
            None,
            RetryPolicy::Manual,
        )?
        .add_activity(
            format!("clear metadata for {host}"),
            components::META_STORE,
            ActPayload::MetaMutation {
                op: format!("clear_host:{host}"),
                cluster_id,
            },
            None,
            RetryPolicy::Automatic(BackoffConfig::default()),
        )?;
    Ok(branch.build(format!("decommission {host}"))?)
}

fn surrounding_payload(params: &MigrateParams, initial: bool) -> ActPayload {
    let script = if initial {
        "install_surrounding_services"
    } else {
        "reinstall_surrounding_services"
    };
    let exec_ips: Vec<String> = params
        .clusters
        .iter()
        .flat_map(|c| c.new_hosts.iter().cloned())
        .collect();
    ActPayload::RemoteScript {
        cloud_id: params.cloud_id,
        exec_ips,
        cluster_type: Some(params.cluster_type),
        script: script.to_string(),
        input_vars: vec![],
    }
}
