//! Add replicas to a cluster: precheck the topology, install and sync the
//! new replicas in parallel, join them in metadata, then shut down the old
//! ones.

use super::components;
use crate::errors::{FlowError, PreconditionError};
use crate::node::{ActPayload, BackoffConfig, RetryPolicy};
use crate::pipeline::{Pipeline, PipelineBuilder, SubProcess, SubProcessBuilder};
use crate::topology::{resolve_role, ClusterType, Instance, MachineRole};
use std::collections::HashMap;

/// Parameters for one add-replica pipeline.
#[derive(Debug, Clone)]
pub struct AddSlaveParams {
    /// The cluster receiving replicas.
    pub cluster_id: u64,
    /// Cloud/network zone of all hosts involved.
    pub cloud_id: u64,
    /// Cluster type, driving role resolution and scripts.
    pub cluster_type: ClusterType,
    /// Installation media for the new replicas.
    pub pkg_files: Vec<String>,
    /// The primary the replicas sync from, as `ip:port`.
    pub master: String,
    /// Hosts receiving new replicas.
    pub new_slave_ips: Vec<String>,
    /// Port the new replicas listen on.
    pub replica_port: u16,
    /// Hosts whose replicas are shut down after the join. May be empty.
    pub old_slave_ips: Vec<String>,
}

/// Checks the cluster topology before any pipeline is built.
///
/// The cluster must have instances, the named primary must exist with a
/// primary role, and no instance may already run on a new replica host.
///
/// # Errors
///
/// Returns `Topology` describing the first violated condition.
pub fn precheck_add_slave(
    params: &AddSlaveParams,
    instances: &[Instance],
) -> Result<(), PreconditionError> {
    if instances.is_empty() {
        return Err(PreconditionError::Topology {
            cluster_id: params.cluster_id,
            message: "cluster has no instances".to_string(),
        });
    }

    let master = instances
        .iter()
        .find(|i| i.address() == params.master)
        .ok_or_else(|| PreconditionError::Topology {
            cluster_id: params.cluster_id,
            message: format!("master {} not found in cluster", params.master),
        })?;
    let role = resolve_role(master.cluster_type, &master.raw_role).map_err(|_| {
        PreconditionError::Topology {
            cluster_id: params.cluster_id,
            message: format!("master {} has unmapped role {}", params.master, master.raw_role),
        }
    })?;
    if !matches!(role, MachineRole::StorageMaster | MachineRole::RedisBackend) {
        return Err(PreconditionError::Topology {
            cluster_id: params.cluster_id,
            message: format!("instance {} is not a primary (role {role})", params.master),
        });
    }

    for ip in &params.new_slave_ips {
        if instances.iter().any(|i| &i.ip == ip) {
            return Err(PreconditionError::Topology {
                cluster_id: params.cluster_id,
                message: format!("an instance is already running on {ip}"),
            });
        }
    }

    Ok(())
}

/// Builds the add-replica pipeline after a passing precheck.
///
/// # Errors
///
/// Returns `Precondition` from the precheck and `Build` errors from
/// assembly.
pub fn build_add_slave_pipeline(
    params: &AddSlaveParams,
    instances: &[Instance],
) -> Result<Pipeline, FlowError> {
    precheck_add_slave(params, instances)?;

    let mut seed = HashMap::new();
    seed.insert(
        "cluster_id".to_string(),
        serde_json::json!(params.cluster_id),
    );
    seed.insert("master".to_string(), serde_json::json!(params.master));

    let mut builder = PipelineBuilder::new(seed, &["cluster_id", "master"])?;

    let mut install_branches = Vec::with_capacity(params.new_slave_ips.len());
    for ip in &params.new_slave_ips {
        install_branches.push(install_branch(params, ip)?);
    }
    builder.add_parallel_group(install_branches)?;

    let mut sync_branches = Vec::with_capacity(params.new_slave_ips.len());
    for ip in &params.new_slave_ips {
        sync_branches.push(sync_branch(params, ip)?);
    }
    builder.add_parallel_group(sync_branches)?;

    builder.add_activity(
        "join replicas in metadata",
        components::META_STORE,
        ActPayload::MetaMutation {
            op: "join_replicas".to_string(),
            cluster_id: params.cluster_id,
        },
        None,
        RetryPolicy::Automatic(BackoffConfig::default()),
    )?;

    if !params.old_slave_ips.is_empty() {
        let mut shutdown_branches = Vec::with_capacity(params.old_slave_ips.len());
        for ip in &params.old_slave_ips {
            shutdown_branches.push(shutdown_branch(params, ip)?);
        }
        builder.add_parallel_group(shutdown_branches)?;
    }

    let pipeline = builder.build(format!("add replicas to cluster {}", params.cluster_id))?;
    Ok(pipeline)
}

fn install_branch(params: &AddSlaveParams, ip: &str) -> Result<SubProcess, FlowError> {
    let mut branch = SubProcessBuilder::new();
    branch
        .add_activity(
            format!("transfer packages to {ip}"),
            components::TRANSFER_FILES,
            ActPayload::TransferFiles {
                cloud_id: params.cloud_id,
                exec_ips: vec![ip.to_string()],
                file_list: params.pkg_files.clone(),
            },
            None,
            RetryPolicy::Automatic(BackoffConfig::default()),
        )?
        .add_activity(
            format!("install replica on {ip}"),
            components::REMOTE_SCRIPT,
            ActPayload::RemoteScript {
                cloud_id: params.cloud_id,
                exec_ips: vec![ip.to_string()],
                cluster_type: Some(params.cluster_type),
                script: "install_replica_instance".to_string(),
                input_vars: vec![],
            },
            None,
            RetryPolicy::Manual,
        )?;
    Ok(branch.build(format!("install replica {ip}"))?)
}

fn sync_branch(params: &AddSlaveParams, ip: &str) -> Result<SubProcess, FlowError> {
    let binding = format!("sync_result_{ip}");
    let mut branch = SubProcessBuilder::new();
    branch.add_activity(
        format!("sync data to {ip}"),
        components::DATA_SYNC,
        ActPayload::SyncData {
            source: params.master.clone(),
            target: format!("{ip}:{}", params.replica_port),
            shard_id: None,
        },
        Some(&binding),
        RetryPolicy::Manual,
    )?;
    Ok(branch.build(format!("sync replica {ip}"))?)
}

fn shutdown_branch(params: &AddSlaveParams, ip: &str) -> Result<SubProcess, FlowError> {
    let mut branch = SubProcessBuilder::new();
    branch.add_activity(
        format!("shutdown old replica on {ip}"),
        components::REMOTE_SCRIPT,
        ActPayload::RemoteScript {
            cloud_id: params.cloud_id,
            exec_ips: vec![ip.to_string()],
            cluster_type: Some(params.cluster_type),
            script: "shutdown_replica_instance".to_string(),
            input_vars: vec![],
        },
        None,
        RetryPolicy::Manual,
    )?;
    Ok(branch.build(format!("shutdown replica {ip}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(ip: &str, raw_role: &str) -> Instance {
        Instance {
            ip: ip.to_string(),
            port: 30000,
            cloud_id: 0,
            cluster_type: ClusterType::RedisCluster,
            raw_role: raw_role.to_string(),
        }
    }

    fn params() -> AddSlaveParams {
        AddSlaveParams {
            cluster_id: 11,
            cloud_id: 0,
            cluster_type: ClusterType::RedisCluster,
            pkg_files: vec!["redis-6.2.tar.gz".to_string()],
            master: "10.0.0.1:30000".to_string(),
            new_slave_ips: vec!["10.0.2.1".to_string(), "10.0.2.2".to_string()],
            replica_port: 30000,
            old_slave_ips: vec!["10.0.0.2".to_string()],
        }
    }

    #[test]
    fn test_precheck_requires_instances() {
        let err = precheck_add_slave(&params(), &[]).unwrap_err();
        assert!(matches!(err, PreconditionError::Topology { .. }));
    }

    #[test]
    fn test_precheck_requires_known_master() {
        let cluster = vec![instance("10.0.0.9", "redis_master")];
        let err = precheck_add_slave(&params(), &cluster).unwrap_err();
        match err {
            PreconditionError::Topology { message, .. } => {
                assert!(message.contains("master"));
            }
            other => panic!("expected Topology, got {other:?}"),
        }
    }

    #[test]
    fn test_precheck_rejects_running_replica_host() {
        let cluster = vec![
            instance("10.0.0.1", "redis_master"),
            instance("10.0.2.1", "redis_slave"),
        ];
        let err = precheck_add_slave(&params(), &cluster).unwrap_err();
        match err {
            PreconditionError::Topology { message, .. } => {
                assert!(message.contains("10.0.2.1"));
            }
            other => panic!("expected Topology, got {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_phases_in_order() {
        let cluster = vec![instance("10.0.0.1", "redis_master")];
        let pipeline = build_add_slave_pipeline(&params(), &cluster).unwrap();

        let names: Vec<&str> = pipeline.nodes().iter().map(|n| n.name()).collect();
        let install = names
            .iter()
            .position(|n| n.starts_with("install replica"))
            .unwrap();
        let sync = names
            .iter()
            .position(|n| n.starts_with("sync data"))
            .unwrap();
        let join = names
            .iter()
            .position(|n| *n == "join replicas in metadata")
            .unwrap();
        let shutdown = names
            .iter()
            .position(|n| n.starts_with("shutdown old replica"))
            .unwrap();

        assert!(install < sync);
        assert!(sync < join);
        assert!(join < shutdown);
    }

    #[test]
    fn test_no_old_replicas_skips_shutdown_phase() {
        let cluster = vec![instance("10.0.0.1", "redis_master")];
        let mut p = params();
        p.old_slave_ips.clear();

        let pipeline = build_add_slave_pipeline(&p, &cluster).unwrap();
        assert!(pipeline
            .nodes()
            .iter()
            .all(|n| !n.name().starts_with("shutdown")));
    }
}
