//! Cluster topology types: role mapping and instance aggregation.
//!
//! Aggregation groups a flat list of target instances into buckets keyed by
//! (cloud id, cluster type, resolved role) so a single downstream batch
//! request can carry all instances of one role instead of one request per
//! instance.

use crate::errors::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The cluster types managed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClusterType {
    /// Single-instance MySQL.
    TenDBSingle,
    /// MySQL master/slave pair.
    TenDBHA,
    /// Sharded MySQL with spider access layer.
    TenDBCluster,
    /// Redis cluster.
    RedisCluster,
    /// Redis master/slave instance pair.
    RedisInstance,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TenDBSingle => "tendbsingle",
            Self::TenDBHA => "tendbha",
            Self::TenDBCluster => "tendbcluster",
            Self::RedisCluster => "rediscluster",
            Self::RedisInstance => "redisinstance",
        };
        f.write_str(s)
    }
}

/// The closed canonical role enumeration used for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MachineRole {
    /// Spider access-layer node.
    SpiderController,
    /// Storage primary.
    StorageMaster,
    /// Storage replica.
    StorageSlave,
    /// Proxy in front of a redis cluster.
    Proxy,
    /// Redis storage node.
    RedisBackend,
}

impl fmt::Display for MachineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SpiderController => "spider-controller",
            Self::StorageMaster => "storage-master",
            Self::StorageSlave => "storage-slave",
            Self::Proxy => "proxy",
            Self::RedisBackend => "redis-backend",
        };
        f.write_str(s)
    }
}

/// Maps a (cluster type, raw instance role) pair to the canonical role.
///
/// Pure and total over the documented table. Sharded cluster types special-
/// case their sub-roles; anything outside the table is rejected.
///
/// # Errors
///
/// Returns `BuildError::UnknownRoleMapping` for undocumented pairs.
pub fn resolve_role(cluster_type: ClusterType, raw_role: &str) -> Result<MachineRole, BuildError> {
    let role = match (cluster_type, raw_role) {
        (ClusterType::TenDBCluster, "spider_ctl" | "spider_master" | "spider_slave") => {
            MachineRole::SpiderController
        }
        (ClusterType::TenDBCluster, "remote_master") => MachineRole::StorageMaster,
        (ClusterType::TenDBCluster, "remote_slave") => MachineRole::StorageSlave,
        (
            ClusterType::TenDBHA | ClusterType::TenDBSingle,
            "backend_master" | "orphan",
        ) => MachineRole::StorageMaster,
        (ClusterType::TenDBHA, "backend_slave") => MachineRole::StorageSlave,
        (ClusterType::TenDBHA, "proxy") => MachineRole::Proxy,
        (ClusterType::RedisCluster, "proxy") => MachineRole::Proxy,
        (
            ClusterType::RedisCluster | ClusterType::RedisInstance,
            "redis_master" | "redis_slave",
        ) => MachineRole::RedisBackend,
        (cluster_type, raw_role) => {
            return Err(BuildError::UnknownRoleMapping {
                cluster_type: cluster_type.to_string(),
                raw_role: raw_role.to_string(),
            })
        }
    };
    Ok(role)
}

/// A target instance as discovered from cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Host address.
    pub ip: String,
    /// Service port.
    pub port: u16,
    /// Cloud/network zone id the host lives in.
    pub cloud_id: u64,
    /// Cluster type of the owning cluster.
    pub cluster_type: ClusterType,
    /// Raw role string from metadata.
    pub raw_role: String,
}

impl Instance {
    /// Returns the `ip:port` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// The key of one aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    /// Cloud/network zone id.
    pub cloud_id: u64,
    /// Cluster type.
    pub cluster_type: ClusterType,
    /// Resolved canonical role.
    pub role: MachineRole,
}

/// Groups instances into (cloud id, cluster type, role) buckets.
///
/// Bucket order and the order of instances within a bucket are deterministic:
/// buckets sort by key, instances keep input order.
///
/// # Errors
///
/// Returns `BuildError::UnknownRoleMapping` if any instance's role cannot be
/// resolved; no partial aggregation is returned.
pub fn aggregate_instances(
    instances: &[Instance],
) -> Result<BTreeMap<BucketKey, Vec<Instance>>, BuildError> {
    let mut buckets: BTreeMap<BucketKey, Vec<Instance>> = BTreeMap::new();

    for instance in instances {
        let role = resolve_role(instance.cluster_type, &instance.raw_role)?;
        let key = BucketKey {
            cloud_id: instance.cloud_id,
            cluster_type: instance.cluster_type,
            role,
        };
        buckets.entry(key).or_default().push(instance.clone());
    }

    Ok(buckets)
}
