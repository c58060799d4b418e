//! Cluster outputs exposed after a successful cycle.

use crate::graph::{Graph, ResourceKind};
use crate::observe::ObservedState;
use gridflow_core::{ClusterSpec, FabricMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capacity bounds reported when autoscaling is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityOutputs {
    pub desired: u32,
    pub min: u32,
    pub max: u32,
}

/// Static fabric expectations derived from the instance class.
///
/// These are not measurements; they are what the class is rated for, so
/// job launchers can sanity-check placement and wire the fabric provider
/// into MPI and NCCL runs via the environment map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricHints {
    pub expected_bandwidth_gbps: u32,
    pub expected_latency_us: u32,

    /// Environment variables a launcher should export on every node
    pub env: BTreeMap<String, String>,
}

impl FabricHints {
    /// Hints for an RDMA cluster, `None` on a standard fabric.
    pub fn for_spec(spec: &ClusterSpec) -> Option<Self> {
        if spec.fabric != FabricMode::Rdma {
            return None;
        }

        let expected_bandwidth_gbps = match spec.pool.instance_class.family() {
            "p5" => 3200,
            "trn1" => 800,
            "p4d" | "p4de" => 400,
            "hpc7g" | "hpc6id" | "hpc7a" => 200,
            _ => 100,
        };

        let mut env = BTreeMap::new();
        env.insert("FI_PROVIDER".to_string(), "efa".to_string());
        env.insert("FI_EFA_FORK_SAFE".to_string(), "1".to_string());
        env.insert("FI_EFA_USE_DEVICE_RDMA".to_string(), "1".to_string());

        Some(Self {
            expected_bandwidth_gbps,
            expected_latency_us: 50,
            env,
        })
    }
}

/// Provider-side identifiers of the provisioned cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterOutputs {
    /// One per provisioned node, in stable ordinal order
    pub instance_ids: Vec<String>,

    /// Shared filesystem of the primary region
    pub storage_endpoint_id: Option<String>,

    pub placement_group_id: Option<String>,

    /// Security group guarding the fabric interfaces
    pub fabric_security_group_id: Option<String>,

    /// Interface VPC endpoints, when the cost policy provisions them
    pub endpoint_ids: Vec<String>,

    /// Replication role identifiers, one per secondary region
    pub replication_role_ids: Vec<String>,

    /// Present when the spec enables autoscaling
    pub capacity: Option<CapacityOutputs>,

    /// Present on RDMA fabrics
    pub fabric: Option<FabricHints>,
}

impl ClusterOutputs {
    /// Assemble outputs from the post-apply snapshot.
    ///
    /// Provider-side identifiers beyond a resource's own id (the fabric
    /// security group, the storage mount endpoint, replication roles) come
    /// from the resource's exports.
    pub fn collect(spec: &ClusterSpec, graph: &Graph, observed: &ObservedState) -> Self {
        let mut outputs = ClusterOutputs::default();
        let primary = spec.primary_region().map(|r| r.name.as_str());

        for node in graph.nodes() {
            let Some(resource) = observed.get(&node.id) else {
                continue;
            };
            match node.kind() {
                ResourceKind::Instance => {
                    outputs.instance_ids.push(resource.provider_id.clone());
                }
                ResourceKind::Storage => {
                    let in_primary = matches!(
                        &node.attrs,
                        crate::graph::ResourceAttrs::Storage { region, .. }
                            if Some(region.as_str()) == primary
                    );
                    if in_primary || outputs.storage_endpoint_id.is_none() {
                        outputs.storage_endpoint_id = Some(
                            resource
                                .export("endpoint")
                                .unwrap_or(&resource.provider_id)
                                .to_string(),
                        );
                    }
                }
                ResourceKind::PlacementGroup => {
                    outputs.placement_group_id = Some(resource.provider_id.clone());
                }
                ResourceKind::Network => {
                    if let Some(sg) = resource.export("security_group_id") {
                        outputs.fabric_security_group_id = Some(sg.to_string());
                    }
                }
                ResourceKind::Endpoint => {
                    outputs.endpoint_ids.push(resource.provider_id.clone());
                }
                ResourceKind::ReplicationRule => {
                    outputs.replication_role_ids.push(
                        resource
                            .export("role_id")
                            .unwrap_or(&resource.provider_id)
                            .to_string(),
                    );
                }
            }
        }

        if spec.autoscaling.is_some() {
            outputs.capacity = Some(CapacityOutputs {
                desired: spec.pool.desired,
                min: spec.pool.min,
                max: spec.pool.max,
            });
        }
        outputs.fabric = FabricHints::for_spec(spec);

        outputs
    }
}
