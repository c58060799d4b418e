//! Resource graph: the desired ClusterSpec expanded into a DAG of concrete
//! provisionable units with explicit dependency edges.
//!
//! An edge A -> B means "B requires A to exist first". Expansion is a pure
//! function of the spec, and node identifiers are derived deterministically
//! from spec + role so they stay stable across cycles.

use crate::error::{EngineError, Result};
use gridflow_core::{ClusterSpec, FabricMode, IngressRule, ThroughputTier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Kind of one provisionable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Network fabric: VPC-scoped network, subnet, and the fabric security
    /// group (RDMA self-referencing when the fabric mode asks for it)
    Network,
    /// Placement group for RDMA co-location
    PlacementGroup,
    /// Shared parallel filesystem
    Storage,
    /// Interface VPC endpoint
    Endpoint,
    /// Compute node
    Instance,
    /// Cross-region storage replication rule
    ReplicationRule,
}

impl ResourceKind {
    pub fn slug(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::PlacementGroup => "placement-group",
            ResourceKind::Storage => "storage",
            ResourceKind::Endpoint => "endpoint",
            ResourceKind::Instance => "instance",
            ResourceKind::ReplicationRule => "replication-rule",
        }
    }

    /// Coarse creation order of the kind, used only to sequence deletes of
    /// resources no longer present in the desired graph (last-created
    /// kinds are torn down first).
    pub fn create_rank(&self) -> u8 {
        match self {
            ResourceKind::Network => 0,
            ResourceKind::PlacementGroup => 1,
            ResourceKind::Storage => 2,
            ResourceKind::Endpoint => 2,
            ResourceKind::Instance => 3,
            ResourceKind::ReplicationRule => 4,
        }
    }

}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Stable identifier of a resource node: `{cluster}/{region}/{kind}/{role}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(cluster: &str, region: &str, kind: ResourceKind, role: &str) -> Self {
        Self(format!("{}/{}/{}/{}", cluster, region, kind.slug(), role))
    }

    pub fn parse(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Placement strategy. Changing it cannot be done in place on any provider
/// we target, so drift forces a replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// Pack onto the same rack-adjacent hardware for fabric latency
    Cluster,
    /// Spread across failure domains
    Spread,
}

/// Desired attributes of one resource, tagged by kind so the diff engine
/// can match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceAttrs {
    Network {
        region: String,
        /// RDMA-capable fabric interfaces and a self-referencing fabric
        /// security group
        rdma: bool,
        ingress: Vec<IngressRule>,
    },
    PlacementGroup {
        region: String,
        strategy: PlacementStrategy,
    },
    Storage {
        region: String,
        capacity_gib: u32,
        throughput: ThroughputTier,
        encrypted: bool,
    },
    Endpoint {
        region: String,
        service: String,
    },
    Instance {
        region: String,
        instance_class: String,
        spot: bool,
        ordinal: u32,
    },
    ReplicationRule {
        source_region: String,
        dest_region: String,
    },
}

impl ResourceAttrs {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceAttrs::Network { .. } => ResourceKind::Network,
            ResourceAttrs::PlacementGroup { .. } => ResourceKind::PlacementGroup,
            ResourceAttrs::Storage { .. } => ResourceKind::Storage,
            ResourceAttrs::Endpoint { .. } => ResourceKind::Endpoint,
            ResourceAttrs::Instance { .. } => ResourceKind::Instance,
            ResourceAttrs::ReplicationRule { .. } => ResourceKind::ReplicationRule,
        }
    }

    /// Whether drifting from `observed` to `self` requires replacing the
    /// resource because the provider cannot update the attribute in place.
    pub fn requires_replace(&self, observed: &ResourceAttrs) -> bool {
        match (self, observed) {
            (
                ResourceAttrs::PlacementGroup { strategy: a, .. },
                ResourceAttrs::PlacementGroup { strategy: b, .. },
            ) => a != b,
            // The interface class is baked in at network creation time.
            (
                ResourceAttrs::Network { rdma: a, .. },
                ResourceAttrs::Network { rdma: b, .. },
            ) => a != b,
            _ => false,
        }
    }
}

/// One concrete provisionable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub attrs: ResourceAttrs,
    /// Identifiers this node requires to exist first
    pub deps: Vec<ResourceId>,
}

impl ResourceNode {
    pub fn kind(&self) -> ResourceKind {
        self.attrs.kind()
    }
}

/// The desired resource DAG for one cluster.
///
/// Nodes are keyed in a BTreeMap so iteration, and with it every plan
/// derived from the graph, is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeMap<ResourceId, ResourceNode>,
}

impl Graph {
    /// Expand a validated spec into the resource graph.
    ///
    /// Fails with `InvalidSpec` when the spec violates its invariants and
    /// with `CyclicDependency` if the dependency edges contain a cycle;
    /// structurally impossible from this expansion, but the topological
    /// sort runs as a validation step regardless.
    pub fn build(spec: &ClusterSpec) -> Result<Self> {
        spec.validate()?;

        let mut graph = Graph::default();
        let cluster = spec.name.as_str();
        let rdma = spec.fabric == FabricMode::Rdma;

        for region in &spec.regions {
            let net_id = ResourceId::new(cluster, &region.name, ResourceKind::Network, "fabric");
            graph.insert(ResourceNode {
                id: net_id.clone(),
                attrs: ResourceAttrs::Network {
                    region: region.name.clone(),
                    rdma,
                    ingress: spec.security.ingress.clone(),
                },
                deps: vec![],
            });

            // Placement only matters where compute runs; secondary regions
            // host storage replicas, not instances, so they get no group.
            let pg_id = if rdma && region.primary {
                let id = ResourceId::new(
                    cluster,
                    &region.name,
                    ResourceKind::PlacementGroup,
                    "compute",
                );
                graph.insert(ResourceNode {
                    id: id.clone(),
                    attrs: ResourceAttrs::PlacementGroup {
                        region: region.name.clone(),
                        strategy: PlacementStrategy::Cluster,
                    },
                    deps: vec![],
                });
                Some(id)
            } else {
                None
            };

            let storage_id =
                ResourceId::new(cluster, &region.name, ResourceKind::Storage, "shared-fs");
            graph.insert(ResourceNode {
                id: storage_id.clone(),
                attrs: ResourceAttrs::Storage {
                    region: region.name.clone(),
                    capacity_gib: spec.storage.capacity_gib,
                    throughput: spec.storage.throughput,
                    encrypted: spec.security.encrypt_at_rest,
                },
                deps: vec![net_id.clone()],
            });

            if spec.cost.vpc_endpoints {
                let ep_id =
                    ResourceId::new(cluster, &region.name, ResourceKind::Endpoint, "storage-api");
                graph.insert(ResourceNode {
                    id: ep_id,
                    attrs: ResourceAttrs::Endpoint {
                        region: region.name.clone(),
                        service: "storage-api".to_string(),
                    },
                    deps: vec![net_id.clone()],
                });
            }

            // Instances only run in the primary region; secondaries exist
            // for storage replication.
            if region.primary {
                for ordinal in 0..spec.pool.desired {
                    let id = ResourceId::new(
                        cluster,
                        &region.name,
                        ResourceKind::Instance,
                        &format!("node-{:04}", ordinal),
                    );
                    // Storage mounts before the instance is marked ready,
                    // so the shared filesystem is a hard dependency too.
                    let mut deps = vec![net_id.clone(), storage_id.clone()];
                    if let Some(pg) = &pg_id {
                        deps.push(pg.clone());
                    }
                    graph.insert(ResourceNode {
                        id,
                        attrs: ResourceAttrs::Instance {
                            region: region.name.clone(),
                            instance_class: spec.pool.instance_class.as_str().to_string(),
                            spot: spec.cost.spot_eligible,
                            ordinal,
                        },
                        deps,
                    });
                }
            }
        }

        if let Some(primary) = spec.primary_region() {
            let primary_storage =
                ResourceId::new(cluster, &primary.name, ResourceKind::Storage, "shared-fs");
            for secondary in spec.secondary_regions() {
                let secondary_storage =
                    ResourceId::new(cluster, &secondary.name, ResourceKind::Storage, "shared-fs");
                let id = ResourceId::new(
                    cluster,
                    &primary.name,
                    ResourceKind::ReplicationRule,
                    &secondary.name,
                );
                graph.insert(ResourceNode {
                    id,
                    attrs: ResourceAttrs::ReplicationRule {
                        source_region: primary.name.clone(),
                        dest_region: secondary.name.clone(),
                    },
                    deps: vec![primary_storage.clone(), secondary_storage],
                });
            }
        }

        // Validation, not just plan ordering.
        graph.waves()?;

        tracing::debug!(
            "Built resource graph for {} with {} nodes",
            spec.name,
            graph.len()
        );
        Ok(graph)
    }

    fn insert(&mut self, node: ResourceNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in deterministic (identifier) order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Nodes of one kind, in deterministic order.
    pub fn nodes_of_kind(&self, kind: ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.values().filter(|n| n.kind() == kind).collect()
    }

    /// Kinds present in the graph.
    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.nodes.values().map(|n| n.kind()).collect()
    }

    /// Kahn's algorithm, level by level: wave *k* holds exactly the nodes
    /// whose dependencies all sit in waves earlier than *k*. Two nodes
    /// share a wave iff there is no path between them, so a wave is safe
    /// to execute in any interleaving.
    pub fn waves(&self) -> Result<Vec<Vec<ResourceId>>> {
        let mut indegree: BTreeMap<&ResourceId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&ResourceId, Vec<&ResourceId>> = BTreeMap::new();

        for node in self.nodes.values() {
            indegree.entry(&node.id).or_insert(0);
            for dep in &node.deps {
                if !self.nodes.contains_key(dep) {
                    return Err(EngineError::CyclicDependency(format!(
                        "{} depends on unknown node {}",
                        node.id, dep
                    )));
                }
                *indegree.entry(&node.id).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(&node.id);
            }
        }

        let mut ready: VecDeque<&ResourceId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut waves = Vec::new();
        let mut resolved = 0usize;
        while !ready.is_empty() {
            let wave: Vec<ResourceId> = ready.iter().map(|id| (*id).clone()).collect();
            let mut next = VecDeque::new();
            for id in ready.drain(..) {
                resolved += 1;
                if let Some(children) = dependents.get(id) {
                    for child in children {
                        if let Some(d) = indegree.get_mut(child) {
                            *d -= 1;
                            if *d == 0 {
                                next.push_back(*child);
                            }
                        }
                    }
                }
            }
            waves.push(wave);
            ready = next;
        }

        if resolved != self.nodes.len() {
            let stuck: Vec<String> = indegree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(EngineError::CyclicDependency(stuck.join(", ")));
        }

        Ok(waves)
    }
}
