//! Diff/plan engine: desired graph vs. observed state, ordered into waves.
//!
//! A wave is a maximal set of actions with no dependency relation among
//! them; the executor may run a wave concurrently but never crosses a wave
//! boundary early.

use crate::error::Result;
use crate::graph::{Graph, ResourceNode};
use crate::observe::ObservedState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of action to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a new resource
    Create,
    /// Update mutable attributes in place
    Update,
    /// Delete then re-create: the drifted attribute is immutable on the
    /// provider side
    Replace,
    /// Delete a resource
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Replace => write!(f, "replace"),
            ActionKind::Delete => write!(f, "delete"),
        }
    }
}

/// One planned action against one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,

    /// The node the action targets. For deletes of resources no longer in
    /// the desired graph, the node is reconstructed from observed state.
    pub node: ResourceNode,

    /// Provider-side identifier, present for update/replace/delete
    pub provider_id: Option<String>,
}

impl Action {
    /// Stable identifier for result reporting, `"create instance/..."` style.
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.node.id)
    }
}

/// Whether the plan converges toward the spec or tears everything down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Converge,
    Drain,
}

/// Ordered plan: waves of independent actions, executed strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub mode: PlanMode,
    pub waves: Vec<Vec<Action>>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.waves.iter().all(|w| w.is_empty())
    }

    pub fn action_count(&self) -> usize {
        self.waves.iter().map(|w| w.len()).sum()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.waves.iter().flatten()
    }

    fn count(&self, kind: ActionKind) -> usize {
        self.actions().filter(|a| a.kind == kind).count()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.count(ActionKind::Create),
            update: self.count(ActionKind::Update),
            replace: self.count(ActionKind::Replace),
            delete: self.count(ActionKind::Delete),
        }
    }
}

/// Summary of planned actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}

/// Compare the desired graph against observed state.
///
/// Per desired node: absent in observed means Create; present with equal
/// attributes means no action; drifted means Update, or Replace when the
/// provider cannot change that attribute in place. Observed resources with
/// no desired counterpart become Delete actions, ordered last-created-first
/// and scheduled before the create/update waves so freed capacity and names
/// are available to them.
pub fn diff(desired: &Graph, observed: &ObservedState) -> Result<Plan> {
    let mut waves = Vec::new();

    // Orphaned observed resources, torn down in reverse creation order.
    // Rank buckets keep siblings of one kind in a single wave.
    let mut orphans: BTreeMap<u8, Vec<Action>> = BTreeMap::new();
    for resource in observed.resources() {
        if desired.contains(&resource.id) {
            continue;
        }
        let rank = resource.kind().create_rank();
        orphans.entry(rank).or_default().push(Action {
            kind: ActionKind::Delete,
            node: ResourceNode {
                id: resource.id.clone(),
                attrs: resource.attrs.clone(),
                deps: vec![],
            },
            provider_id: Some(resource.provider_id.clone()),
        });
    }
    for (_, wave) in orphans.into_iter().rev() {
        waves.push(wave);
    }

    for ids in desired.waves()? {
        let mut wave = Vec::new();
        for id in ids {
            let Some(node) = desired.get(&id).cloned() else {
                continue;
            };
            match observed.get(&id) {
                None => wave.push(Action {
                    kind: ActionKind::Create,
                    node,
                    provider_id: None,
                }),
                Some(current) if current.attrs == node.attrs => {}
                Some(current) => {
                    let kind = if node.attrs.requires_replace(&current.attrs) {
                        ActionKind::Replace
                    } else {
                        ActionKind::Update
                    };
                    wave.push(Action {
                        kind,
                        node,
                        provider_id: Some(current.provider_id.clone()),
                    });
                }
            }
        }
        if !wave.is_empty() {
            waves.push(wave);
        }
    }

    let plan = Plan {
        mode: PlanMode::Converge,
        waves,
    };
    tracing::debug!("Planned {} ({})", plan.action_count(), plan.summary());
    Ok(plan)
}

/// Full-teardown plan: every observed resource of the graph deleted in
/// reverse topological order. Used by drain mode, where a failed delete in
/// one wave must still block subsequent waves.
pub fn teardown(desired: &Graph, observed: &ObservedState) -> Result<Plan> {
    let mut waves = Vec::new();
    for ids in desired.waves()?.into_iter().rev() {
        let mut wave = Vec::new();
        for id in ids {
            if let Some(current) = observed.get(&id) {
                wave.push(Action {
                    kind: ActionKind::Delete,
                    node: ResourceNode {
                        id: current.id.clone(),
                        attrs: current.attrs.clone(),
                        deps: vec![],
                    },
                    provider_id: Some(current.provider_id.clone()),
                });
            }
        }
        if !wave.is_empty() {
            waves.push(wave);
        }
    }

    // Anything tagged to the cluster but no longer modeled still has to go.
    let mut stray: BTreeMap<u8, Vec<Action>> = BTreeMap::new();
    for resource in observed.resources() {
        if desired.contains(&resource.id) {
            continue;
        }
        stray
            .entry(resource.kind().create_rank())
            .or_default()
            .push(Action {
                kind: ActionKind::Delete,
                node: ResourceNode {
                    id: resource.id.clone(),
                    attrs: resource.attrs.clone(),
                    deps: vec![],
                },
                provider_id: Some(resource.provider_id.clone()),
            });
    }
    let mut stray_waves: Vec<Vec<Action>> = stray.into_values().rev().collect();
    let mut all = Vec::new();
    all.append(&mut stray_waves);
    all.append(&mut waves);

    Ok(Plan {
        mode: PlanMode::Drain,
        waves: all,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, PlacementStrategy, ResourceAttrs, ResourceId, ResourceKind};
    use crate::observe::ObservedResource;
    use gridflow_core::{
        ClusterSpec, CostPolicy, FabricMode, InstanceClass, NodePool, RegionSpec, SecurityPolicy,
        StorageSpec, ThroughputTier,
    };
    use std::collections::BTreeMap;

    fn spec(desired: u32) -> ClusterSpec {
        ClusterSpec {
            name: "hpc".to_string(),
            regions: vec![RegionSpec {
                name: "us-east-1".to_string(),
                primary: true,
            }],
            pool: NodePool {
                instance_class: InstanceClass::new("hpc7g.16xlarge"),
                min: 2,
                desired,
                max: 16,
            },
            fabric: FabricMode::Rdma,
            storage: StorageSpec {
                capacity_gib: 14400,
                throughput: ThroughputTier::Scratch,
            },
            security: SecurityPolicy::default(),
            cost: CostPolicy::default(),
            autoscaling: None,
        }
    }

    fn observe_all(graph: &Graph) -> ObservedState {
        let mut observed = ObservedState::default();
        for (i, node) in graph.nodes().enumerate() {
            observed.insert(ObservedResource {
                id: node.id.clone(),
                provider_id: format!("prov-{:04}", i),
                attrs: node.attrs.clone(),
                exports: BTreeMap::new(),
                busy: false,
            });
        }
        observed
    }

    #[test]
    fn test_fresh_cluster_is_all_creates() {
        let graph = Graph::build(&spec(8)).unwrap();
        let plan = diff(&graph, &ObservedState::default()).unwrap();

        let summary = plan.summary();
        assert_eq!(summary.create, 11);
        assert_eq!(summary.update, 0);
        assert_eq!(summary.delete, 0);

        // All eight instance creates land in a single wave.
        let instance_waves: Vec<usize> = plan
            .waves
            .iter()
            .enumerate()
            .filter(|(_, w)| {
                w.iter()
                    .any(|a| a.node.kind() == ResourceKind::Instance)
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(instance_waves.len(), 1);
        let wave = &plan.waves[instance_waves[0]];
        assert_eq!(
            wave.iter()
                .filter(|a| a.node.kind() == ResourceKind::Instance)
                .count(),
            8
        );
    }

    #[test]
    fn test_converged_cluster_plans_nothing() {
        let graph = Graph::build(&spec(8)).unwrap();
        let observed = observe_all(&graph);
        let plan = diff(&graph, &observed).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_scale_in_deletes_only_removed_instances() {
        let old_graph = Graph::build(&spec(8)).unwrap();
        let observed = observe_all(&old_graph);

        let new_graph = Graph::build(&spec(4)).unwrap();
        let plan = diff(&new_graph, &observed).unwrap();

        let summary = plan.summary();
        assert_eq!(summary.delete, 4);
        assert_eq!(summary.create, 0);
        assert_eq!(summary.update, 0);

        for action in plan.actions() {
            assert_eq!(action.kind, ActionKind::Delete);
            assert_eq!(action.node.kind(), ResourceKind::Instance);
        }
        // Instance deletes precede everything else in the plan (nothing
        // else is planned here, but they must sit in the first wave).
        assert_eq!(plan.waves[0].len(), 4);
    }

    #[test]
    fn test_immutable_drift_is_a_replace() {
        let graph = Graph::build(&spec(2)).unwrap();
        let mut observed = observe_all(&graph);

        let pg_id = ResourceId::new("hpc", "us-east-1", ResourceKind::PlacementGroup, "compute");
        let mut drifted = observed.get(&pg_id).unwrap().clone();
        drifted.attrs = ResourceAttrs::PlacementGroup {
            region: "us-east-1".to_string(),
            strategy: PlacementStrategy::Spread,
        };
        observed.insert(drifted);

        let plan = diff(&graph, &observed).unwrap();
        assert_eq!(plan.summary().replace, 1);
        assert_eq!(plan.action_count(), 1);
    }

    #[test]
    fn test_mutable_drift_is_an_update() {
        let graph = Graph::build(&spec(2)).unwrap();
        let mut observed = observe_all(&graph);

        let fs_id = ResourceId::new("hpc", "us-east-1", ResourceKind::Storage, "shared-fs");
        let mut drifted = observed.get(&fs_id).unwrap().clone();
        drifted.attrs = ResourceAttrs::Storage {
            region: "us-east-1".to_string(),
            capacity_gib: 7200,
            throughput: ThroughputTier::Scratch,
            encrypted: false,
        };
        observed.insert(drifted);

        let plan = diff(&graph, &observed).unwrap();
        assert_eq!(plan.summary().update, 1);
        assert_eq!(plan.action_count(), 1);
    }

    #[test]
    fn test_teardown_reverses_topology() {
        let graph = Graph::build(&spec(4)).unwrap();
        let observed = observe_all(&graph);
        let plan = teardown(&graph, &observed).unwrap();

        assert_eq!(plan.mode, PlanMode::Drain);
        assert_eq!(plan.action_count(), graph.len());

        // The network fabric goes last.
        let last_wave = plan.waves.last().unwrap();
        assert!(
            last_wave
                .iter()
                .any(|a| a.node.kind() == ResourceKind::Network)
        );
        // Instances go before storage, storage before network.
        let wave_of = |kind: ResourceKind| {
            plan.waves
                .iter()
                .position(|w| w.iter().any(|a| a.node.kind() == kind))
                .unwrap()
        };
        assert!(wave_of(ResourceKind::Instance) < wave_of(ResourceKind::Storage));
        assert!(wave_of(ResourceKind::Storage) < wave_of(ResourceKind::Network));
    }
}
