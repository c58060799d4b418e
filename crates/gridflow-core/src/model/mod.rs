//! Desired-state model for an HPC cluster.
//!
//! A [`ClusterSpec`] is the root object the reconciliation engine consumes.
//! It is treated as immutable for the duration of one reconciliation cycle;
//! a new cycle always reads a fresh snapshot.

mod fabric;
mod policy;
mod pool;
mod storage;

pub use fabric::FabricMode;
pub use policy::{CostPolicy, IngressRule, ScalingPolicy, SecurityPolicy};
pub use pool::{InstanceClass, NodePool};
pub use storage::{StorageSpec, ThroughputTier};

use crate::error::{Result, SpecError};
use serde::{Deserialize, Serialize};

/// One region the cluster spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    /// Region name (e.g., "us-east-1")
    pub name: String,

    /// Whether this is the primary region
    pub primary: bool,
}

/// Root desired-state object for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster identity. Keys the single-flight guard and all derived
    /// resource identifiers, so it must be stable across cycles.
    pub name: String,

    /// Regions the cluster spans; exactly one primary, the rest are
    /// replication targets.
    pub regions: Vec<RegionSpec>,

    /// Compute node pool bounds and instance class
    pub pool: NodePool,

    /// Network interconnect class
    pub fabric: FabricMode,

    /// Shared parallel filesystem
    pub storage: StorageSpec,

    /// Encryption and ingress policy
    pub security: SecurityPolicy,

    /// Cost controls (spot eligibility, VPC endpoints)
    pub cost: CostPolicy,

    /// Autoscaling policy; `None` disables the control loop
    pub autoscaling: Option<ScalingPolicy>,
}

impl ClusterSpec {
    /// Parse a spec from a KDL document string and validate it.
    pub fn from_kdl_str(input: &str) -> Result<Self> {
        let spec = crate::parser::parse_document(input)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load and parse a spec from a KDL file.
    pub fn from_kdl_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_kdl_str(&input)
    }

    /// The primary region, if the spec carries one.
    pub fn primary_region(&self) -> Option<&RegionSpec> {
        self.regions.iter().find(|r| r.primary)
    }

    /// Secondary (replication target) regions, in spec order.
    pub fn secondary_regions(&self) -> Vec<&RegionSpec> {
        self.regions.iter().filter(|r| !r.primary).collect()
    }

    /// Whether cross-region replication is in effect.
    pub fn replication_enabled(&self) -> bool {
        self.regions.iter().any(|r| !r.primary)
    }

    /// Return a copy of the spec with a different desired capacity.
    ///
    /// Used by the autoscaling loop; everything except `pool.desired` is
    /// carried over unchanged.
    pub fn with_desired(&self, desired: u32) -> Self {
        let mut spec = self.clone();
        spec.pool.desired = desired;
        spec
    }

    /// Validate all spec invariants. Violations are never retried.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SpecError::InvalidSpec("cluster name is empty".into()));
        }

        self.pool.validate()?;

        let primaries = self.regions.iter().filter(|r| r.primary).count();
        if primaries != 1 {
            return Err(SpecError::InvalidSpec(format!(
                "exactly one primary region required, found {}",
                primaries
            )));
        }
        for (i, region) in self.regions.iter().enumerate() {
            if region.name.is_empty() {
                return Err(SpecError::InvalidSpec("region name is empty".into()));
            }
            if self.regions[..i].iter().any(|r| r.name == region.name) {
                return Err(SpecError::InvalidSpec(format!(
                    "duplicate region: {}",
                    region.name
                )));
            }
        }

        if self.fabric == FabricMode::Rdma && !self.pool.instance_class.supports_rdma() {
            return Err(SpecError::InvalidSpec(format!(
                "instance class {} does not support an RDMA fabric",
                self.pool.instance_class
            )));
        }

        self.storage.validate()?;
        self.security.validate()?;

        if let Some(scaling) = &self.autoscaling {
            scaling.validate()?;
        }

        Ok(())
    }
}
