//! GridFlow core: desired-state model for HPC cluster fabrics.
//!
//! This crate defines the [`ClusterSpec`] schema (node pool, network
//! fabric, storage, security/cost policy, autoscaling policy) and the KDL
//! parser that turns a configuration payload into it. Everything here is
//! pure and synchronous; the reconciliation machinery lives in
//! `gridflow-engine`.

pub mod error;
pub mod model;
pub mod parser;

// Re-exports
pub use error::{Result, SpecError};
pub use model::{
    ClusterSpec, CostPolicy, FabricMode, IngressRule, InstanceClass, NodePool, RegionSpec,
    ScalingPolicy, SecurityPolicy, StorageSpec, ThroughputTier,
};
