//! Compute node pool configuration.

use crate::error::{Result, SpecError};
use serde::{Deserialize, Serialize};

/// Instance families that expose an RDMA-capable (EFA-class) interface.
const RDMA_FAMILIES: &[&str] = &[
    "hpc6a", "hpc6id", "hpc7a", "hpc7g", "p4d", "p4de", "p5", "trn1", "c5n", "c6gn", "c6in",
    "m5n", "m6in", "r5n", "r6in", "g4dn",
];

/// Provider instance class, e.g. "hpc7g.16xlarge".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceClass(String);

impl InstanceClass {
    pub fn new(class: impl Into<String>) -> Self {
        Self(class.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The family part of the class ("hpc7g" for "hpc7g.16xlarge").
    pub fn family(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Whether this class can attach an RDMA-capable network interface.
    /// Classes that can also require placement-group co-location to hit
    /// fabric latency targets.
    pub fn supports_rdma(&self) -> bool {
        RDMA_FAMILIES.contains(&self.family())
    }
}

impl std::fmt::Display for InstanceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node pool size bounds and instance class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePool {
    pub instance_class: InstanceClass,

    /// Minimum capacity
    pub min: u32,

    /// Desired capacity; the autoscaler moves this within [min, max]
    pub desired: u32,

    /// Maximum capacity
    pub max: u32,
}

impl NodePool {
    pub fn validate(&self) -> Result<()> {
        if self.instance_class.as_str().is_empty() {
            return Err(SpecError::InvalidSpec("instance_class is empty".into()));
        }
        if self.min > self.desired || self.desired > self.max {
            return Err(SpecError::InvalidSpec(format!(
                "capacity bounds must satisfy min <= desired <= max, got {}/{}/{}",
                self.min, self.desired, self.max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family() {
        assert_eq!(InstanceClass::new("hpc7g.16xlarge").family(), "hpc7g");
        assert_eq!(InstanceClass::new("p5.48xlarge").family(), "p5");
    }

    #[test]
    fn test_rdma_support() {
        assert!(InstanceClass::new("hpc7g.16xlarge").supports_rdma());
        assert!(InstanceClass::new("c5n.18xlarge").supports_rdma());
        assert!(!InstanceClass::new("t3.micro").supports_rdma());
    }
}
