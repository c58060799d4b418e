//! Network interconnect class.

use serde::{Deserialize, Serialize};

/// The network interconnect class for the compute fabric.
///
/// RDMA-capable mode requires placement-group co-location and a dedicated
/// self-referencing security group for the fabric interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FabricMode {
    /// Ordinary TCP/IP networking
    Standard,
    /// Low-latency RDMA-capable fabric (EFA-class interfaces)
    Rdma,
}

impl FabricMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FabricMode::Standard => "standard",
            FabricMode::Rdma => "rdma",
        }
    }
}

impl std::fmt::Display for FabricMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FabricMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(FabricMode::Standard),
            "rdma" => Ok(FabricMode::Rdma),
            other => Err(format!("unknown fabric mode: {}", other)),
        }
    }
}
