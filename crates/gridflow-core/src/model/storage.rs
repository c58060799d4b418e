//! Shared parallel filesystem configuration.

use crate::error::{Result, SpecError};
use serde::{Deserialize, Serialize};

/// Throughput tier of the parallel filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputTier {
    /// General-purpose baseline
    Standard,
    /// Ephemeral high-throughput scratch space
    Scratch,
    /// Replicated, durable high throughput
    Persistent,
}

impl ThroughputTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThroughputTier::Standard => "standard",
            ThroughputTier::Scratch => "scratch",
            ThroughputTier::Persistent => "persistent",
        }
    }
}

impl std::str::FromStr for ThroughputTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(ThroughputTier::Standard),
            "scratch" => Ok(ThroughputTier::Scratch),
            "persistent" => Ok(ThroughputTier::Persistent),
            other => Err(format!("unknown throughput tier: {}", other)),
        }
    }
}

/// One shared filesystem per region, mounted by every instance in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    /// Filesystem capacity in GiB
    pub capacity_gib: u32,

    /// Throughput tier
    pub throughput: ThroughputTier,
}

impl StorageSpec {
    pub fn validate(&self) -> Result<()> {
        if self.capacity_gib == 0 {
            return Err(SpecError::InvalidSpec(
                "storage capacity_gib must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
