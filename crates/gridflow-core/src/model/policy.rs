//! Security, cost, and autoscaling policies.

use crate::error::{Result, SpecError};
use serde::{Deserialize, Serialize};

/// One allowed ingress rule on the cluster security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Protocol ("tcp", "udp")
    pub protocol: String,

    /// First port of the allowed range
    pub port_from: u16,

    /// Last port of the allowed range (inclusive)
    pub port_to: u16,

    /// Source CIDR block
    pub source_cidr: String,
}

impl IngressRule {
    pub fn validate(&self) -> Result<()> {
        if self.port_from > self.port_to {
            return Err(SpecError::InvalidSpec(format!(
                "ingress port range {}-{} is inverted",
                self.port_from, self.port_to
            )));
        }
        if self.source_cidr.is_empty() {
            return Err(SpecError::InvalidSpec("ingress source_cidr is empty".into()));
        }
        Ok(())
    }
}

/// Encryption and ingress policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Encrypt storage volumes and filesystems at rest
    pub encrypt_at_rest: bool,

    /// Allowed ingress rules beyond intra-fabric traffic
    pub ingress: Vec<IngressRule>,
}

impl SecurityPolicy {
    pub fn validate(&self) -> Result<()> {
        for rule in &self.ingress {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Cost controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPolicy {
    /// Whether nodes may be provisioned as spot capacity
    pub spot_eligible: bool,

    /// Provision interface VPC endpoints so storage/API traffic stays
    /// off the public network path
    pub vpc_endpoints: bool,
}

/// Autoscaling control-loop policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Evaluation interval in seconds
    pub interval_secs: u64,

    /// Cooldown window after a scaling action, in seconds
    pub cooldown_secs: u64,

    /// Signal value above which the loop scales out
    pub scale_out_above: f64,

    /// Signal value below which the loop scales in
    pub scale_in_below: f64,

    /// Instances added or removed per scaling action
    pub step: u32,
}

impl ScalingPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(SpecError::InvalidSpec(
                "autoscaling interval_secs must be greater than zero".into(),
            ));
        }
        if self.scale_in_below >= self.scale_out_above {
            return Err(SpecError::InvalidSpec(format!(
                "scale_in_below ({}) must be less than scale_out_above ({})",
                self.scale_in_below, self.scale_out_above
            )));
        }
        if self.step == 0 {
            return Err(SpecError::InvalidSpec("autoscaling step must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            cooldown_secs: 300,
            scale_out_above: 0.8,
            scale_in_below: 0.2,
            step: 1,
        }
    }
}
