//! Parsing of the `cluster` node and its children.

use super::{first_bool, first_float, first_integer, first_string, prop_bool, prop_string};
use crate::error::{Result, SpecError};
use crate::model::{
    ClusterSpec, CostPolicy, FabricMode, IngressRule, InstanceClass, NodePool, RegionSpec,
    ScalingPolicy, SecurityPolicy, StorageSpec, ThroughputTier,
};
use kdl::KdlNode;

/// Parse a `cluster "name" { ... }` node.
pub fn parse_cluster(node: &KdlNode) -> Result<ClusterSpec> {
    let name = first_string(node)
        .ok_or_else(|| SpecError::InvalidSpec("cluster requires a name".to_string()))?;

    let mut regions = Vec::new();
    let mut pool = None;
    let mut fabric = FabricMode::Standard;
    let mut storage = None;
    let mut security = SecurityPolicy::default();
    let mut cost = CostPolicy::default();
    let mut autoscaling = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "region" => regions.push(parse_region(child)?),
                "pool" => pool = Some(parse_pool(child)?),
                "fabric" => {
                    let mode = first_string(child).ok_or_else(|| {
                        SpecError::InvalidSpec("fabric requires a mode argument".to_string())
                    })?;
                    fabric = mode
                        .parse::<FabricMode>()
                        .map_err(SpecError::InvalidSpec)?;
                }
                "storage" => storage = Some(parse_storage(child)?),
                "security" => security = parse_security(child)?,
                "cost" => cost = parse_cost(child)?,
                "autoscaling" => autoscaling = Some(parse_autoscaling(child)?),
                other => {
                    return Err(SpecError::InvalidSpec(format!(
                        "unknown cluster child node: {}",
                        other
                    )));
                }
            }
        }
    }

    let pool =
        pool.ok_or_else(|| SpecError::InvalidSpec("cluster requires a pool node".to_string()))?;
    let storage = storage
        .ok_or_else(|| SpecError::InvalidSpec("cluster requires a storage node".to_string()))?;

    // A single-region spec may omit primary=#true; the sole region is it.
    if regions.len() == 1 && !regions[0].primary {
        regions[0].primary = true;
    }

    Ok(ClusterSpec {
        name,
        regions,
        pool,
        fabric,
        storage,
        security,
        cost,
        autoscaling,
    })
}

fn parse_region(node: &KdlNode) -> Result<RegionSpec> {
    let name = first_string(node)
        .ok_or_else(|| SpecError::InvalidSpec("region requires a name".to_string()))?;
    Ok(RegionSpec {
        name,
        primary: prop_bool(node, "primary").unwrap_or(false),
    })
}

fn parse_pool(node: &KdlNode) -> Result<NodePool> {
    let mut instance_class = None;
    let mut min = 0u32;
    let mut desired = None;
    let mut max = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "instance_class" => instance_class = first_string(child).map(InstanceClass::new),
                "min" => min = u32_field(child, "min")?,
                "desired" => desired = Some(u32_field(child, "desired")?),
                "max" => max = Some(u32_field(child, "max")?),
                other => {
                    return Err(SpecError::InvalidSpec(format!(
                        "unknown pool child node: {}",
                        other
                    )));
                }
            }
        }
    }

    let instance_class = instance_class
        .ok_or_else(|| SpecError::InvalidSpec("pool requires instance_class".to_string()))?;
    let desired =
        desired.ok_or_else(|| SpecError::InvalidSpec("pool requires desired".to_string()))?;

    Ok(NodePool {
        instance_class,
        min,
        desired,
        // max defaults to desired for fixed-size pools
        max: max.unwrap_or(desired),
    })
}

fn parse_storage(node: &KdlNode) -> Result<StorageSpec> {
    let mut capacity_gib = None;
    let mut throughput = ThroughputTier::Standard;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "capacity_gib" => capacity_gib = Some(u32_field(child, "capacity_gib")?),
                "throughput" => {
                    let tier = first_string(child).ok_or_else(|| {
                        SpecError::InvalidSpec("throughput requires an argument".to_string())
                    })?;
                    throughput = tier
                        .parse::<ThroughputTier>()
                        .map_err(SpecError::InvalidSpec)?;
                }
                other => {
                    return Err(SpecError::InvalidSpec(format!(
                        "unknown storage child node: {}",
                        other
                    )));
                }
            }
        }
    }

    Ok(StorageSpec {
        capacity_gib: capacity_gib
            .ok_or_else(|| SpecError::InvalidSpec("storage requires capacity_gib".to_string()))?,
        throughput,
    })
}

fn parse_security(node: &KdlNode) -> Result<SecurityPolicy> {
    let mut policy = SecurityPolicy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "encrypt_at_rest" => {
                    policy.encrypt_at_rest = first_bool(child).unwrap_or(false);
                }
                "ingress" => policy.ingress.push(parse_ingress(child)?),
                other => {
                    return Err(SpecError::InvalidSpec(format!(
                        "unknown security child node: {}",
                        other
                    )));
                }
            }
        }
    }

    Ok(policy)
}

fn parse_ingress(node: &KdlNode) -> Result<IngressRule> {
    let protocol = first_string(node)
        .ok_or_else(|| SpecError::InvalidSpec("ingress requires a protocol".to_string()))?;
    let ports = prop_string(node, "ports")
        .ok_or_else(|| SpecError::InvalidSpec("ingress requires ports=\"from-to\"".to_string()))?;
    let source_cidr = prop_string(node, "from")
        .ok_or_else(|| SpecError::InvalidSpec("ingress requires from=\"cidr\"".to_string()))?;

    let (port_from, port_to) = match ports.split_once('-') {
        Some((from, to)) => (parse_port(from)?, parse_port(to)?),
        None => {
            let port = parse_port(&ports)?;
            (port, port)
        }
    };

    Ok(IngressRule {
        protocol,
        port_from,
        port_to,
        source_cidr,
    })
}

fn parse_port(s: &str) -> Result<u16> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| SpecError::InvalidSpec(format!("invalid port: {}", s)))
}

fn parse_cost(node: &KdlNode) -> Result<CostPolicy> {
    let mut policy = CostPolicy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "spot_eligible" => policy.spot_eligible = first_bool(child).unwrap_or(false),
                "vpc_endpoints" => policy.vpc_endpoints = first_bool(child).unwrap_or(false),
                other => {
                    return Err(SpecError::InvalidSpec(format!(
                        "unknown cost child node: {}",
                        other
                    )));
                }
            }
        }
    }

    Ok(policy)
}

fn parse_autoscaling(node: &KdlNode) -> Result<ScalingPolicy> {
    let mut policy = ScalingPolicy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "interval_secs" => policy.interval_secs = u64_field(child, "interval_secs")?,
                "cooldown_secs" => policy.cooldown_secs = u64_field(child, "cooldown_secs")?,
                "scale_out_above" => {
                    policy.scale_out_above = float_field(child, "scale_out_above")?;
                }
                "scale_in_below" => {
                    policy.scale_in_below = float_field(child, "scale_in_below")?;
                }
                "step" => policy.step = u32_field(child, "step")?,
                other => {
                    return Err(SpecError::InvalidSpec(format!(
                        "unknown autoscaling child node: {}",
                        other
                    )));
                }
            }
        }
    }

    Ok(policy)
}

fn int_field(node: &KdlNode, name: &str) -> Result<i128> {
    let value = first_integer(node)
        .ok_or_else(|| SpecError::InvalidSpec(format!("{} requires an integer argument", name)))?;
    if value < 0 {
        return Err(SpecError::InvalidSpec(format!(
            "{} must not be negative",
            name
        )));
    }
    Ok(value)
}

fn u32_field(node: &KdlNode, name: &str) -> Result<u32> {
    let value = int_field(node, name)?;
    u32::try_from(value)
        .map_err(|_| SpecError::InvalidSpec(format!("{} is out of range: {}", name, value)))
}

fn u64_field(node: &KdlNode, name: &str) -> Result<u64> {
    let value = int_field(node, name)?;
    u64::try_from(value)
        .map_err(|_| SpecError::InvalidSpec(format!("{} is out of range: {}", name, value)))
}

fn float_field(node: &KdlNode, name: &str) -> Result<f64> {
    first_float(node)
        .ok_or_else(|| SpecError::InvalidSpec(format!("{} requires a numeric argument", name)))
}
