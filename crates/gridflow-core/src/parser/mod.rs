//! KDL parser for cluster specifications.
//!
//! The desired state is supplied as a KDL document with a single `cluster`
//! node. The schema is deliberately constrained to the HPC fabric domain;
//! unknown child nodes are rejected rather than ignored.
//!
//! ```kdl
//! cluster "hpc-prod" {
//!     region "us-east-1" primary=#true
//!     region "us-west-2"
//!     pool {
//!         instance_class "hpc7g.16xlarge"
//!         min 2
//!         desired 8
//!         max 16
//!     }
//!     fabric "rdma"
//!     storage {
//!         capacity_gib 14400
//!         throughput "scratch"
//!     }
//!     security {
//!         encrypt_at_rest #true
//!         ingress "tcp" ports="1024-65535" from="10.0.0.0/16"
//!     }
//!     cost {
//!         spot_eligible #false
//!         vpc_endpoints #true
//!     }
//!     autoscaling {
//!         interval_secs 60
//!         cooldown_secs 300
//!         scale_out_above 0.8
//!         scale_in_below 0.2
//!         step 2
//!     }
//! }
//! ```

mod cluster;


use crate::error::{Result, SpecError};
use crate::model::ClusterSpec;
use kdl::{KdlDocument, KdlNode};

/// Parse a KDL document into a [`ClusterSpec`].
///
/// The returned spec is structurally complete but not yet validated; call
/// [`ClusterSpec::validate`] (or use [`ClusterSpec::from_kdl_str`]) before
/// handing it to the engine.
pub fn parse_document(input: &str) -> Result<ClusterSpec> {
    let doc: KdlDocument = input.parse()?;

    let mut cluster = None;
    for node in doc.nodes() {
        match node.name().value() {
            "cluster" => {
                if cluster.is_some() {
                    return Err(SpecError::InvalidSpec(
                        "multiple cluster nodes in one document".to_string(),
                    ));
                }
                cluster = Some(cluster::parse_cluster(node)?);
            }
            other => {
                return Err(SpecError::InvalidSpec(format!(
                    "unknown top-level node: {}",
                    other
                )));
            }
        }
    }

    let spec =
        cluster.ok_or_else(|| SpecError::InvalidSpec("no cluster node found".to_string()))?;
    tracing::debug!(
        "Parsed cluster spec {} ({} regions, desired {})",
        spec.name,
        spec.regions.len(),
        spec.pool.desired
    );
    Ok(spec)
}

/// First positional argument as a string.
pub(crate) fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// First positional argument as an integer.
pub(crate) fn first_integer(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

/// First positional argument as a bool.
pub(crate) fn first_bool(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

/// First positional argument as a float (integers widen).
pub(crate) fn first_float(node: &KdlNode) -> Option<f64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_float().or_else(|| e.value().as_integer().map(|v| v as f64)))
}

/// Named property as a string.
pub(crate) fn prop_string(node: &KdlNode, key: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Named property as a bool.
pub(crate) fn prop_bool(node: &KdlNode, key: &str) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .and_then(|e| e.value().as_bool())
}
