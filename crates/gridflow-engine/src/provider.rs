//! Cloud provider boundary.
//!
//! The provider's API semantics (eventual consistency, quota behavior,
//! auth) live behind this trait; the engine only relies on the four
//! primitives and the transient/permanent error classification.

use crate::graph::{ResourceAttrs, ResourceId, ResourceKind, ResourceNode};
use crate::observe::ObservedResource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Provider-side failure, classified for retry eligibility.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Rate limiting, eventual-consistency misses, flaky transport.
    /// Retried with backoff up to the per-action budget.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Quota exceeded, malformed attributes, auth failures.
    /// Never retried.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Filter for describe calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeFilter {
    /// Cluster identity the resources are tagged with
    pub cluster: String,

    /// Restrict to specific resource identifiers; `None` means all of the
    /// kind within the cluster
    pub ids: Option<Vec<ResourceId>>,
}

impl DescribeFilter {
    pub fn cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            ids: None,
        }
    }

    pub fn one(cluster: impl Into<String>, id: ResourceId) -> Self {
        Self {
            cluster: cluster.into(),
            ids: Some(vec![id]),
        }
    }
}

/// Client-request token attached to every create so a retried create after
/// a transient failure never double-provisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Derived deterministically from the resource identifier: stable
    /// across attempts and across cycles, never random.
    pub fn for_resource(id: &ResourceId) -> Self {
        Self(format!("gf-{}", id.as_str().replace('/', "-")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cloud provider abstraction.
///
/// Implementations tag every resource they create with the engine's
/// [`ResourceId`] so describe calls can hand back stable identities.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, e.g. "aws"
    fn name(&self) -> &str;

    /// List observed resources of one kind matching the filter.
    ///
    /// The listing is eventually consistent: a just-created resource may
    /// not appear yet. Callers that need read-after-write go through
    /// [`crate::observe::Fetcher::await_visible`].
    async fn describe(
        &self,
        kind: ResourceKind,
        filter: &DescribeFilter,
    ) -> ProviderResult<Vec<ObservedResource>>;

    /// Create a resource, tagging it with the node's stable identifier;
    /// returns the provider-side identifier. A repeated create carrying
    /// the same token must not provision a second resource.
    async fn create(
        &self,
        node: &ResourceNode,
        token: &IdempotencyToken,
    ) -> ProviderResult<String>;

    /// Update a resource's mutable attributes in place.
    async fn update(&self, provider_id: &str, attrs: &ResourceAttrs) -> ProviderResult<()>;

    /// Delete a resource.
    async fn delete(&self, provider_id: &str) -> ProviderResult<()>;
}

/// Retry policy for provider operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per action
    pub max_attempts: u32,

    /// Initial delay between attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for a zero-based attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}
