//! Observed state: what the provider says currently exists.
//!
//! A snapshot is taken at the start of every reconciliation cycle and is
//! read-only for that cycle. It is a cache; the provider remains the
//! source of truth, and the next cycle fetches fresh.

use crate::error::Result;
use crate::graph::{Graph, ResourceAttrs, ResourceId, ResourceKind};
use crate::provider::{DescribeFilter, Provider, ProviderError, ProviderResult, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::sleep;

/// One resource as the provider reported it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Stable engine identifier the resource is tagged with
    pub id: ResourceId,

    /// Provider-side identifier (e.g. "i-0abc...")
    pub provider_id: String,

    /// Current attributes, in the same typed shape as desired attributes
    pub attrs: ResourceAttrs,

    /// Provider-side identifiers this resource exposes beyond its own id
    /// (fabric security group, storage mount endpoint, replication role)
    pub exports: BTreeMap<String, String>,

    /// For instances: currently running work and not safe to terminate
    pub busy: bool,
}

impl ObservedResource {
    pub fn kind(&self) -> ResourceKind {
        self.attrs.kind()
    }

    pub fn export(&self, key: &str) -> Option<&str> {
        self.exports.get(key).map(|s| s.as_str())
    }
}

/// Snapshot of all observed resources for one cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservedState {
    resources: BTreeMap<ResourceId, ObservedResource>,
}

impl ObservedState {
    pub fn insert(&mut self, resource: ObservedResource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ObservedResource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = &ObservedResource> {
        self.resources.values()
    }
}

/// Fetches observed state through the provider, absorbing its
/// eventually-consistent describe semantics with bounded retries.
#[derive(Clone)]
pub struct Fetcher {
    provider: Arc<dyn Provider>,
    retry: RetryConfig,
}

impl Fetcher {
    pub fn new(provider: Arc<dyn Provider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    /// Snapshot the observed state for every kind the graph references,
    /// scoped to the cluster. Transient describe failures are retried with
    /// backoff; a permanent failure aborts the cycle before any mutation.
    pub async fn snapshot(&self, cluster: &str, graph: &Graph) -> Result<ObservedState> {
        let mut state = ObservedState::default();
        let filter = DescribeFilter::cluster(cluster);

        for kind in graph.kinds() {
            let resources = self.describe_with_retry(kind, &filter).await?;
            for resource in resources {
                state.insert(resource);
            }
        }

        tracing::debug!(
            "Observed {} resources for cluster {}",
            state.len(),
            cluster
        );
        Ok(state)
    }

    /// List one kind, scoped to the cluster, retrying transient failures.
    pub async fn describe(
        &self,
        kind: ResourceKind,
        cluster: &str,
    ) -> Result<Vec<ObservedResource>> {
        let filter = DescribeFilter::cluster(cluster);
        Ok(self.describe_with_retry(kind, &filter).await?)
    }

    /// Read-after-write: wait for a just-created resource to become
    /// visible in the provider's describe output. The listing is
    /// eventually consistent, so "not there yet" is expected for a few
    /// attempts and only becomes an error once the bounded budget runs out.
    pub async fn await_visible(
        &self,
        cluster: &str,
        id: &ResourceId,
        kind: ResourceKind,
    ) -> ProviderResult<ObservedResource> {
        let filter = DescribeFilter::one(cluster, id.clone());

        for attempt in 0..self.retry.max_attempts {
            match self.provider.describe(kind, &filter).await {
                Ok(resources) => {
                    if let Some(found) = resources.into_iter().find(|r| &r.id == id) {
                        return Ok(found);
                    }
                    // Created but not listed yet.
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Describe of {} failed transiently: {}", id, e);
                }
                Err(e) => return Err(e),
            }

            if attempt + 1 < self.retry.max_attempts {
                sleep(self.retry.delay_for_attempt(attempt)).await;
            }
        }

        Err(ProviderError::Transient(format!(
            "{} not visible after {} describe attempts",
            id, self.retry.max_attempts
        )))
    }

    async fn describe_with_retry(
        &self,
        kind: ResourceKind,
        filter: &DescribeFilter,
    ) -> ProviderResult<Vec<ObservedResource>> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match self.provider.describe(kind, filter).await {
                Ok(resources) => return Ok(resources),
                Err(e) if e.is_transient() => {
                    tracing::warn!("Describe {} failed transiently: {}", kind, e);
                    last_err = Some(e);
                    if attempt + 1 < self.retry.max_attempts {
                        sleep(self.retry.delay_for_attempt(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| ProviderError::Transient("describe retries exhausted".into())))
    }
}
