//! Shared fixtures: an in-memory provider with scriptable failures, plus
//! spec and engine builders tuned for fast test runs.

#![allow(dead_code)]

use async_trait::async_trait;
use gridflow_core::{
    ClusterSpec, CostPolicy, FabricMode, InstanceClass, NodePool, RegionSpec, ScalingPolicy,
    SecurityPolicy, StorageSpec, ThroughputTier,
};
use gridflow_engine::{
    DescribeFilter, Engine, EngineConfig, ExecutorConfig, IdempotencyToken, ObservedResource,
    Provider, ProviderError, ProviderResult, ResourceAttrs, ResourceId, ResourceKind,
    ResourceNode, RetryConfig,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn rdma_spec(desired: u32) -> ClusterSpec {
    ClusterSpec {
        name: "hpc".to_string(),
        regions: vec![RegionSpec {
            name: "us-east-1".to_string(),
            primary: true,
        }],
        pool: NodePool {
            instance_class: InstanceClass::new("hpc7g.16xlarge"),
            min: 2,
            desired,
            max: 16,
        },
        fabric: FabricMode::Rdma,
        storage: StorageSpec {
            capacity_gib: 14400,
            throughput: ThroughputTier::Scratch,
        },
        security: SecurityPolicy::default(),
        cost: CostPolicy::default(),
        autoscaling: None,
    }
}

pub fn multi_region_spec(desired: u32) -> ClusterSpec {
    let mut spec = rdma_spec(desired);
    spec.regions.push(RegionSpec {
        name: "us-west-2".to_string(),
        primary: false,
    });
    spec
}

pub fn autoscaled_spec(desired: u32, step: u32) -> ClusterSpec {
    let mut spec = rdma_spec(desired);
    spec.autoscaling = Some(ScalingPolicy {
        interval_secs: 1,
        cooldown_secs: 300,
        scale_out_above: 0.8,
        scale_in_below: 0.2,
        step,
    });
    spec
}

/// Engine with millisecond backoffs so retry paths run fast.
pub fn fast_engine(provider: Arc<MockProvider>) -> Arc<Engine> {
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    };
    Arc::new(Engine::new(
        provider,
        EngineConfig {
            executor: ExecutorConfig {
                wave_concurrency: 8,
                action_timeout: Duration::from_secs(2),
                retry: retry.clone(),
            },
            fetch_retry: retry,
        },
    ))
}

#[derive(Debug, Clone)]
pub enum FailureScript {
    /// Fail this many times, then succeed
    Transient(u32),
    /// Fail every time, unretryable
    Permanent,
}

#[derive(Debug, Clone)]
struct StoredResource {
    provider_id: String,
    attrs: ResourceAttrs,
    exports: BTreeMap<String, String>,
}

#[derive(Default)]
struct Inner {
    resources: BTreeMap<ResourceId, StoredResource>,
    /// Tokens already honored, for create idempotency
    tokens: BTreeMap<String, String>,
    next_id: u64,
    create_failures: BTreeMap<ResourceId, FailureScript>,
    delete_failures: BTreeMap<String, FailureScript>,
    /// Remaining describe calls that must miss this id (eventual consistency)
    invisible: BTreeMap<ResourceId, u32>,
    busy: BTreeSet<ResourceId>,
    create_attempts: BTreeMap<ResourceId, u32>,
}

/// In-memory provider for tests.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<Inner>,
    /// Artificial latency per create, for cancellation tests
    pub create_latency: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_create_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::default(),
            create_latency: Some(latency),
        })
    }

    pub fn script_create_failure(&self, id: &ResourceId, script: FailureScript) {
        self.inner
            .lock()
            .unwrap()
            .create_failures
            .insert(id.clone(), script);
    }

    pub fn script_delete_failure(&self, provider_id: &str, script: FailureScript) {
        self.inner
            .lock()
            .unwrap()
            .delete_failures
            .insert(provider_id.to_string(), script);
    }

    /// Make describe miss this id for the next `misses` calls.
    pub fn hide_for(&self, id: &ResourceId, misses: u32) {
        self.inner.lock().unwrap().invisible.insert(id.clone(), misses);
    }

    pub fn mark_busy(&self, id: &ResourceId) {
        self.inner.lock().unwrap().busy.insert(id.clone());
    }

    pub fn count_kind(&self, kind: ResourceKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .resources
            .values()
            .filter(|r| r.attrs.kind() == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.inner.lock().unwrap().resources.contains_key(id)
    }

    pub fn provider_id_of(&self, id: &ResourceId) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .resources
            .get(id)
            .map(|r| r.provider_id.clone())
    }

    pub fn create_attempts(&self, id: &ResourceId) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .create_attempts
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn exports_for(kind: ResourceKind, serial: u64) -> BTreeMap<String, String> {
        let mut exports = BTreeMap::new();
        match kind {
            ResourceKind::Network => {
                exports.insert("security_group_id".to_string(), format!("sg-{:08x}", serial));
            }
            ResourceKind::Storage => {
                exports.insert(
                    "endpoint".to_string(),
                    format!("fs-{:08x}.mount.internal", serial),
                );
            }
            ResourceKind::ReplicationRule => {
                exports.insert("role_id".to_string(), format!("role-{:08x}", serial));
            }
            _ => {}
        }
        exports
    }

    fn provider_prefix(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Network => "net",
            ResourceKind::PlacementGroup => "pg",
            ResourceKind::Storage => "fs",
            ResourceKind::Endpoint => "vpce",
            ResourceKind::Instance => "i",
            ResourceKind::ReplicationRule => "repl",
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        filter: &DescribeFilter,
    ) -> ProviderResult<Vec<ObservedResource>> {
        let mut inner = self.inner.lock().unwrap();
        let prefix = format!("{}/", filter.cluster);

        let ids: Vec<ResourceId> = inner
            .resources
            .iter()
            .filter(|(id, r)| {
                r.attrs.kind() == kind
                    && id.as_str().starts_with(&prefix)
                    && filter
                        .ids
                        .as_ref()
                        .map(|wanted| wanted.contains(id))
                        .unwrap_or(true)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut out = Vec::new();
        for id in ids {
            // Simulate eventually consistent listings.
            if let Some(misses) = inner.invisible.get_mut(&id) {
                if *misses > 0 {
                    *misses -= 1;
                    continue;
                }
            }
            let busy = inner.busy.contains(&id);
            let stored = inner.resources.get(&id).unwrap();
            out.push(ObservedResource {
                id: id.clone(),
                provider_id: stored.provider_id.clone(),
                attrs: stored.attrs.clone(),
                exports: stored.exports.clone(),
                busy,
            });
        }
        Ok(out)
    }

    async fn create(
        &self,
        node: &ResourceNode,
        token: &IdempotencyToken,
    ) -> ProviderResult<String> {
        if let Some(latency) = self.create_latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().unwrap();
        *inner.create_attempts.entry(node.id.clone()).or_insert(0) += 1;

        // Idempotency: a token we already honored returns the same resource.
        if let Some(existing) = inner.tokens.get(token.as_str()) {
            return Ok(existing.clone());
        }

        match inner.create_failures.get_mut(&node.id) {
            Some(FailureScript::Permanent) => {
                return Err(ProviderError::Permanent(format!(
                    "quota exceeded creating {}",
                    node.id
                )));
            }
            Some(FailureScript::Transient(remaining)) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ProviderError::Transient(format!(
                        "rate limited creating {}",
                        node.id
                    )));
                }
            }
            None => {}
        }

        inner.next_id += 1;
        let serial = inner.next_id;
        let kind = node.kind();
        let provider_id = format!("{}-{:08x}", Self::provider_prefix(kind), serial);

        inner.resources.insert(
            node.id.clone(),
            StoredResource {
                provider_id: provider_id.clone(),
                attrs: node.attrs.clone(),
                exports: Self::exports_for(kind, serial),
            },
        );
        inner
            .tokens
            .insert(token.as_str().to_string(), provider_id.clone());
        Ok(provider_id)
    }

    async fn update(&self, provider_id: &str, attrs: &ResourceAttrs) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let stored = inner
            .resources
            .values_mut()
            .find(|r| r.provider_id == provider_id)
            .ok_or_else(|| {
                ProviderError::Permanent(format!("no such resource: {}", provider_id))
            })?;
        stored.attrs = attrs.clone();
        Ok(())
    }

    async fn delete(&self, provider_id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();

        match inner.delete_failures.get_mut(provider_id) {
            Some(FailureScript::Permanent) => {
                return Err(ProviderError::Permanent(format!(
                    "deletion refused for {}",
                    provider_id
                )));
            }
            Some(FailureScript::Transient(remaining)) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ProviderError::Transient(format!(
                        "rate limited deleting {}",
                        provider_id
                    )));
                }
            }
            None => {}
        }

        let id = inner
            .resources
            .iter()
            .find(|(_, r)| r.provider_id == provider_id)
            .map(|(id, _)| id.clone());
        match id {
            Some(id) => {
                inner.resources.remove(&id);
                inner.tokens.retain(|_, v| v.as_str() != provider_id);
                Ok(())
            }
            // Deleting something already gone is fine; the diff engine
            // reconciles from observed state anyway.
            None => Ok(()),
        }
    }
}
