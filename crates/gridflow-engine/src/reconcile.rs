//! Engine façade: one reconciliation cycle from spec to result.
//!
//! A cycle is `validate -> build graph -> snapshot observed -> diff ->
//! apply -> outputs`. Everything before `apply` is side-effect free, so a
//! spec or graph problem aborts the cycle before the provider is touched.
//! At most one cycle per cluster identity runs at a time.

use crate::error::{EngineError, Result};
use crate::executor::{CancelHandle, ExecutionResult, Executor, ExecutorConfig};
use crate::graph::Graph;
use crate::observe::{Fetcher, ObservedState};
use crate::outputs::ClusterOutputs;
use crate::plan::{self, PlanSummary};
use crate::provider::{Provider, RetryConfig};
use gridflow_core::ClusterSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Engine tuning; the retry policy is shared by the fetcher and executor.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub fetch_retry: RetryConfig,
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// What the diff decided to do
    pub summary: PlanSummary,

    /// How execution went, action by action
    pub execution: ExecutionResult,

    /// Present only after a fully successful converge cycle
    pub outputs: Option<ClusterOutputs>,
}

impl CycleReport {
    pub fn is_converged(&self) -> bool {
        self.execution.is_success()
    }
}

/// The reconciliation engine for one provider.
pub struct Engine {
    provider: Arc<dyn Provider>,
    fetcher: Fetcher,
    executor: Executor,
    inflight: Mutex<HashSet<String>>,
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        let fetcher = Fetcher::new(provider.clone(), config.fetch_retry.clone());
        let executor = Executor::new(provider.clone(), fetcher.clone(), config.executor);
        Self {
            provider,
            fetcher,
            executor,
            inflight: Mutex::new(HashSet::new()),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Run one converge cycle for the spec.
    pub async fn reconcile(
        &self,
        spec: &ClusterSpec,
        cancel: &CancelHandle,
    ) -> Result<CycleReport> {
        let _guard = self.claim(&spec.name)?;

        let graph = Graph::build(spec)?;
        let observed = self.fetcher.snapshot(&spec.name, &graph).await?;
        let plan = plan::diff(&graph, &observed)?;
        let summary = plan.summary();

        if plan.is_empty() {
            tracing::info!("Cluster {} already converged", spec.name);
            return Ok(CycleReport {
                summary,
                execution: ExecutionResult::default(),
                outputs: Some(ClusterOutputs::collect(spec, &graph, &observed)),
            });
        }

        tracing::info!(
            "Cluster {} via {}: {}",
            spec.name,
            self.provider.name(),
            summary
        );
        let execution = self.executor.apply(&spec.name, &plan, cancel).await;

        let outputs = if execution.is_success() {
            let refreshed = self.fetcher.snapshot(&spec.name, &graph).await?;
            Some(ClusterOutputs::collect(spec, &graph, &refreshed))
        } else {
            None
        };

        Ok(CycleReport {
            summary,
            execution,
            outputs,
        })
    }

    /// Tear the whole cluster down, delete-wave ordering mandatory.
    pub async fn drain(&self, spec: &ClusterSpec, cancel: &CancelHandle) -> Result<CycleReport> {
        let _guard = self.claim(&spec.name)?;

        let graph = Graph::build(spec)?;
        let observed = self.fetcher.snapshot(&spec.name, &graph).await?;
        let plan = plan::teardown(&graph, &observed)?;
        let summary = plan.summary();

        tracing::info!("Draining cluster {}: {}", spec.name, summary);
        let execution = self.executor.apply(&spec.name, &plan, cancel).await;

        Ok(CycleReport {
            summary,
            execution,
            outputs: None,
        })
    }

    /// Fetch the current observed state without mutating anything.
    pub async fn observe(&self, spec: &ClusterSpec) -> Result<ObservedState> {
        let graph = Graph::build(spec)?;
        self.fetcher.snapshot(&spec.name, &graph).await
    }

    /// Single-flight guard: refuse to start a cycle for a cluster that
    /// already has one in flight.
    fn claim(&self, cluster: &str) -> Result<InflightGuard<'_>> {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| EngineError::StateError("single-flight guard poisoned".to_string()))?;
        if !inflight.insert(cluster.to_string()) {
            return Err(EngineError::ApplyInFlight(cluster.to_string()));
        }
        Ok(InflightGuard {
            inflight: &self.inflight,
            cluster: cluster.to_string(),
        })
    }
}

struct InflightGuard<'a> {
    inflight: &'a Mutex<HashSet<String>>,
    cluster: String,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&self.cluster);
        }
    }
}
