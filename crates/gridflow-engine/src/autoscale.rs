//! Autoscaling control loop.
//!
//! On a fixed interval the loop samples an external capacity signal and
//! computes a clamped target capacity. When a change is due and the
//! cooldown has elapsed, it pushes a patched spec through the regular
//! reconcile pipeline. State machine: Idle -> Evaluating -> (Scaling ->
//! Cooldown | Idle).

use crate::error::{EngineError, Result};
use crate::executor::CancelHandle;
use crate::graph::ResourceKind;
use crate::reconcile::{CycleReport, Engine};
use crate::state::{ScalingState, StateStore};
use async_trait::async_trait;
use chrono::Utc;
use gridflow_core::{ClusterSpec, ScalingPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Control-loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Evaluating,
    Scaling,
    Cooldown,
}

/// External capacity signal collaborator: queue depth, utilization, or any
/// scalar load metric, normalized by the supplier.
#[async_trait]
pub trait CapacitySignal: Send + Sync {
    async fn sample(&self) -> anyhow::Result<f64>;
}

/// What one tick decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TickOutcome {
    /// Signal in band, signal unavailable, or already at the clamp
    NoChange { reason: String },

    /// A change is due but the cooldown window has not elapsed
    CooldownActive { remaining_secs: i64 },

    /// Capacity was changed through a reconcile cycle
    Scaled {
        from: u32,
        to: u32,
        report: CycleReport,
    },
}

/// The autoscaling control loop for one cluster.
///
/// Owns the [`ScalingState`] exclusively; nothing else mutates it.
pub struct AutoscaleLoop {
    engine: Arc<Engine>,
    signal: Arc<dyn CapacitySignal>,
    store: StateStore,
    state: ScalingState,
    loop_state: LoopState,
}

impl AutoscaleLoop {
    /// Build the loop, restoring persisted scaling state when present.
    pub async fn new(
        engine: Arc<Engine>,
        signal: Arc<dyn CapacitySignal>,
        store: StateStore,
        spec: &ClusterSpec,
    ) -> Result<Self> {
        let state = store
            .load_or(ScalingState::new(spec.pool.desired))
            .await?;
        Ok(Self {
            engine,
            signal,
            store,
            state,
            loop_state: LoopState::Idle,
        })
    }

    pub fn desired(&self) -> u32 {
        self.state.desired
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    /// One evaluation tick.
    ///
    /// A scale-down below the count of non-drainable instances fails with
    /// `ScaleDownBlocked` and leaves the state untouched; the next tick
    /// retries.
    pub async fn tick(
        &mut self,
        spec: &ClusterSpec,
        cancel: &CancelHandle,
    ) -> Result<TickOutcome> {
        let policy = spec.autoscaling.as_ref().ok_or_else(|| {
            EngineError::StateError("autoscaling tick on a spec without a policy".to_string())
        })?;

        self.loop_state = LoopState::Evaluating;
        tracing::debug!("Autoscale {} -> evaluating", spec.name);

        let signal = match self.signal.sample().await {
            Ok(value) => value,
            Err(e) => {
                // Never treat a missing signal as scale-to-zero.
                tracing::warn!("Capacity signal unavailable, holding capacity: {}", e);
                self.loop_state = LoopState::Idle;
                return Ok(TickOutcome::NoChange {
                    reason: format!("capacity signal unavailable: {}", e),
                });
            }
        };

        let current = self.state.desired;
        let target = Self::target_capacity(spec, policy, current, signal);

        if target == current {
            tracing::debug!(
                "Autoscale {}: signal {:.2} in band, staying at {}",
                spec.name,
                signal,
                current
            );
            self.loop_state = LoopState::Idle;
            return Ok(TickOutcome::NoChange {
                reason: format!("signal {:.2} needs no change", signal),
            });
        }

        if let Some(last) = self.state.last_scaled_at {
            let elapsed = Utc::now().signed_duration_since(last);
            let remaining = policy.cooldown_secs as i64 - elapsed.num_seconds();
            if remaining > 0 {
                tracing::debug!(
                    "Autoscale {}: change to {} due but cooling down for {}s more",
                    spec.name,
                    target,
                    remaining
                );
                self.loop_state = LoopState::Cooldown;
                return Ok(TickOutcome::CooldownActive {
                    remaining_secs: remaining,
                });
            }
        }

        if target < current {
            let busy = self.busy_instances(spec).await?;
            if target < busy as u32 {
                self.loop_state = LoopState::Idle;
                return Err(EngineError::ScaleDownBlocked {
                    target,
                    busy: busy as u32,
                });
            }
        }

        tracing::info!(
            "Autoscale {}: scaling {} -> {} (signal {:.2})",
            spec.name,
            current,
            target,
            signal
        );

        self.loop_state = LoopState::Scaling;
        let patched = spec.with_desired(target);
        let report = self.engine.reconcile(&patched, cancel).await?;

        if report.execution.is_success() {
            self.state.desired = target;
            self.state.last_scaled_at = Some(Utc::now());
            self.store.save(&self.state).await?;
            self.loop_state = LoopState::Cooldown;
            tracing::debug!("Autoscale {} -> cooldown", spec.name);
        } else {
            self.loop_state = LoopState::Idle;
            tracing::warn!(
                "Autoscale {}: reconcile did not fully converge, keeping desired {}",
                spec.name,
                current
            );
        }

        Ok(TickOutcome::Scaled {
            from: current,
            to: target,
            report,
        })
    }

    /// Drive ticks on the policy interval until cancelled.
    ///
    /// `ScaleDownBlocked` is logged for operator visibility and the cycle
    /// skipped; any other error stops the loop.
    pub async fn run(&mut self, spec: &ClusterSpec, cancel: &CancelHandle) -> Result<()> {
        let policy = spec.autoscaling.as_ref().ok_or_else(|| {
            EngineError::StateError("autoscaling run on a spec without a policy".to_string())
        })?;
        let lock = self.store.acquire_lock().await?;

        let mut interval = tokio::time::interval(Duration::from_secs(policy.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let outcome = loop {
            interval.tick().await;
            if cancel.is_cancelled() {
                break Ok(());
            }

            match self.tick(spec, cancel).await {
                Ok(TickOutcome::Scaled { from, to, .. }) => {
                    tracing::info!("Autoscale {}: {} -> {}", spec.name, from, to);
                }
                Ok(_) => {}
                Err(EngineError::ScaleDownBlocked { target, busy }) => {
                    tracing::warn!(
                        "Autoscale {}: scale-down to {} blocked by {} busy instances, will retry",
                        spec.name,
                        target,
                        busy
                    );
                }
                Err(e) => break Err(e),
            }
        };

        lock.release().await?;
        outcome
    }

    /// Step policy: out when the signal exceeds the high threshold, in
    /// when it drops under the low one, always clamped to [min, max].
    fn target_capacity(
        spec: &ClusterSpec,
        policy: &ScalingPolicy,
        current: u32,
        signal: f64,
    ) -> u32 {
        if signal > policy.scale_out_above {
            (current + policy.step).min(spec.pool.max)
        } else if signal < policy.scale_in_below {
            current.saturating_sub(policy.step).max(spec.pool.min)
        } else {
            current
        }
    }

    async fn busy_instances(&self, spec: &ClusterSpec) -> Result<usize> {
        let instances = self
            .engine
            .fetcher()
            .describe(ResourceKind::Instance, &spec.name)
            .await?;
        Ok(instances.iter().filter(|r| r.busy).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridflow_core::{
        CostPolicy, FabricMode, InstanceClass, NodePool, RegionSpec, SecurityPolicy, StorageSpec,
        ThroughputTier,
    };

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "hpc".to_string(),
            regions: vec![RegionSpec {
                name: "us-east-1".to_string(),
                primary: true,
            }],
            pool: NodePool {
                instance_class: InstanceClass::new("hpc7g.16xlarge"),
                min: 2,
                desired: 8,
                max: 16,
            },
            fabric: FabricMode::Rdma,
            storage: StorageSpec {
                capacity_gib: 14400,
                throughput: ThroughputTier::Scratch,
            },
            security: SecurityPolicy::default(),
            cost: CostPolicy::default(),
            autoscaling: Some(ScalingPolicy::default()),
        }
    }

    #[test]
    fn test_target_clamps_to_bounds() {
        let spec = spec();
        let policy = spec.autoscaling.clone().unwrap();

        // In band: unchanged.
        assert_eq!(AutoscaleLoop::target_capacity(&spec, &policy, 8, 0.5), 8);
        // Above the high threshold: one step out.
        assert_eq!(AutoscaleLoop::target_capacity(&spec, &policy, 8, 0.95), 9);
        // Clamped at max.
        assert_eq!(AutoscaleLoop::target_capacity(&spec, &policy, 16, 0.95), 16);
        // Below the low threshold: one step in, clamped at min.
        assert_eq!(AutoscaleLoop::target_capacity(&spec, &policy, 8, 0.1), 7);
        assert_eq!(AutoscaleLoop::target_capacity(&spec, &policy, 2, 0.1), 2);
    }
}
