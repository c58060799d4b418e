//! Reconciliation executor: applies a plan wave by wave.
//!
//! Waves are strictly sequential. Within a wave, actions run concurrently
//! up to a configurable limit and carry their own retry budget, so one
//! stuck resource cannot starve its siblings. A failed action lets the
//! rest of its wave finish, then halts the plan at the wave boundary; the
//! caller gets the partial result and decides what to do with resources
//! already created.

use crate::graph::{ResourceId, ResourceKind};
use crate::observe::Fetcher;
use crate::plan::{Action, ActionKind, Plan};
use crate::provider::{IdempotencyToken, Provider, ProviderError, ProviderResult, RetryConfig};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

/// Cooperative cancellation flag for an in-flight apply.
///
/// Cancelling stops new waves from being scheduled; actions already in
/// flight finish so no resource is left half-created. Completed work is
/// left for the next cycle's diff to reconcile.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Concurrent actions within one wave
    pub wave_concurrency: usize,

    /// Timeout per action attempt, independent of the retry backoff timer.
    /// A hung provider call counts as a transient failure.
    pub action_timeout: Duration,

    /// Per-action retry budget
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            wave_concurrency: 8,
            action_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry classification of a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Outcome of one attempted action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Human-readable action label, e.g. "create hpc/us-east-1/instance/node-0001"
    pub action: String,

    pub resource: ResourceId,
    pub kind: ActionKind,

    /// Provider-side identifier, present after a successful create/replace
    pub provider_id: Option<String>,

    /// Attempts consumed
    pub attempts: u32,

    /// Error text when the action failed
    pub error: Option<String>,

    /// Classification of the final error
    pub class: Option<ErrorClass>,
}

impl ActionOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Structured result of one apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub completed: Vec<ActionOutcome>,
    pub failed: Vec<ActionOutcome>,

    /// Labels of actions in waves that never started
    pub not_attempted: Vec<String>,

    /// The apply was cancelled before all waves were scheduled
    pub cancelled: bool,

    pub duration_ms: u64,
}

impl ExecutionResult {
    /// True only when every planned action completed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty() && !self.cancelled
    }
}

/// Applies plans against the provider.
pub struct Executor {
    provider: Arc<dyn Provider>,
    fetcher: Fetcher,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(provider: Arc<dyn Provider>, fetcher: Fetcher, config: ExecutorConfig) -> Self {
        Self {
            provider,
            fetcher,
            config,
        }
    }

    /// Execute the plan wave by wave.
    ///
    /// Execution-time failures never surface as an `Err`; they are scoped
    /// to their action and reported in the [`ExecutionResult`].
    pub async fn apply(&self, cluster: &str, plan: &Plan, cancel: &CancelHandle) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult::default();
        let total = plan.waves.len();

        for (index, wave) in plan.waves.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Apply cancelled before wave {}/{}", index + 1, total);
                result.cancelled = true;
                Self::mark_not_attempted(&mut result, &plan.waves[index..]);
                break;
            }

            tracing::info!(
                "Executing wave {}/{} ({} actions, {:?} mode)",
                index + 1,
                total,
                wave.len(),
                plan.mode
            );

            // Build the attempt futures up front so the stream itself
            // borrows nothing; the resulting future stays spawnable.
            let attempts: Vec<_> = wave
                .iter()
                .map(|action| self.run_action(cluster, action))
                .collect();
            let outcomes: Vec<ActionOutcome> = futures_util::stream::iter(attempts)
                .buffer_unordered(self.config.wave_concurrency)
                .collect()
                .await;

            let mut wave_failed = false;
            for outcome in outcomes {
                if outcome.is_failed() {
                    tracing::warn!(
                        "Action {} failed after {} attempts: {}",
                        outcome.action,
                        outcome.attempts,
                        outcome.error.as_deref().unwrap_or("unknown")
                    );
                    wave_failed = true;
                    result.failed.push(outcome);
                } else {
                    result.completed.push(outcome);
                }
            }

            // Fail fast at wave granularity; in drain mode this matters
            // even more since a surviving dependency may still be
            // referenced by whatever failed to delete.
            if wave_failed {
                Self::mark_not_attempted(&mut result, &plan.waves[index + 1..]);
                break;
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Apply finished: {} completed, {} failed, {} not attempted ({} ms)",
            result.completed.len(),
            result.failed.len(),
            result.not_attempted.len(),
            result.duration_ms
        );
        result
    }

    fn mark_not_attempted(result: &mut ExecutionResult, waves: &[Vec<Action>]) {
        for wave in waves {
            for action in wave {
                result.not_attempted.push(action.label());
            }
        }
    }

    /// Run one action with its own retry budget and per-attempt timeout.
    async fn run_action(&self, cluster: &str, action: &Action) -> ActionOutcome {
        let token = IdempotencyToken::for_resource(&action.node.id);
        let max = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max {
            match timeout(
                self.config.action_timeout,
                self.dispatch(cluster, action, &token),
            )
            .await
            {
                Ok(Ok(provider_id)) => {
                    return ActionOutcome {
                        action: action.label(),
                        resource: action.node.id.clone(),
                        kind: action.kind,
                        provider_id: provider_id.or_else(|| action.provider_id.clone()),
                        attempts: attempt + 1,
                        error: None,
                        class: None,
                    };
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(
                        "Transient failure on {} (attempt {}/{}): {}",
                        action.label(),
                        attempt + 1,
                        max,
                        e
                    );
                    last_error = e.to_string();
                }
                Ok(Err(e)) => {
                    return ActionOutcome {
                        action: action.label(),
                        resource: action.node.id.clone(),
                        kind: action.kind,
                        provider_id: action.provider_id.clone(),
                        attempts: attempt + 1,
                        error: Some(e.to_string()),
                        class: Some(ErrorClass::Permanent),
                    };
                }
                Err(_) => {
                    // A hung call must not stall its wave; treated as
                    // transient and retried per policy.
                    last_error = format!(
                        "timed out after {:?} (attempt {}/{})",
                        self.config.action_timeout,
                        attempt + 1,
                        max
                    );
                    tracing::warn!("{} {}", action.label(), last_error);
                }
            }

            if attempt + 1 < max {
                sleep(self.config.retry.delay_for_attempt(attempt)).await;
            }
        }

        ActionOutcome {
            action: action.label(),
            resource: action.node.id.clone(),
            kind: action.kind,
            provider_id: action.provider_id.clone(),
            attempts: max,
            error: Some(format!("retry budget exhausted: {}", last_error)),
            class: Some(ErrorClass::Transient),
        }
    }

    /// One attempt of one action. Creates are tagged with the
    /// deterministic client-request token and confirmed visible before
    /// the action counts as completed.
    async fn dispatch(
        &self,
        cluster: &str,
        action: &Action,
        token: &IdempotencyToken,
    ) -> ProviderResult<Option<String>> {
        let kind = action.node.kind();
        match action.kind {
            ActionKind::Create => {
                let provider_id = self.provider.create(&action.node, token).await?;
                self.confirm_visible(cluster, &action.node.id, kind).await?;
                Ok(Some(provider_id))
            }
            ActionKind::Update => {
                let provider_id = Self::require_provider_id(action)?;
                self.provider.update(provider_id, &action.node.attrs).await?;
                Ok(None)
            }
            ActionKind::Replace => {
                let provider_id = Self::require_provider_id(action)?;
                self.provider.delete(provider_id).await?;
                let new_id = self.provider.create(&action.node, token).await?;
                self.confirm_visible(cluster, &action.node.id, kind).await?;
                Ok(Some(new_id))
            }
            ActionKind::Delete => {
                let provider_id = Self::require_provider_id(action)?;
                self.provider.delete(provider_id).await?;
                Ok(None)
            }
        }
    }

    async fn confirm_visible(
        &self,
        cluster: &str,
        id: &ResourceId,
        kind: ResourceKind,
    ) -> ProviderResult<()> {
        self.fetcher.await_visible(cluster, id, kind).await?;
        Ok(())
    }

    fn require_provider_id(action: &Action) -> ProviderResult<&str> {
        action.provider_id.as_deref().ok_or_else(|| {
            ProviderError::Permanent(format!(
                "{} has no recorded provider id",
                action.node.id
            ))
        })
    }
}
