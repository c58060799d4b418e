//! Engine error taxonomy.
//!
//! `InvalidSpec` and `CyclicDependency` abort a cycle before any provider
//! mutation happens. Provider errors carry their retry classification.
//! `ScaleDownBlocked` is non-fatal: the autoscaling loop skips the cycle and
//! retries on the next tick.

use crate::provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] gridflow_core::SpecError),

    #[error("cyclic dependency in resource graph: {0}")]
    CyclicDependency(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("scale-down to {target} blocked by {busy} non-drainable instances")]
    ScaleDownBlocked { target: u32, busy: u32 },

    #[error("a reconciliation for cluster '{0}' is already in flight")]
    ApplyInFlight(String),

    #[error("state file error: {0}")]
    StateError(String),

    #[error("lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
