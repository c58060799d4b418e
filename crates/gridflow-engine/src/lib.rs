//! GridFlow reconciliation engine
//!
//! Converges a declared HPC cluster topology (compute pool, RDMA-capable
//! network fabric, shared parallel filesystem, cross-region replication)
//! against what a cloud provider actually has, with dependency-correct
//! ordering and bounded retries.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                ClusterSpec (gridflow-core)          │
//! └──────────────────────┬─────────────────────────────┘
//!                        │
//! ┌──────────────────────▼─────────────────────────────┐
//! │                 gridflow-engine                     │
//! │  ┌───────────┐   ┌───────────┐   ┌──────────────┐  │
//! │  │   Graph   │──▶│ Diff/Plan │──▶│   Executor   │  │
//! │  │  builder  │   │  (waves)  │   │ (wave-by-wave│  │
//! │  └───────────┘   └─────▲─────┘   │  concurrent) │  │
//! │                        │         └──────┬───────┘  │
//! │                  ┌─────┴─────┐          │          │
//! │                  │  Fetcher  │◀─────────┘          │
//! │                  │ (observed)│                     │
//! │                  └─────┬─────┘                     │
//! │  ┌──────────────┐      │                           │
//! │  │  Autoscale   │──────┘  trait Provider { ... }   │
//! │  │     loop     │                                  │
//! │  └──────────────┘                                  │
//! └──────────────────────┬─────────────────────────────┘
//!                        │
//!             ┌──────────▼──────────┐
//!             │   cloud provider    │
//!             │   implementation    │
//!             └─────────────────────┘
//! ```
//!
//! One cycle flows Model → Graph → (Fetcher ∥ Graph) → Plan → Executor →
//! refreshed observed state, which seeds the next cycle. Spec and graph
//! errors abort a cycle before any provider mutation; execution errors are
//! scoped to their action and wave and reported structurally.

pub mod autoscale;
pub mod error;
pub mod executor;
pub mod graph;
pub mod observe;
pub mod outputs;
pub mod plan;
pub mod provider;
pub mod reconcile;
pub mod state;

// Re-exports
pub use autoscale::{AutoscaleLoop, CapacitySignal, LoopState, TickOutcome};
pub use error::{EngineError, Result};
pub use executor::{
    ActionOutcome, CancelHandle, ErrorClass, ExecutionResult, Executor, ExecutorConfig,
};
pub use graph::{
    Graph, PlacementStrategy, ResourceAttrs, ResourceId, ResourceKind, ResourceNode,
};
pub use observe::{Fetcher, ObservedResource, ObservedState};
pub use outputs::{CapacityOutputs, ClusterOutputs, FabricHints};
pub use plan::{Action, ActionKind, Plan, PlanMode, PlanSummary, diff, teardown};
pub use provider::{
    DescribeFilter, IdempotencyToken, Provider, ProviderError, ProviderResult, RetryConfig,
};
pub use reconcile::{CycleReport, Engine, EngineConfig};
pub use state::{ScalingState, StateLock, StateStore};
