//! Orchestrator - main simulation loop (Phase 4b)
//!
//! Implements the complete tick loop integrating all simulation components.
//!
//! See `engine.rs` for full implementation.

pub mod checkpoint;
pub mod engine;

// Re-export main types for convenience
pub use engine::{
    AgentConfig, CostAccumulator, CostBreakdown, CostRates, Orchestrator, OrchestratorConfig,
    PolicyConfig, SimulationError, SystemMetrics, TickResult,
};

// Re-export checkpoint types
pub use checkpoint::{AgentSnapshot, StateSnapshot, TransactionSnapshot};
