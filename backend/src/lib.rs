//! Payment Simulator Core - Rust Engine
//!
//! High-performance payment settlement simulator with deterministic execution.
//!
//! # Architecture
//!
//! - **core**: Time management and initialization
//! - **models**: Domain types (Agent, Transaction, State)
//! - **orchestrator**: Main simulation loop
//! - **settlement**: Settlement engines (RTGS, LSM)
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 (cents)
//! 2. All randomness is deterministic (seeded RNG)
//! 3. No kernel operation performs real-time I/O or non-deterministic scheduling

// Module declarations
pub mod arrivals;
pub mod core;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod rng;
pub mod settlement;

// Re-exports for convenience
pub use core::time::TimeManager;
pub use models::{
    agent::{Agent, AgentError},
    event::{Event, EventLog},
    state::SimulationState,
    transaction::{Transaction, TransactionError, TransactionStatus},
};
pub use orchestrator::{CostBreakdown, CostRates, Orchestrator, OrchestratorConfig, TickResult};
pub use rng::RngManager;
pub use settlement::{try_settle, try_settle_partial, SettlementError};
