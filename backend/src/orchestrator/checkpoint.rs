//! Checkpoint - Save/Load Simulation State
//!
//! Enables serialization and deserialization of complete orchestrator state
//! for pause/resume and bit-exact replay functionality.
//!
//! This module owns the snapshot data shapes and their pure validation
//! logic only. Building a snapshot from a live `Orchestrator`, and
//! restoring an `Orchestrator` from one, both live in `engine.rs` — that's
//! the only place with access to the orchestrator's private fields.
//!
//! # Critical Invariants
//!
//! - **Determinism**: same seed + config + RNG state produces identical results
//! - **Balance Conservation**: total agent balance preserved across save/load
//! - **Queue Integrity**: no orphaned or duplicate transactions
//! - **Config Matching**: state can only be loaded with a matching config hash

use crate::models::agent::Agent;
use crate::models::transaction::{Transaction, TransactionStatus};
use crate::orchestrator::{CostAccumulator, SimulationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Snapshot Structures
// ============================================================================

/// Complete orchestrator state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Current tick position.
    pub tick: usize,
    /// Ticks per business day (needed to reconstruct `TimeManager`).
    pub ticks_per_day: usize,
    /// Original RNG seed (kept for provenance, not used to restore state).
    pub rng_seed: u64,
    /// Exact xorshift64* internal state at snapshot time.
    pub rng_state: u64,
    /// SHA256 hash of the cost/LSM config in effect (for validation).
    pub config_hash: String,
    /// All agent states.
    pub agents: Vec<AgentSnapshot>,
    /// All transaction states.
    pub transactions: Vec<TransactionSnapshot>,
    /// Queue 2 (RTGS queue) transaction IDs, in order.
    pub rtgs_queue: Vec<String>,
    /// Running cost totals per agent.
    pub accumulated_costs: HashMap<String, CostAccumulator>,
    /// Digest of the event journal up to this point, for replay verification.
    pub event_journal_digest: String,
}

/// Agent state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub opening_balance: i64,
    pub balance: i64,
    pub unsecured_cap: i64,
    pub posted_collateral: i64,
    pub max_collateral_capacity: i64,
    pub collateral_haircut: f64,
    pub state_registers: HashMap<String, i64>,
    pub queue1: Vec<String>,
}

impl AgentSnapshot {
    pub fn from_agent(agent: &Agent) -> Self {
        AgentSnapshot {
            id: agent.id().to_string(),
            opening_balance: agent.opening_balance(),
            balance: agent.balance(),
            unsecured_cap: agent.unsecured_cap(),
            posted_collateral: agent.posted_collateral(),
            max_collateral_capacity: agent.max_collateral_capacity(),
            collateral_haircut: agent.collateral_haircut(),
            state_registers: agent.state_registers().clone(),
            queue1: agent.queue1().to_vec(),
        }
    }

    pub fn to_agent(&self) -> Agent {
        Agent::from_snapshot(
            self.id.clone(),
            self.opening_balance,
            self.balance,
            self.unsecured_cap,
            self.posted_collateral,
            self.max_collateral_capacity,
            self.collateral_haircut,
            self.state_registers.clone(),
            self.queue1.clone(),
        )
    }
}

/// Transaction state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: i64,
    pub amount_settled: i64,
    pub priority: u8,
    pub arrival_tick: usize,
    pub deadline_tick: usize,
    pub is_divisible: bool,
    pub status: TransactionStatus,
    pub settlement_tick: Option<usize>,
    pub overdue_since_tick: Option<usize>,
    pub parent_tx_id: Option<String>,
    pub split_index: Option<usize>,
    pub submission_tick: usize,
    pub declared_rtgs_priority: u8,
}

impl TransactionSnapshot {
    pub fn from_transaction(tx: &Transaction) -> Self {
        TransactionSnapshot {
            id: tx.id().to_string(),
            sender_id: tx.sender_id().to_string(),
            receiver_id: tx.receiver_id().to_string(),
            amount: tx.amount(),
            amount_settled: tx.amount() - tx.remaining_amount(),
            priority: tx.priority(),
            arrival_tick: tx.arrival_tick(),
            deadline_tick: tx.deadline_tick(),
            is_divisible: tx.is_divisible(),
            status: tx.status().clone(),
            settlement_tick: tx.settlement_tick(),
            overdue_since_tick: tx.overdue_since_tick(),
            parent_tx_id: tx.parent_tx_id().map(|s| s.to_string()),
            split_index: tx.split_index(),
            submission_tick: tx.submission_tick(),
            declared_rtgs_priority: tx.declared_rtgs_priority(),
        }
    }

    pub fn to_transaction(&self) -> Transaction {
        Transaction::from_snapshot(
            self.id.clone(),
            self.sender_id.clone(),
            self.receiver_id.clone(),
            self.amount,
            self.amount_settled,
            self.priority,
            self.arrival_tick,
            self.deadline_tick,
            self.is_divisible,
            self.status.clone(),
            self.settlement_tick,
            self.overdue_since_tick,
            self.parent_tx_id.clone(),
            self.split_index,
            self.submission_tick,
            self.declared_rtgs_priority,
        )
    }
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute a deterministic SHA256 hash of a config value.
///
/// Uses canonical JSON serialization with sorted keys so the hash is
/// independent of `HashMap` iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config)?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let canonical = canonicalize(value);
    let json = serde_json::to_string(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a state snapshot's internal integrity:
/// - balance conservation against an externally-known expected total
/// - no orphaned transaction references in any queue
/// - no transaction present in more than one queue
pub fn validate_snapshot(
    snapshot: &StateSnapshot,
    expected_total_balance: i64,
) -> Result<(), SimulationError> {
    let total_balance: i64 = snapshot.agents.iter().map(|a| a.balance).sum();
    if total_balance != expected_total_balance {
        return Err(SimulationError::Integrity(format!(
            "balance conservation violated: expected {expected_total_balance}, got {total_balance}"
        )));
    }

    let tx_ids: HashSet<&str> = snapshot.transactions.iter().map(|t| t.id.as_str()).collect();

    for agent in &snapshot.agents {
        for tx_id in &agent.queue1 {
            if !tx_ids.contains(tx_id.as_str()) {
                return Err(SimulationError::Integrity(format!(
                    "orphaned transaction in agent {} queue1: {tx_id}",
                    agent.id
                )));
            }
        }
    }
    for tx_id in &snapshot.rtgs_queue {
        if !tx_ids.contains(tx_id.as_str()) {
            return Err(SimulationError::Integrity(format!(
                "orphaned transaction in rtgs_queue: {tx_id}"
            )));
        }
    }

    let mut seen: HashMap<&str, String> = HashMap::new();
    for agent in &snapshot.agents {
        for tx_id in &agent.queue1 {
            if let Some(prev) = seen.insert(tx_id.as_str(), format!("agent {}", agent.id)) {
                return Err(SimulationError::Integrity(format!(
                    "duplicate transaction {tx_id} in multiple queues: {prev} and agent {}",
                    agent.id
                )));
            }
        }
    }
    for tx_id in &snapshot.rtgs_queue {
        if let Some(prev) = seen.insert(tx_id.as_str(), "rtgs_queue".to_string()) {
            return Err(SimulationError::Integrity(format!(
                "duplicate transaction {tx_id} in multiple queues: {prev} and rtgs_queue"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_config_hash_is_deterministic() {
        #[derive(Serialize)]
        struct TestConfig {
            value: i32,
            name: String,
        }
        let a = TestConfig { value: 42, name: "test".into() };
        let b = TestConfig { value: 42, name: "test".into() };
        assert_eq!(compute_config_hash(&a).unwrap(), compute_config_hash(&b).unwrap());
    }

    #[test]
    fn compute_config_hash_differs_for_different_configs() {
        #[derive(Serialize)]
        struct TestConfig {
            value: i32,
        }
        let a = TestConfig { value: 42 };
        let b = TestConfig { value: 43 };
        assert_ne!(compute_config_hash(&a).unwrap(), compute_config_hash(&b).unwrap());
    }

    #[test]
    fn validate_snapshot_rejects_balance_mismatch() {
        let snapshot = StateSnapshot {
            tick: 0,
            ticks_per_day: 10,
            rng_seed: 1,
            rng_state: 1,
            config_hash: "abc".into(),
            agents: vec![AgentSnapshot {
                id: "A".into(),
                opening_balance: 100,
                balance: 100,
                unsecured_cap: 0,
                posted_collateral: 0,
                max_collateral_capacity: 0,
                collateral_haircut: 0.0,
                state_registers: HashMap::new(),
                queue1: vec![],
            }],
            transactions: vec![],
            rtgs_queue: vec![],
            accumulated_costs: HashMap::new(),
            event_journal_digest: "d".into(),
        };
        assert!(validate_snapshot(&snapshot, 200).is_err());
        assert!(validate_snapshot(&snapshot, 100).is_ok());
    }

    #[test]
    fn validate_snapshot_rejects_orphaned_queue_reference() {
        let snapshot = StateSnapshot {
            tick: 0,
            ticks_per_day: 10,
            rng_seed: 1,
            rng_state: 1,
            config_hash: "abc".into(),
            agents: vec![AgentSnapshot {
                id: "A".into(),
                opening_balance: 0,
                balance: 0,
                unsecured_cap: 0,
                posted_collateral: 0,
                max_collateral_capacity: 0,
                collateral_haircut: 0.0,
                state_registers: HashMap::new(),
                queue1: vec!["ghost-tx".into()],
            }],
            transactions: vec![],
            rtgs_queue: vec![],
            accumulated_costs: HashMap::new(),
            event_journal_digest: "d".into(),
        };
        assert!(validate_snapshot(&snapshot, 0).is_err());
    }
}
