//! Simulation state.
//!
//! `SimulationState` owns every mutable model: agents, transactions, the
//! central RTGS queue (Queue 2), the event journal, and the collateral
//! event trail. Agents additionally carry their own Queue 1 (per-agent
//! hold queue) directly on the `Agent` struct.
//!
//! # Critical invariants
//!
//! 1. INV-CONSERVATION: sum of all agent balances is constant across ticks.
//! 2. Transaction uniqueness: each transaction ID appears exactly once.
//! 3. Queue validity: every transaction ID in `rtgs_queue` or any agent's
//!    `queue1` exists in `transactions`.

use std::collections::BTreeMap;

use crate::models::agent::Agent;
use crate::models::collateral_event::CollateralEvent;
use crate::models::event::{Event, EventLog};
use crate::models::queue_index::AgentQueueIndex;
use crate::models::transaction::Transaction;

/// Complete simulation state.
///
/// # Example
///
/// ```rust
/// use payment_simulator_core_rs::{Agent, SimulationState};
///
/// let bank_a = Agent::new("BANK_A".to_string(), 1_000_000, 0);
/// let bank_b = Agent::new("BANK_B".to_string(), 2_000_000, 0);
///
/// let state = SimulationState::new(vec![bank_a, bank_b]);
/// assert_eq!(state.num_agents(), 2);
/// assert_eq!(state.queue_size(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct SimulationState {
    agents: BTreeMap<String, Agent>,
    transactions: BTreeMap<String, Transaction>,

    /// Queue 2: system-wide priority queue of transaction IDs awaiting
    /// liquidity, sorted by `(declared_rtgs_priority desc, submission_tick
    /// asc, tx_id asc)` at drain time.
    rtgs_queue: Vec<String>,

    event_log: EventLog,

    /// Collateral post/withdraw/hold decisions, in emission order.
    pub collateral_events: Vec<CollateralEvent>,

    /// Agent-indexed view of Queue 2 for O(1) per-agent lookups. Must be
    /// rebuilt after any modification to `rtgs_queue` via
    /// `rebuild_queue2_index()`.
    queue2_index: AgentQueueIndex,
}

impl SimulationState {
    pub fn new(agents: Vec<Agent>) -> Self {
        let agents_map = agents
            .into_iter()
            .map(|agent| (agent.id().to_string(), agent))
            .collect();

        Self {
            agents: agents_map,
            transactions: BTreeMap::new(),
            rtgs_queue: Vec::new(),
            event_log: EventLog::new(),
            collateral_events: Vec::new(),
            queue2_index: AgentQueueIndex::new(),
        }
    }

    /// Reconstruct state from its components (checkpoint restoration).
    ///
    /// # Errors
    ///
    /// Returns an error string if `rtgs_queue` or any agent's `queue1`
    /// references a transaction ID absent from `transactions`.
    pub fn from_parts(
        agents: BTreeMap<String, Agent>,
        transactions: BTreeMap<String, Transaction>,
        rtgs_queue: Vec<String>,
    ) -> Result<Self, String> {
        for tx_id in &rtgs_queue {
            if !transactions.contains_key(tx_id) {
                return Err(format!(
                    "RTGS queue contains invalid transaction ID: {}",
                    tx_id
                ));
            }
        }

        for (agent_id, agent) in &agents {
            for tx_id in agent.queue1() {
                if !transactions.contains_key(tx_id) {
                    return Err(format!(
                        "Agent {} queue1 contains invalid transaction ID: {}",
                        agent_id, tx_id
                    ));
                }
            }
        }

        let mut state = Self {
            agents,
            transactions,
            rtgs_queue,
            event_log: EventLog::new(),
            collateral_events: Vec::new(),
            queue2_index: AgentQueueIndex::new(),
        };
        state.rebuild_queue2_index();
        Ok(state)
    }

    // -- agents -----------------------------------------------------------

    pub fn get_agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn get_agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    /// All agent IDs, sorted for deterministic iteration.
    pub fn get_all_agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn agents(&self) -> &BTreeMap<String, Agent> {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut BTreeMap<String, Agent> {
        &mut self.agents
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    /// Sum of all agent balances. Invariant: constant across settlement.
    pub fn total_balance(&self) -> i64 {
        self.agents.values().map(|agent| agent.balance()).sum()
    }

    /// Set an agent's unsecured overdraft cap.
    ///
    /// # Panics
    ///
    /// Panics if the agent does not exist or `new_limit` is negative.
    pub fn set_credit_limit(&mut self, agent_id: &str, new_limit: i64) {
        assert!(new_limit >= 0, "credit limit must be non-negative");
        match self.agents.get_mut(agent_id) {
            Some(agent) => agent.set_unsecured_cap(new_limit),
            None => panic!("agent not found: {}", agent_id),
        }
    }

    // -- transactions -------------------------------------------------------

    pub fn get_transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn get_transaction_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.get_mut(id)
    }

    /// # Panics
    ///
    /// Panics if a transaction with the same ID already exists.
    pub fn add_transaction(&mut self, transaction: Transaction) {
        let id = transaction.id().to_string();
        assert!(
            !self.transactions.contains_key(&id),
            "transaction ID {} already exists",
            id
        );
        self.transactions.insert(id, transaction);
    }

    pub fn transactions(&self) -> &BTreeMap<String, Transaction> {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut BTreeMap<String, Transaction> {
        &mut self.transactions
    }

    pub fn num_transactions(&self) -> usize {
        self.transactions.len()
    }

    // -- Queue 2 (central RTGS queue) ---------------------------------------

    /// Append a transaction ID to Queue 2.
    ///
    /// # Panics
    ///
    /// Panics if the transaction does not exist.
    pub fn queue_transaction(&mut self, transaction_id: String) {
        assert!(
            self.transactions.contains_key(&transaction_id),
            "cannot queue non-existent transaction {}",
            transaction_id
        );
        self.rtgs_queue.push(transaction_id);
    }

    pub fn queue_size(&self) -> usize {
        self.rtgs_queue.len()
    }

    pub fn rtgs_queue(&self) -> &Vec<String> {
        &self.rtgs_queue
    }

    pub fn rtgs_queue_mut(&mut self) -> &mut Vec<String> {
        &mut self.rtgs_queue
    }

    /// Sum of remaining amounts for all Queue 2 transactions.
    pub fn queue_value(&self) -> i64 {
        self.rtgs_queue
            .iter()
            .filter_map(|tx_id| self.transactions.get(tx_id))
            .map(|tx| tx.remaining_amount())
            .sum()
    }

    /// Rebuild the Queue 2 agent index. Must be called after any mutation
    /// of `rtgs_queue`.
    pub fn rebuild_queue2_index(&mut self) {
        self.queue2_index.rebuild(&self.rtgs_queue, &self.transactions);
    }

    pub fn queue2_index(&self) -> &AgentQueueIndex {
        &self.queue2_index
    }

    // -- Queue 1 (per-agent hold queues) -------------------------------------

    /// Total number of transactions held across every agent's Queue 1.
    pub fn total_internal_queue_size(&self) -> usize {
        self.agents.values().map(|agent| agent.queue1_size()).sum()
    }

    /// Total value held across every agent's Queue 1.
    pub fn total_internal_queue_value(&self) -> i64 {
        self.agents
            .values()
            .flat_map(|agent| agent.queue1())
            .filter_map(|tx_id| self.transactions.get(tx_id))
            .map(|tx| tx.remaining_amount())
            .sum()
    }

    /// Transactions in any agent's Queue 1 within `urgency_threshold` ticks
    /// of their deadline, as `(agent_id, tx_id)` pairs.
    pub fn get_urgent_transactions(
        &self,
        current_tick: usize,
        urgency_threshold: usize,
    ) -> Vec<(String, String)> {
        let mut urgent = Vec::new();
        for (agent_id, agent) in &self.agents {
            for tx_id in agent.queue1() {
                if let Some(tx) = self.transactions.get(tx_id) {
                    let ticks_to_deadline = tx.deadline_tick().saturating_sub(current_tick);
                    if ticks_to_deadline <= urgency_threshold {
                        urgent.push((agent_id.clone(), tx_id.clone()));
                    }
                }
            }
        }
        urgent
    }

    /// IDs of agents with a non-empty Queue 1.
    pub fn agents_with_queued_transactions(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(_, agent)| agent.queue1_size() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Total Queue 1 value held by a specific agent, or 0 if unknown.
    pub fn agent_queue_value(&self, agent_id: &str) -> i64 {
        match self.agents.get(agent_id) {
            Some(agent) => agent
                .queue1()
                .iter()
                .filter_map(|tx_id| self.transactions.get(tx_id))
                .map(|tx| tx.remaining_amount())
                .sum(),
            None => 0,
        }
    }

    // -- event journal ------------------------------------------------------

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn event_log_mut(&mut self) -> &mut EventLog {
        &mut self.event_log
    }

    pub fn log_event(&mut self, event: Event) {
        self.event_log.log(event);
    }
}
