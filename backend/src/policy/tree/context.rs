// Evaluation context for decision tree expression evaluation.
//
// Builds field values from simulation state for expression evaluation.
// Exposes transaction fields, agent fields, derived fields, and system state.

use crate::orchestrator::CostRates;
use crate::{Agent, SimulationState, Transaction};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during context evaluation
#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("Field '{0}' not found in evaluation context")]
    FieldNotFound(String),

    #[error("Invalid field type conversion for '{0}'")]
    InvalidFieldType(String),
}

/// Evaluation context for decision tree expression evaluation.
///
/// Contains field values extracted from simulation state (transaction, agent, system).
/// Numeric fields are stored as f64 for uniform arithmetic; the sender/receiver ids
/// are kept separately since decision trees occasionally branch on them directly.
///
/// # Field Categories
///
/// **Transaction Fields**: amount, remaining_amount, settled_amount, arrival_tick,
/// deadline_tick, priority, is_split, is_past_deadline, is_overdue.
///
/// **Agent Fields**: balance, unsecured_cap, allowed_overdraft_limit, available_credit,
/// credit_used, is_using_credit, queue1_size, posted_collateral, max_collateral_capacity,
/// remaining_collateral_capacity, collateral_utilization.
///
/// **Derived Fields**: ticks_to_deadline, queue_age, queue1_liquidity_gap,
/// queue1_total_value, headroom, queue2_count_for_agent, queue2_nearest_deadline,
/// ticks_to_nearest_queue2_deadline.
///
/// **System Fields**: current_tick, system_tick, rtgs_queue_size, queue2_size,
/// rtgs_queue_value, total_agents, day, system_tick_in_day, total_txns_today.
///
/// **Cost Fields**: cost_overdraft_bps_per_tick, cost_delay_per_tick_per_cent,
/// cost_collateral_bps_per_tick, cost_split_friction, cost_deadline_penalty,
/// cost_delay_this_tx_one_tick, cost_overdraft_this_amount_one_tick.
///
/// Agent state registers are not flattened into `fields`; they're read through
/// the `state_register[<key>]` operand form, resolved separately by
/// `get_field`/`has_field`.
#[derive(Debug, Clone)]
pub struct EvalContext {
    fields: HashMap<String, f64>,
    strings: HashMap<String, String>,
    state_registers: HashMap<String, f64>,
}

/// Extracts `<key>` out of a `state_register[<key>]` operand name.
fn state_register_key(name: &str) -> Option<&str> {
    name.strip_prefix("state_register[")
        .and_then(|rest| rest.strip_suffix(']'))
}

impl EvalContext {
    /// Build an evaluation context from simulation state.
    ///
    /// # Example
    ///
    /// ```rust
    /// use payment_simulator_core_rs::policy::tree::EvalContext;
    /// use payment_simulator_core_rs::{Agent, Transaction, SimulationState};
    /// use payment_simulator_core_rs::orchestrator::CostRates;
    ///
    /// let agent = Agent::new("BANK_A".to_string(), 1_000_000, 0);
    /// let tx = Transaction::new("BANK_A".to_string(), "BANK_B".to_string(), 100_000, 0, 100);
    /// let state = SimulationState::new(vec![agent.clone()]);
    /// let cost_rates = CostRates::default();
    ///
    /// let context = EvalContext::build(&tx, &agent, &state, 100, &cost_rates, 50);
    /// let balance = context.get_field("balance").unwrap();
    /// assert_eq!(balance, 1_000_000.0);
    /// ```
    pub fn build(
        tx: &Transaction,
        agent: &Agent,
        state: &SimulationState,
        tick: usize,
        cost_rates: &CostRates,
        ticks_per_day: usize,
    ) -> Self {
        let mut fields = HashMap::new();
        let mut strings = HashMap::new();

        // Transaction fields
        fields.insert("amount".to_string(), tx.amount() as f64);
        fields.insert("remaining_amount".to_string(), tx.remaining_amount() as f64);
        fields.insert("settled_amount".to_string(), tx.amount_settled() as f64);
        fields.insert("arrival_tick".to_string(), tx.arrival_tick() as f64);
        fields.insert("deadline_tick".to_string(), tx.deadline_tick() as f64);
        fields.insert("priority".to_string(), tx.declared_rtgs_priority() as f64);
        fields.insert(
            "is_split".to_string(),
            if tx.parent_tx_id().is_some() { 1.0 } else { 0.0 },
        );
        fields.insert(
            "is_past_deadline".to_string(),
            if tick > tx.deadline_tick() { 1.0 } else { 0.0 },
        );
        fields.insert(
            "is_overdue".to_string(),
            if tx.is_overdue() { 1.0 } else { 0.0 },
        );
        fields.insert(
            "is_divisible".to_string(),
            if tx.is_divisible() { 1.0 } else { 0.0 },
        );

        strings.insert("sender_id".to_string(), tx.sender_id().to_string());
        strings.insert("receiver_id".to_string(), tx.receiver_id().to_string());
        strings.insert("tx_id".to_string(), tx.id().to_string());

        // Agent fields
        fields.insert("balance".to_string(), agent.balance() as f64);
        fields.insert("unsecured_cap".to_string(), agent.unsecured_cap() as f64);
        fields.insert(
            "allowed_overdraft_limit".to_string(),
            agent.allowed_overdraft_limit() as f64,
        );
        fields.insert(
            "available_credit".to_string(),
            agent.available_credit() as f64,
        );
        let credit_used = if agent.balance() < 0 { -agent.balance() } else { 0 };
        fields.insert("credit_used".to_string(), credit_used as f64);
        fields.insert(
            "is_using_credit".to_string(),
            if agent.balance() < 0 { 1.0 } else { 0.0 },
        );
        fields.insert("queue1_size".to_string(), agent.queue1_size() as f64);
        fields.insert(
            "posted_collateral".to_string(),
            agent.posted_collateral() as f64,
        );
        fields.insert(
            "max_collateral_capacity".to_string(),
            agent.max_collateral_capacity() as f64,
        );
        let remaining_capacity = agent.max_collateral_capacity() - agent.posted_collateral();
        fields.insert(
            "remaining_collateral_capacity".to_string(),
            remaining_capacity as f64,
        );
        let max_cap = agent.max_collateral_capacity() as f64;
        let collateral_utilization = if max_cap > 0.0 {
            agent.posted_collateral() as f64 / max_cap
        } else {
            0.0
        };
        fields.insert("collateral_utilization".to_string(), collateral_utilization);

        let haircut = agent.collateral_haircut();
        let required_collateral_for_usage = if credit_used > agent.unsecured_cap() {
            let uncovered = (credit_used - agent.unsecured_cap()) as f64;
            if haircut < 1.0 {
                uncovered / (1.0 - haircut)
            } else {
                f64::INFINITY
            }
        } else {
            0.0
        };
        fields.insert(
            "required_collateral_for_usage".to_string(),
            required_collateral_for_usage,
        );
        let excess_collateral =
            (agent.posted_collateral() as f64 - required_collateral_for_usage).max(0.0);
        fields.insert("excess_collateral".to_string(), excess_collateral);

        let overdraft_limit = agent.allowed_overdraft_limit() as f64;
        let overdraft_utilization = if overdraft_limit > 0.0 {
            credit_used as f64 / overdraft_limit
        } else {
            0.0
        };
        fields.insert("overdraft_utilization".to_string(), overdraft_utilization);

        strings.insert("agent_id".to_string(), agent.id().to_string());

        // Derived fields
        let ticks_to_deadline = tx.deadline_tick() as i64 - tick as i64;
        fields.insert("ticks_to_deadline".to_string(), ticks_to_deadline as f64);

        let queue_age = tick.saturating_sub(tx.arrival_tick());
        fields.insert("queue_age".to_string(), queue_age as f64);

        let mut queue1_total_value = 0i64;
        for tx_id in agent.queue1() {
            if let Some(tx_in_queue) = state.get_transaction(tx_id) {
                queue1_total_value += tx_in_queue.remaining_amount();
            }
        }
        fields.insert("queue1_total_value".to_string(), queue1_total_value as f64);

        let queue1_liquidity_gap = (queue1_total_value - agent.available_credit()).max(0);
        fields.insert(
            "queue1_liquidity_gap".to_string(),
            queue1_liquidity_gap as f64,
        );

        let headroom = agent.available_credit() - queue1_total_value;
        fields.insert("headroom".to_string(), headroom as f64);

        // System fields
        fields.insert("current_tick".to_string(), tick as f64);
        fields.insert("system_tick".to_string(), tick as f64);
        fields.insert("rtgs_queue_size".to_string(), state.queue_size() as f64);
        fields.insert("queue2_size".to_string(), state.queue_size() as f64);
        fields.insert("rtgs_queue_value".to_string(), state.queue_value() as f64);
        fields.insert("total_agents".to_string(), state.num_agents() as f64);

        // Time/day fields
        let system_tick_in_day = tick % ticks_per_day;
        let day = tick / ticks_per_day;
        let day_start_tick = tick - system_tick_in_day;
        fields.insert("system_tick_in_day".to_string(), system_tick_in_day as f64);
        fields.insert("day".to_string(), day as f64);

        let total_txns_today = state
            .transactions()
            .values()
            .filter(|t| t.arrival_tick() >= day_start_tick && t.arrival_tick() <= tick)
            .count();
        fields.insert("total_txns_today".to_string(), total_txns_today as f64);

        let queue2_count = state
            .rtgs_queue()
            .iter()
            .filter(|tx_id| {
                state
                    .get_transaction(tx_id)
                    .map(|t| t.sender_id() == agent.id())
                    .unwrap_or(false)
            })
            .count();
        fields.insert("queue2_count_for_agent".to_string(), queue2_count as f64);

        let queue2_nearest_deadline = state
            .rtgs_queue()
            .iter()
            .filter_map(|tx_id| state.get_transaction(tx_id))
            .filter(|t| t.sender_id() == agent.id())
            .map(|t| t.deadline_tick())
            .min();
        let ticks_to_nearest_queue2_deadline = match queue2_nearest_deadline {
            Some(deadline) => deadline.saturating_sub(tick) as f64,
            None => f64::INFINITY,
        };
        fields.insert(
            "queue2_nearest_deadline".to_string(),
            queue2_nearest_deadline.map(|d| d as f64).unwrap_or(f64::INFINITY),
        );
        fields.insert(
            "ticks_to_nearest_queue2_deadline".to_string(),
            ticks_to_nearest_queue2_deadline,
        );

        // Cost fields
        fields.insert(
            "cost_overdraft_bps_per_tick".to_string(),
            cost_rates.overdraft_bps_per_tick,
        );
        fields.insert(
            "cost_delay_per_tick_per_cent".to_string(),
            cost_rates.delay_cost_per_tick_per_cent,
        );
        fields.insert(
            "cost_collateral_bps_per_tick".to_string(),
            cost_rates.collateral_cost_per_tick_bps,
        );
        fields.insert(
            "cost_split_friction".to_string(),
            cost_rates.split_friction_cost as f64,
        );
        fields.insert(
            "cost_deadline_penalty".to_string(),
            cost_rates.deadline_penalty as f64,
        );

        let amount_f64 = tx.remaining_amount() as f64;
        let delay_cost_one_tick = amount_f64 * cost_rates.delay_cost_per_tick_per_cent;
        fields.insert("cost_delay_this_tx_one_tick".to_string(), delay_cost_one_tick);

        let overdraft_cost_one_tick = (cost_rates.overdraft_bps_per_tick / 10_000.0) * amount_f64;
        fields.insert(
            "cost_overdraft_this_amount_one_tick".to_string(),
            overdraft_cost_one_tick,
        );

        // Agent state registers, read back through the `state_register[<key>]`
        // operand form so trees can read values written by a previous
        // SetStateRegister action.
        let mut state_registers = HashMap::new();
        for (key, value) in agent.state_registers() {
            state_registers.insert(key.clone(), *value as f64);
        }

        Self {
            fields,
            strings,
            state_registers,
        }
    }

    pub fn get_field(&self, name: &str) -> Result<f64, ContextError> {
        if let Some(key) = state_register_key(name) {
            return self
                .state_registers
                .get(key)
                .copied()
                .ok_or_else(|| ContextError::FieldNotFound(name.to_string()));
        }
        self.fields
            .get(name)
            .copied()
            .ok_or_else(|| ContextError::FieldNotFound(name.to_string()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        if let Some(key) = state_register_key(name) {
            return self.state_registers.contains_key(key);
        }
        self.fields.contains_key(name)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(|s| s.as_str())
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(|s| s.as_str()).collect()
    }
}
