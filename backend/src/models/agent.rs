//! Agent (bank participant) model.
//!
//! An agent holds a settlement balance, an unsecured credit cap, posted
//! collateral, a per-agent hold queue ("Queue 1"), a string->i64 state
//! register map read by policy trees, and an optional in-tick release
//! budget set by the bank-level decision tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: i64, available: i64 },
    #[error("collateral amount must be positive")]
    InvalidCollateralAmount,
    #[error("collateral capacity exceeded: requested {requested}, remaining capacity {remaining}")]
    CollateralCapacityExceeded { requested: i64, remaining: i64 },
}

/// A bank-level release budget set by the `bank_tree` for the current tick,
/// scoping how much liquidity the payment tree may release this tick.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReleaseBudget {
    pub max_value: i64,
    pub focus_counterparties: Option<Vec<String>>,
    pub max_per_counterparty: Option<i64>,
    /// Running total already consumed this tick.
    pub used: i64,
}

impl ReleaseBudget {
    /// Whether releasing `amount` to `counterparty` still fits the budget.
    pub fn allows(&self, counterparty: &str, amount: i64) -> bool {
        if self.used + amount > self.max_value {
            return false;
        }
        if let Some(focus) = &self.focus_counterparties {
            if !focus.iter().any(|c| c == counterparty) {
                return false;
            }
        }
        if let Some(max_per) = self.max_per_counterparty {
            if amount > max_per {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: String,
    opening_balance: i64,
    balance: i64,
    unsecured_cap: i64,
    posted_collateral: i64,
    max_collateral_capacity: i64,
    /// Haircut applied to posted collateral when computing the allowed
    /// overdraft limit (`0.0` = no haircut). Not named in the distilled
    /// config schema; defaults to `0.0` and may be set per-agent.
    collateral_haircut: f64,
    state_registers: HashMap<String, i64>,
    /// Queue 1: tx_ids this agent has chosen to hold, insertion order.
    queue1: Vec<String>,
    release_budget: Option<ReleaseBudget>,
    last_decision_tick: Option<usize>,
}

impl Agent {
    pub fn new(id: String, opening_balance: i64, unsecured_cap: i64) -> Self {
        assert!(unsecured_cap >= 0, "unsecured_cap must be non-negative");
        Self {
            id,
            opening_balance,
            balance: opening_balance,
            unsecured_cap,
            posted_collateral: 0,
            max_collateral_capacity: 0,
            collateral_haircut: 0.0,
            state_registers: HashMap::new(),
            queue1: Vec::new(),
            release_budget: None,
            last_decision_tick: None,
        }
    }

    pub fn with_collateral_capacity(mut self, max_collateral_capacity: i64) -> Self {
        assert!(max_collateral_capacity >= 0);
        self.max_collateral_capacity = max_collateral_capacity;
        self
    }

    pub fn with_haircut(mut self, haircut: f64) -> Self {
        assert!((0.0..=1.0).contains(&haircut));
        self.collateral_haircut = haircut;
        self
    }

    // -- accessors ------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn opening_balance(&self) -> i64 {
        self.opening_balance
    }
    pub fn balance(&self) -> i64 {
        self.balance
    }
    pub fn unsecured_cap(&self) -> i64 {
        self.unsecured_cap
    }
    pub fn posted_collateral(&self) -> i64 {
        self.posted_collateral
    }
    pub fn max_collateral_capacity(&self) -> i64 {
        self.max_collateral_capacity
    }
    pub fn remaining_collateral_capacity(&self) -> i64 {
        self.max_collateral_capacity - self.posted_collateral
    }
    pub fn collateral_haircut(&self) -> f64 {
        self.collateral_haircut
    }
    pub fn last_decision_tick(&self) -> Option<usize> {
        self.last_decision_tick
    }

    /// `unsecured_cap + floor(posted_collateral * (1 - haircut))` — the cap
    /// on negative balance (INV-CREDIT).
    pub fn allowed_overdraft_limit(&self) -> i64 {
        let haircut_adjusted =
            (self.posted_collateral as f64 * (1.0 - self.collateral_haircut)).floor() as i64;
        self.unsecured_cap + haircut_adjusted
    }

    pub fn available_credit(&self) -> i64 {
        self.allowed_overdraft_limit() + self.balance
    }

    /// Would debiting `amount` keep the agent within INV-CREDIT?
    pub fn can_debit(&self, amount: i64) -> bool {
        self.balance - amount >= -self.allowed_overdraft_limit()
    }

    pub fn queue1(&self) -> &[String] {
        &self.queue1
    }
    pub fn queue1_size(&self) -> usize {
        self.queue1.len()
    }

    pub fn state_registers(&self) -> &HashMap<String, i64> {
        &self.state_registers
    }
    pub fn get_state_register(&self, key: &str) -> i64 {
        *self.state_registers.get(key).unwrap_or(&0)
    }

    pub fn release_budget(&self) -> Option<&ReleaseBudget> {
        self.release_budget.as_ref()
    }

    // -- mutators ---------------------------------------------------------------

    pub fn debit(&mut self, amount: i64) -> Result<(), AgentError> {
        if !self.can_debit(amount) {
            return Err(AgentError::InsufficientLiquidity {
                required: amount,
                available: self.available_credit(),
            });
        }
        self.balance -= amount;
        Ok(())
    }

    pub fn credit(&mut self, amount: i64) {
        self.balance += amount;
    }

    /// Apply a signed balance delta without an `INV-CREDIT` check on the leg itself.
    ///
    /// Used by the LSM bilateral/multilateral passes, which verify feasibility of the
    /// *net* position across all legs of an offset or cycle before committing any of
    /// them — individual legs can momentarily look infeasible even though the net
    /// result never violates the overdraft limit.
    pub fn adjust_balance(&mut self, delta: i64) {
        self.balance += delta;
    }

    pub fn set_unsecured_cap(&mut self, new_cap: i64) {
        assert!(new_cap >= 0);
        self.unsecured_cap = new_cap;
    }

    pub fn post_collateral(&mut self, amount: i64) -> Result<(), AgentError> {
        if amount <= 0 {
            return Err(AgentError::InvalidCollateralAmount);
        }
        let remaining = self.remaining_collateral_capacity();
        if amount > remaining {
            return Err(AgentError::CollateralCapacityExceeded {
                requested: amount,
                remaining,
            });
        }
        self.posted_collateral += amount;
        Ok(())
    }

    /// Withdraw collateral, clamping at zero (never goes negative).
    pub fn withdraw_collateral(&mut self, amount: i64) -> i64 {
        let withdrawn = amount.min(self.posted_collateral).max(0);
        self.posted_collateral -= withdrawn;
        withdrawn
    }

    pub fn set_state_register(&mut self, key: String, value: i64) {
        self.state_registers.insert(key, value);
    }

    pub fn queue1_push(&mut self, tx_id: String) {
        self.queue1.push(tx_id);
    }

    pub fn queue1_remove(&mut self, tx_id: &str) -> bool {
        if let Some(pos) = self.queue1.iter().position(|id| id == tx_id) {
            self.queue1.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn set_release_budget(&mut self, budget: ReleaseBudget) {
        self.release_budget = Some(budget);
    }

    pub fn reset_release_budget(&mut self) {
        self.release_budget = None;
    }

    /// Record a release against the active budget, if any.
    pub fn consume_release_budget(&mut self, amount: i64) {
        if let Some(budget) = self.release_budget.as_mut() {
            budget.used += amount;
        }
    }

    pub fn mark_decision_tick(&mut self, tick: usize) {
        self.last_decision_tick = Some(tick);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_snapshot(
        id: String,
        opening_balance: i64,
        balance: i64,
        unsecured_cap: i64,
        posted_collateral: i64,
        max_collateral_capacity: i64,
        collateral_haircut: f64,
        state_registers: HashMap<String, i64>,
        queue1: Vec<String>,
    ) -> Self {
        Self {
            id,
            opening_balance,
            balance,
            unsecured_cap,
            posted_collateral,
            max_collateral_capacity,
            collateral_haircut,
            state_registers,
            queue1,
            release_budget: None,
            last_decision_tick: None,
        }
    }
}
