//! Orchestrator engine: the deterministic tick loop.
//!
//! Main simulation loop integrating all components:
//! - Transaction arrivals (deterministic Poisson generation, plus direct
//!   `submit_transaction` injection)
//! - Policy evaluation (bank-level budget, strategic collateral, and
//!   Queue 1 release decisions via `CashManagerPolicy`)
//! - Settlement processing (immediate RTGS, Queue 2 retries, LSM netting)
//! - Cost accrual (liquidity, delay, collateral, deadline, split friction)
//! - Event logging (complete, replayable simulation history)
//!
//! # Tick pipeline
//!
//! Each call to [`Orchestrator::tick`] advances the simulation by exactly
//! one tick, running stages in a fixed order:
//!
//! ```text
//! 1. Arrivals                         (+ any stagger-split releases due this tick)
//! 2. Per agent, in sorted agent_id order:
//!      a. bank_tree            -> release budget / state register decisions
//!      b. strategic_collateral_tree -> pre-settlement collateral posture
//!      c. payment_tree (evaluate_queue) -> release / hold / split / drop / reprioritize
//! 3. LSM pass (bilateral + multilateral netting over Queue 2)
//! 4. Queue 2 drain (retry held transactions against current liquidity)
//! 5. Overdue detection (first transition into Overdue charges a one-time penalty)
//! 6. Cost accrual (one CostAccrual event per agent per tick)
//! 7. End-of-day processing, if this is the last tick of the day
//! 8. Advance tick
//! ```
//!
//! # Determinism
//!
//! All randomness flows through `rng_manager` (seeded xorshift64*). Same
//! seed + same config + same sequence of `submit_transaction` calls always
//! produces an identical event log (bit-exact replay).

use crate::arrivals::{ArrivalConfig, ArrivalGenerator};
use crate::core::time::TimeManager;
use crate::models::agent::{Agent, AgentError, ReleaseBudget};
use crate::models::event::Event;
use crate::models::state::SimulationState;
use crate::models::transaction::{Transaction, TransactionError};
use crate::orchestrator::checkpoint;
use crate::policy::tree::{TreePolicy, TreePolicyError};
use crate::policy::{
    BankDecision, CashManagerPolicy, CollateralDecision, DeadlinePolicy, FifoPolicy,
    LiquidityAwarePolicy, LiquiditySplittingPolicy, MockSplittingPolicy, ReleaseDecision,
};
use crate::rng::RngManager;
use crate::settlement::lsm::{self, LsmConfig};
use crate::settlement::rtgs::{self, SettlementError, SubmissionResult};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, trace};

// ============================================================================
// Configuration types
// ============================================================================

/// Complete orchestrator configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OrchestratorConfig {
    /// Number of ticks per business day.
    pub ticks_per_day: usize,
    /// Number of business days to simulate.
    pub num_days: usize,
    /// RNG seed for deterministic arrival generation.
    pub rng_seed: u64,
    /// Per-agent configuration.
    pub agent_configs: Vec<AgentConfig>,
    /// Cost calculation rates.
    pub cost_rates: CostRates,
    /// LSM configuration.
    pub lsm_config: LsmConfig,
}

/// Per-agent configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier.
    pub id: String,
    /// Opening balance in the settlement account (cents).
    pub opening_balance: i64,
    /// Unsecured daylight overdraft cap (cents).
    pub unsecured_cap: i64,
    /// Maximum collateral the agent may post (cents). `None` means no
    /// collateral facility for this agent.
    pub max_collateral_capacity: Option<i64>,
    /// Haircut applied to posted collateral when computing overdraft
    /// headroom, in `[0.0, 1.0]`.
    pub collateral_haircut: Option<f64>,
    /// Cash manager policy for Queue 1 decisions.
    pub policy: PolicyConfig,
    /// Arrival generation configuration (`None` = no automatic arrivals;
    /// the agent can still receive transactions via `submit_transaction`).
    pub arrival_config: Option<ArrivalConfig>,
}

/// Policy selection for an agent.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PolicyConfig {
    /// Submit all transactions immediately (baseline).
    Fifo,
    /// Prioritize transactions approaching their deadline.
    Deadline { urgency_threshold: usize },
    /// Preserve a liquidity buffer, override for urgency.
    LiquidityAware {
        target_buffer: i64,
        urgency_threshold: usize,
    },
    /// Split large payments when liquidity is constrained.
    LiquiditySplitting {
        max_splits: usize,
        min_split_amount: i64,
    },
    /// Always splits into a fixed number of parts (testing only).
    MockSplitting { num_splits: usize },
    /// A JSON decision-tree policy (`payment_tree` / `bank_tree` /
    /// `strategic_collateral_tree` / `end_of_tick_collateral_tree`).
    FromJson { json: String },
}

/// Cost calculation rates. All monetary fields are in cents.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CostRates {
    /// Overdraft cost, as a fraction of negative balance, charged per tick.
    pub overdraft_bps_per_tick: f64,
    /// Delay cost per tick, as a fraction of queued transaction value.
    pub delay_cost_per_tick_per_cent: f64,
    /// Collateral carry cost per tick, as a fraction of posted collateral.
    pub collateral_cost_per_tick_bps: f64,
    /// End-of-day penalty for each transaction still overdue at EOD.
    pub eod_penalty_per_transaction: i64,
    /// One-time penalty charged the tick a transaction first becomes overdue.
    pub deadline_penalty: i64,
    /// Split friction cost per split: `split_friction_cost * (n - 1)`.
    pub split_friction_cost: i64,
    /// Multiplier applied to delay cost for transactions in `Overdue` status.
    pub overdue_delay_multiplier: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            overdraft_bps_per_tick: 0.001,
            delay_cost_per_tick_per_cent: 0.0001,
            collateral_cost_per_tick_bps: 0.0002,
            eod_penalty_per_transaction: 10_000,
            deadline_penalty: 50_000,
            split_friction_cost: 1_000,
            overdue_delay_multiplier: 5.0,
        }
    }
}

/// Cost breakdown accrued by one agent in one tick. Mirrors
/// [`Event::CostAccrual`]'s field shape exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostBreakdown {
    pub liquidity_cost: i64,
    pub delay_cost: i64,
    pub collateral_cost: i64,
    pub deadline_penalty: i64,
    pub split_friction_cost: i64,
}

impl CostBreakdown {
    pub fn total(&self) -> i64 {
        self.liquidity_cost + self.delay_cost + self.collateral_cost + self.deadline_penalty
            + self.split_friction_cost
    }
}

/// Running totals of costs accrued by one agent over the whole simulation.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CostAccumulator {
    pub total_liquidity_cost: i64,
    pub total_delay_cost: i64,
    pub total_collateral_cost: i64,
    pub total_deadline_penalty: i64,
    pub total_split_friction_cost: i64,
    /// Most negative balance observed (0 if the agent never went negative).
    pub peak_net_debit: i64,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, costs: &CostBreakdown) {
        self.total_liquidity_cost += costs.liquidity_cost;
        self.total_delay_cost += costs.delay_cost;
        self.total_collateral_cost += costs.collateral_cost;
        self.total_deadline_penalty += costs.deadline_penalty;
        self.total_split_friction_cost += costs.split_friction_cost;
    }

    pub fn update_peak_debit(&mut self, current_balance: i64) {
        if current_balance < 0 {
            self.peak_net_debit = self.peak_net_debit.min(current_balance);
        }
    }

    pub fn total(&self) -> i64 {
        self.total_liquidity_cost + self.total_delay_cost + self.total_collateral_cost
            + self.total_deadline_penalty + self.total_split_friction_cost
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Main orchestrator: owns all simulation state and coordinates the tick loop.
pub struct Orchestrator {
    state: SimulationState,
    time_manager: TimeManager,
    rng_manager: RngManager,
    rng_seed: u64,
    policies: HashMap<String, Box<dyn CashManagerPolicy>>,
    arrival_generator: Option<ArrivalGenerator>,
    cost_rates: CostRates,
    lsm_config: LsmConfig,
    ticks_per_day: usize,
    num_days: usize,
    agent_configs: Vec<AgentConfig>,
    accumulated_costs: HashMap<String, CostAccumulator>,
    /// Transactions a `StaggerSplit` decision scheduled for release on a
    /// future tick: `release_tick -> [(agent_id, tx_id), ...]`.
    scheduled_releases: BTreeMap<usize, Vec<(String, String)>>,
}

/// Result of a single tick.
#[derive(Debug, Clone)]
pub struct TickResult {
    pub tick: usize,
    pub num_arrivals: usize,
    pub num_settlements: usize,
    pub num_lsm_releases: usize,
    /// Sum of `CostBreakdown::total()` across all agents this tick.
    pub total_cost_delta: i64,
    /// Every event logged during this tick, in emission order.
    pub events: Vec<Event>,
}

/// Snapshot of system-wide counters, for dashboards and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMetrics {
    pub tick: usize,
    pub day: usize,
    pub total_balance: i64,
    pub queue2_size: usize,
    pub queue2_value: i64,
    pub total_internal_queue_size: usize,
    pub total_internal_queue_value: i64,
    pub event_count: usize,
}

/// Simulation error types.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid deadline: {0}")]
    InvalidDeadline(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("checkpoint config mismatch: expected hash {expected}, found {found}")]
    ConfigMismatch { expected: String, found: String },
    #[error("state integrity error: {0}")]
    Integrity(String),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Policy(#[from] TreePolicyError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Orchestrator {
    /// Create a new orchestrator from configuration.
    pub fn new(config: OrchestratorConfig) -> Result<Self, SimulationError> {
        Self::validate_config(&config)?;

        let agents: Vec<Agent> = config
            .agent_configs
            .iter()
            .map(|ac| {
                let mut agent = Agent::new(ac.id.clone(), ac.opening_balance, ac.unsecured_cap);
                if let Some(cap) = ac.max_collateral_capacity {
                    agent = agent.with_collateral_capacity(cap);
                }
                if let Some(haircut) = ac.collateral_haircut {
                    agent = agent.with_haircut(haircut);
                }
                agent
            })
            .collect();

        let state = SimulationState::new(agents);
        let time_manager = TimeManager::new(config.ticks_per_day);
        let rng_manager = RngManager::new(config.rng_seed);

        let mut policies: HashMap<String, Box<dyn CashManagerPolicy>> = HashMap::new();
        for agent_config in &config.agent_configs {
            let policy: Box<dyn CashManagerPolicy> = match &agent_config.policy {
                PolicyConfig::Fifo => Box::new(FifoPolicy),
                PolicyConfig::Deadline { urgency_threshold } => {
                    Box::new(DeadlinePolicy::new(*urgency_threshold))
                }
                PolicyConfig::LiquidityAware {
                    target_buffer,
                    urgency_threshold,
                } => Box::new(LiquidityAwarePolicy::with_urgency_threshold(
                    *target_buffer,
                    *urgency_threshold,
                )),
                PolicyConfig::LiquiditySplitting {
                    max_splits,
                    min_split_amount,
                } => Box::new(LiquiditySplittingPolicy::new(*max_splits, *min_split_amount)),
                PolicyConfig::MockSplitting { num_splits } => {
                    Box::new(MockSplittingPolicy::new(*num_splits))
                }
                PolicyConfig::FromJson { json } => Box::new(
                    TreePolicy::from_json(json)?.with_ticks_per_day(config.ticks_per_day),
                ),
            };
            policies.insert(agent_config.id.clone(), policy);
        }

        let mut arrival_configs_map: HashMap<String, ArrivalConfig> = HashMap::new();
        for agent_config in &config.agent_configs {
            if let Some(arrival_cfg) = &agent_config.arrival_config {
                arrival_configs_map.insert(agent_config.id.clone(), arrival_cfg.clone());
            }
        }

        let episode_end_tick = config
            .ticks_per_day
            .saturating_mul(config.num_days)
            .saturating_sub(1);
        let arrival_generator = if arrival_configs_map.is_empty() {
            None
        } else {
            let all_agent_ids: Vec<String> =
                config.agent_configs.iter().map(|ac| ac.id.clone()).collect();
            Some(ArrivalGenerator::new(
                arrival_configs_map,
                all_agent_ids,
                episode_end_tick,
            ))
        };

        let mut accumulated_costs = HashMap::new();
        for agent_config in &config.agent_configs {
            accumulated_costs.insert(agent_config.id.clone(), CostAccumulator::new());
        }

        Ok(Self {
            state,
            time_manager,
            rng_manager,
            rng_seed: config.rng_seed,
            policies,
            arrival_generator,
            ticks_per_day: config.ticks_per_day,
            num_days: config.num_days,
            agent_configs: config.agent_configs.clone(),
            cost_rates: config.cost_rates,
            lsm_config: config.lsm_config,
            accumulated_costs,
            scheduled_releases: BTreeMap::new(),
        })
    }

    /// Reconstruct the full configuration that produced this orchestrator,
    /// for config-matching hashes. Policies aren't tracked back to their
    /// originating `AgentConfig` (e.g. parameter overrides applied after
    /// construction), so this reflects the config at `new()` time.
    fn config_snapshot(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            ticks_per_day: self.ticks_per_day,
            num_days: self.num_days,
            rng_seed: self.rng_seed,
            agent_configs: self.agent_configs.clone(),
            cost_rates: self.cost_rates.clone(),
            lsm_config: self.lsm_config.clone(),
        }
    }

    fn validate_config(config: &OrchestratorConfig) -> Result<(), SimulationError> {
        if config.ticks_per_day == 0 {
            return Err(SimulationError::InvalidConfig(
                "ticks_per_day must be > 0".to_string(),
            ));
        }
        if config.num_days == 0 {
            return Err(SimulationError::InvalidConfig(
                "num_days must be > 0".to_string(),
            ));
        }
        if config.agent_configs.is_empty() {
            return Err(SimulationError::InvalidConfig(
                "must have at least one agent".to_string(),
            ));
        }
        let mut ids = std::collections::HashSet::new();
        for agent_config in &config.agent_configs {
            if agent_config.unsecured_cap < 0 {
                return Err(SimulationError::InvalidConfig(format!(
                    "agent {} has negative unsecured_cap",
                    agent_config.id
                )));
            }
            if !ids.insert(&agent_config.id) {
                return Err(SimulationError::InvalidConfig(format!(
                    "duplicate agent ID: {}",
                    agent_config.id
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn current_tick(&self) -> usize {
        self.time_manager.current_tick()
    }

    pub fn current_day(&self) -> usize {
        self.time_manager.current_day()
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Direct mutable access to simulation state. Bypasses orchestrator
    /// invariants; intended for tests and scenario setup only.
    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn event_count(&self) -> usize {
        self.state.event_log().len()
    }

    pub fn get_all_events(&self) -> &[Event] {
        self.state.event_log().events()
    }

    pub fn get_tick_events(&self, tick: usize) -> Vec<&Event> {
        self.state.event_log().events_at_tick(tick)
    }

    pub fn get_costs(&self, agent_id: &str) -> Option<&CostAccumulator> {
        self.accumulated_costs.get(agent_id)
    }

    pub fn all_costs(&self) -> &HashMap<String, CostAccumulator> {
        &self.accumulated_costs
    }

    pub fn get_agent_balance(&self, agent_id: &str) -> Result<i64, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.balance())
            .ok_or_else(|| SimulationError::UnknownAgent(agent_id.to_string()))
    }

    pub fn get_agent_credit_limit(&self, agent_id: &str) -> Result<i64, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.unsecured_cap())
            .ok_or_else(|| SimulationError::UnknownAgent(agent_id.to_string()))
    }

    pub fn get_agent_collateral_posted(&self, agent_id: &str) -> Result<i64, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.posted_collateral())
            .ok_or_else(|| SimulationError::UnknownAgent(agent_id.to_string()))
    }

    pub fn get_agent_allowed_overdraft_limit(
        &self,
        agent_id: &str,
    ) -> Result<i64, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.allowed_overdraft_limit())
            .ok_or_else(|| SimulationError::UnknownAgent(agent_id.to_string()))
    }

    pub fn get_transaction_details(&self, tx_id: &str) -> Result<&Transaction, SimulationError> {
        self.state
            .get_transaction(tx_id)
            .ok_or_else(|| SimulationError::TransactionNotFound(tx_id.to_string()))
    }

    pub fn get_queue2_size(&self) -> usize {
        self.state.queue_size()
    }

    pub fn get_system_metrics(&self) -> SystemMetrics {
        SystemMetrics {
            tick: self.current_tick(),
            day: self.current_day(),
            total_balance: self.state.total_balance(),
            queue2_size: self.state.queue_size(),
            queue2_value: self.state.queue_value(),
            total_internal_queue_size: self.state.total_internal_queue_size(),
            total_internal_queue_value: self.state.total_internal_queue_value(),
            event_count: self.state.event_log().len(),
        }
    }

    // ========================================================================
    // External transaction injection (spec.md 4.1)
    // ========================================================================

    /// Inject a transaction directly into the sender's Queue 1, as if it had
    /// arrived this tick. Does not emit an `Arrival` event (those are
    /// reserved for transactions produced by the arrival generator).
    pub fn submit_transaction(
        &mut self,
        sender_id: &str,
        receiver_id: &str,
        amount: i64,
        deadline_tick: usize,
        priority: u8,
        divisible: bool,
    ) -> Result<String, SimulationError> {
        if self.state.get_agent(sender_id).is_none() {
            return Err(SimulationError::UnknownAgent(sender_id.to_string()));
        }
        if self.state.get_agent(receiver_id).is_none() {
            return Err(SimulationError::UnknownAgent(receiver_id.to_string()));
        }
        if amount <= 0 {
            return Err(SimulationError::InvalidAmount(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let tick = self.current_tick();
        if deadline_tick < tick {
            return Err(SimulationError::InvalidDeadline(format!(
                "deadline_tick {deadline_tick} is before current tick {tick}"
            )));
        }

        let mut tx = Transaction::new(
            sender_id.to_string(),
            receiver_id.to_string(),
            amount,
            tick,
            deadline_tick,
        )
        .with_priority(priority);
        if divisible {
            tx = tx.divisible();
        }
        let tx_id = tx.id().to_string();
        self.state.add_transaction(tx);
        if let Some(agent) = self.state.get_agent_mut(sender_id) {
            agent.queue1_push(tx_id.clone());
        }
        Ok(tx_id)
    }

    // ========================================================================
    // Tick loop
    // ========================================================================

    /// Execute one simulation tick.
    pub fn tick(&mut self) -> Result<TickResult, SimulationError> {
        let tick = self.current_tick();
        let day = self.current_day();
        trace!(tick, day, "tick start");
        let events_start = self.state.event_log().len();
        let mut num_settlements = 0usize;

        // STAGE: releases scheduled by an earlier StaggerSplit decision.
        if let Some(due) = self.scheduled_releases.remove(&tick) {
            for (_agent_id, tx_id) in due {
                if matches!(
                    self.release_to_rtgs(&tx_id, tick)?,
                    SubmissionResult::SettledImmediately { .. }
                ) {
                    num_settlements += 1;
                }
            }
        }

        // STAGE 1: arrivals.
        let mut arrival_events = Vec::new();
        if let Some(generator) = &mut self.arrival_generator {
            let agent_ids = self.state.get_all_agent_ids();
            for agent_id in agent_ids {
                let new_txs = generator.generate_for_agent(&agent_id, tick, &mut self.rng_manager);
                for mut tx in new_txs {
                    tx.mark_queued1()?;
                    let tx_id = tx.id().to_string();
                    arrival_events.push(Event::Arrival {
                        tick,
                        tx_id: tx_id.clone(),
                        sender_id: tx.sender_id().to_string(),
                        receiver_id: tx.receiver_id().to_string(),
                        amount: tx.amount(),
                        deadline_tick: tx.deadline_tick(),
                        priority: tx.declared_rtgs_priority(),
                        is_divisible: tx.is_divisible(),
                    });
                    self.state.add_transaction(tx);
                    if let Some(agent) = self.state.get_agent_mut(&agent_id) {
                        agent.queue1_push(tx_id);
                    }
                }
            }
        }
        let num_arrivals = arrival_events.len();
        for event in arrival_events {
            self.state.log_event(event);
        }

        // STAGE 2: per agent, in sorted order: bank tree, strategic
        // collateral tree, payment tree (release/hold/split/drop/reprioritize),
        // including any immediate RTGS settlement those decisions trigger.
        let agent_ids = self.state.get_all_agent_ids();
        let mut split_friction_charged: HashMap<String, i64> = HashMap::new();

        for agent_id in &agent_ids {
            if let Some(agent) = self.state.get_agent_mut(agent_id) {
                agent.reset_release_budget();
            }

            if let Some(agent_snapshot) = self.state.get_agent(agent_id).cloned() {
                if let Some(policy) = self.policies.get_mut(agent_id) {
                    if let Some(tree_policy) = policy.as_any_mut().downcast_mut::<TreePolicy>() {
                        let bank_decision = tree_policy.evaluate_bank_decision(
                            &agent_snapshot,
                            &self.state,
                            tick,
                            &self.cost_rates,
                        )?;
                        self.apply_bank_decision(agent_id, tick, bank_decision);

                        let collateral_decision = tree_policy.evaluate_strategic_collateral(
                            &agent_snapshot,
                            &self.state,
                            tick,
                            &self.cost_rates,
                        )?;
                        self.apply_collateral_decision(agent_id, tick, collateral_decision)?;
                    }
                }
            }

            // Transactions become observable as Queued1 only once the payment
            // tree actually evaluates them, not at submission/arrival time.
            let pending_in_queue1: Vec<String> = self
                .state
                .get_agent(agent_id)
                .map(|a| a.queue1().to_vec())
                .unwrap_or_default();
            for tx_id in pending_in_queue1 {
                if let Some(tx) = self.state.get_transaction_mut(&tx_id) {
                    if tx.is_pending() {
                        tx.mark_queued1()?;
                    }
                }
            }

            let agent_snapshot = match self.state.get_agent(agent_id) {
                Some(a) => a.clone(),
                None => continue,
            };
            let decisions = match self.policies.get_mut(agent_id) {
                Some(policy) => {
                    policy.evaluate_queue(&agent_snapshot, &self.state, tick, &self.cost_rates)
                }
                None => Vec::new(),
            };

            for decision in decisions {
                let settled = self.apply_release_decision(
                    agent_id,
                    tick,
                    decision,
                    &mut split_friction_charged,
                )?;
                if settled {
                    num_settlements += 1;
                }
            }
        }

        // STAGE 3: LSM pass (bilateral offsets + multilateral cycles over Queue 2).
        let lsm_result = lsm::run_lsm_pass(&mut self.state, &self.lsm_config, tick, self.ticks_per_day);
        for event in lsm_result.replay_events {
            self.state.log_event(event);
        }
        let num_lsm_releases = lsm_result.bilateral_offsets + lsm_result.cycles_settled;
        num_settlements += num_lsm_releases;

        // STAGE 4: Queue 2 drain (retry held transactions in priority order).
        let queue_result = rtgs::process_queue(&mut self.state, tick);
        num_settlements += queue_result.settled_count;

        // STAGE 5: overdue detection. A transaction's first transition into
        // `Overdue` charges a one-time deadline penalty.
        let mut deadline_penalty_charged: HashMap<String, i64> = HashMap::new();
        let queue2_ids = self.state.rtgs_queue().clone();
        for tx_id in queue2_ids {
            let (is_settled, already_overdue, past_deadline, sender_id) = {
                let tx = match self.state.get_transaction(&tx_id) {
                    Some(t) => t,
                    None => continue,
                };
                (
                    tx.is_settled(),
                    tx.is_overdue(),
                    tx.is_past_deadline(tick),
                    tx.sender_id().to_string(),
                )
            };
            if is_settled || !past_deadline {
                continue;
            }
            let first_time = !already_overdue;
            if let Some(tx) = self.state.get_transaction_mut(&tx_id) {
                tx.mark_overdue(tick)?;
            }
            self.state.log_event(Event::Overdue {
                tick,
                tx_id: tx_id.clone(),
                agent_id: sender_id.clone(),
            });
            if first_time {
                let penalty = self.cost_rates.deadline_penalty;
                *deadline_penalty_charged.entry(sender_id.clone()).or_insert(0) += penalty;
                trace!(tx_id = %tx_id, agent_id = %sender_id, penalty, "deadline penalty charged");
                self.state.log_event(Event::DeadlinePenaltyCharged {
                    tick,
                    tx_id,
                    agent_id: sender_id,
                    amount: penalty,
                });
            }
        }

        // STAGE 6: cost accrual, one CostAccrual event per agent per tick.
        let mut total_cost_delta = 0i64;
        for agent_id in &agent_ids {
            let agent = match self.state.get_agent(agent_id) {
                Some(a) => a,
                None => continue,
            };
            let balance = agent.balance();

            let liquidity_cost = if balance < 0 {
                Self::ceil_rate_cost(-balance, self.cost_rates.overdraft_bps_per_tick)
            } else {
                0
            };
            let collateral_cost = Self::ceil_rate_cost(
                agent.posted_collateral(),
                self.cost_rates.collateral_cost_per_tick_bps,
            );

            let mut delay_cost = 0i64;
            for tx_id in agent.queue1() {
                if let Some(tx) = self.state.get_transaction(tx_id) {
                    delay_cost += Self::ceil_rate_cost(
                        tx.remaining_amount(),
                        self.cost_rates.delay_cost_per_tick_per_cent,
                    );
                }
            }
            for tx_id in self.state.rtgs_queue() {
                let Some(tx) = self.state.get_transaction(tx_id) else {
                    continue;
                };
                if tx.sender_id() != agent_id {
                    continue;
                }
                let base = Self::ceil_rate_cost(
                    tx.remaining_amount(),
                    self.cost_rates.delay_cost_per_tick_per_cent,
                );
                delay_cost += if tx.is_overdue() {
                    (base as f64 * self.cost_rates.overdue_delay_multiplier).ceil() as i64
                } else {
                    base
                };
            }

            let deadline_penalty = deadline_penalty_charged.get(agent_id).copied().unwrap_or(0);
            let split_friction_cost =
                split_friction_charged.get(agent_id).copied().unwrap_or(0);

            let costs = CostBreakdown {
                liquidity_cost,
                delay_cost,
                collateral_cost,
                deadline_penalty,
                split_friction_cost,
            };
            let total = costs.total();
            total_cost_delta += total;

            if let Some(accumulator) = self.accumulated_costs.get_mut(agent_id) {
                accumulator.add(&costs);
                accumulator.update_peak_debit(balance);
            }

            if total > 0 {
                self.state.log_event(Event::CostAccrual {
                    tick,
                    agent_id: agent_id.clone(),
                    liquidity_cost,
                    delay_cost,
                    collateral_cost,
                    deadline_penalty,
                    split_friction_cost,
                    total,
                });
            }
        }

        // STAGE 7: end-of-day processing (runs before the tick is advanced).
        if self.time_manager.is_end_of_day() {
            debug!(tick, day, "end of day");
            self.handle_end_of_day(tick, day)?;
        }

        // STAGE 8: advance tick.
        self.time_manager.advance_tick();

        let events = self.state.event_log().events()[events_start..].to_vec();
        debug!(
            tick,
            num_arrivals,
            num_settlements,
            num_lsm_releases,
            total_cost_delta,
            "tick complete"
        );
        Ok(TickResult {
            tick,
            num_arrivals,
            num_settlements,
            num_lsm_releases,
            total_cost_delta,
            events,
        })
    }

    // ========================================================================
    // Decision application
    // ========================================================================

    fn apply_bank_decision(&mut self, agent_id: &str, tick: usize, decision: BankDecision) {
        match decision {
            BankDecision::SetReleaseBudget {
                max_value_to_release,
                focus_counterparties,
                max_per_counterparty,
            } => {
                if let Some(agent) = self.state.get_agent_mut(agent_id) {
                    agent.set_release_budget(ReleaseBudget {
                        max_value: max_value_to_release,
                        focus_counterparties: focus_counterparties.clone(),
                        max_per_counterparty,
                        used: 0,
                    });
                }
                self.state.log_event(Event::BankBudgetSet {
                    tick,
                    agent_id: agent_id.to_string(),
                    max_value: max_value_to_release,
                    focus_counterparties,
                    max_per_counterparty,
                });
            }
            BankDecision::SetStateRegister { key, value } => {
                let value = value.round() as i64;
                if let Some(agent) = self.state.get_agent_mut(agent_id) {
                    agent.set_state_register(key.clone(), value);
                }
                self.state.log_event(Event::StateRegisterSet {
                    tick,
                    agent_id: agent_id.to_string(),
                    key,
                    value,
                });
            }
            BankDecision::NoAction => {}
        }
    }

    fn apply_collateral_decision(
        &mut self,
        agent_id: &str,
        tick: usize,
        decision: CollateralDecision,
    ) -> Result<(), SimulationError> {
        match decision {
            CollateralDecision::Post {
                amount,
                reason,
                auto_withdraw_after_ticks: _,
            } => {
                if amount <= 0 {
                    return Ok(());
                }
                let new_total = {
                    let agent = self
                        .state
                        .get_agent_mut(agent_id)
                        .ok_or_else(|| SimulationError::UnknownAgent(agent_id.to_string()))?;
                    agent.post_collateral(amount)?;
                    agent.posted_collateral()
                };
                self.state.log_event(Event::CollateralPosted {
                    tick,
                    agent_id: agent_id.to_string(),
                    amount,
                    reason: format!("{reason:?}"),
                    new_total,
                });
            }
            CollateralDecision::Withdraw { amount, reason } => {
                if amount <= 0 {
                    return Ok(());
                }
                let (withdrawn, new_total) = {
                    let agent = self
                        .state
                        .get_agent_mut(agent_id)
                        .ok_or_else(|| SimulationError::UnknownAgent(agent_id.to_string()))?;
                    let withdrawn = agent.withdraw_collateral(amount);
                    (withdrawn, agent.posted_collateral())
                };
                if withdrawn > 0 {
                    self.state.log_event(Event::CollateralReleased {
                        tick,
                        agent_id: agent_id.to_string(),
                        amount: withdrawn,
                        reason: format!("{reason:?}"),
                        new_total,
                    });
                }
            }
            CollateralDecision::Hold => {}
        }
        Ok(())
    }

    /// Apply one `ReleaseDecision` for `agent_id`'s Queue 1. Returns `true`
    /// if this decision resulted in an immediate settlement.
    fn apply_release_decision(
        &mut self,
        agent_id: &str,
        tick: usize,
        decision: ReleaseDecision,
        split_friction_charged: &mut HashMap<String, i64>,
    ) -> Result<bool, SimulationError> {
        match decision {
            ReleaseDecision::SubmitFull {
                tx_id,
                priority_override,
                target_tick,
            } => {
                let amount = self
                    .state
                    .get_transaction(&tx_id)
                    .map(|t| t.remaining_amount())
                    .unwrap_or(0);
                let receiver = self
                    .state
                    .get_transaction(&tx_id)
                    .map(|t| t.receiver_id().to_string())
                    .unwrap_or_default();

                if !self.budget_allows(agent_id, &receiver, amount) {
                    self.state.log_event(Event::Queue1Hold {
                        tick,
                        agent_id: agent_id.to_string(),
                        tx_id,
                    });
                    return Ok(false);
                }

                if let Some(p) = priority_override {
                    if let Some(tx) = self.state.get_transaction_mut(&tx_id) {
                        tx.set_declared_rtgs_priority(p);
                    }
                }
                if let Some(agent) = self.state.get_agent_mut(agent_id) {
                    agent.queue1_remove(&tx_id);
                }
                self.consume_budget(agent_id, amount);

                match target_tick {
                    Some(t) if t > tick => {
                        self.scheduled_releases
                            .entry(t)
                            .or_default()
                            .push((agent_id.to_string(), tx_id));
                        Ok(false)
                    }
                    _ => Ok(matches!(
                        self.release_to_rtgs(&tx_id, tick)?,
                        SubmissionResult::SettledImmediately { .. }
                    )),
                }
            }
            ReleaseDecision::SubmitPartial { tx_id, num_splits } => {
                self.split_and_release(agent_id, tick, &tx_id, num_splits, split_friction_charged)
            }
            ReleaseDecision::Hold { tx_id, .. } => {
                self.state.log_event(Event::Queue1Hold {
                    tick,
                    agent_id: agent_id.to_string(),
                    tx_id,
                });
                Ok(false)
            }
            ReleaseDecision::Drop { tx_id } => {
                if let Some(agent) = self.state.get_agent_mut(agent_id) {
                    agent.queue1_remove(&tx_id);
                }
                if let Some(tx) = self.state.get_transaction_mut(&tx_id) {
                    tx.drop_transaction(tick);
                }
                self.state.log_event(Event::Drop {
                    tick,
                    tx_id,
                    reason: "policy_drop".to_string(),
                });
                Ok(false)
            }
            ReleaseDecision::Reprioritize { tx_id, new_priority } => {
                if let Some(tx) = self.state.get_transaction_mut(&tx_id) {
                    tx.set_priority(new_priority);
                    tx.set_declared_rtgs_priority(new_priority);
                }
                self.state.log_event(Event::PolicyDecision {
                    tick,
                    agent_id: agent_id.to_string(),
                    tree: "payment_tree".to_string(),
                    tx_id: Some(tx_id),
                    node_id: None,
                    result: format!("reprioritize:{new_priority}"),
                });
                Ok(false)
            }
            ReleaseDecision::StaggerSplit {
                tx_id,
                num_splits,
                stagger_first_now,
                stagger_gap_ticks,
                priority_boost_children,
            } => self.stagger_split(
                agent_id,
                tick,
                &tx_id,
                num_splits,
                stagger_first_now,
                stagger_gap_ticks,
                priority_boost_children,
                split_friction_charged,
            ),
        }
    }

    fn budget_allows(&self, agent_id: &str, receiver_id: &str, amount: i64) -> bool {
        match self.state.get_agent(agent_id).and_then(|a| a.release_budget()) {
            Some(budget) => budget.allows(receiver_id, amount),
            None => true,
        }
    }

    fn consume_budget(&mut self, agent_id: &str, amount: i64) {
        if let Some(agent) = self.state.get_agent_mut(agent_id) {
            if agent.release_budget().is_some() {
                agent.consume_release_budget(amount);
            }
        }
    }

    /// Release a transaction already resident in `state` to RTGS: settles
    /// immediately if the sender has headroom, otherwise marks it `Queued2`
    /// and enters Queue 2. Mirrors `rtgs::submit_transaction`, minus the
    /// `add_transaction` call (the transaction is already in state).
    fn release_to_rtgs(
        &mut self,
        tx_id: &str,
        tick: usize,
    ) -> Result<SubmissionResult, SimulationError> {
        let (sender_id, receiver_id, amount, priority) = {
            let tx = self
                .state
                .get_transaction(tx_id)
                .ok_or_else(|| SimulationError::TransactionNotFound(tx_id.to_string()))?;
            (
                tx.sender_id().to_string(),
                tx.receiver_id().to_string(),
                tx.remaining_amount(),
                tx.declared_rtgs_priority(),
            )
        };

        let can_pay = self
            .state
            .get_agent(&sender_id)
            .ok_or_else(|| SimulationError::UnknownAgent(sender_id.clone()))?
            .can_debit(amount);

        if can_pay {
            let sender_balance_before = self.state.get_agent(&sender_id).unwrap().balance();
            {
                let sender = self.state.get_agent_mut(&sender_id).unwrap();
                sender.debit(amount)?;
            }
            {
                let receiver = self.state.get_agent_mut(&receiver_id).unwrap();
                receiver.credit(amount);
            }
            let sender_balance_after = self.state.get_agent(&sender_id).unwrap().balance();
            {
                let tx = self.state.get_transaction_mut(tx_id).unwrap();
                tx.settle(amount, tick)?;
            }
            self.state.log_event(Event::RtgsImmediateSettlement {
                tick,
                tx_id: tx_id.to_string(),
                sender_id,
                receiver_id,
                amount,
                sender_balance_before,
                sender_balance_after,
            });
            Ok(SubmissionResult::SettledImmediately { tick })
        } else {
            {
                let tx = self.state.get_transaction_mut(tx_id).unwrap();
                tx.mark_queued2(tick, priority)?;
            }
            self.state.queue_transaction(tx_id.to_string());
            let position = self.state.queue_size();
            self.state.log_event(Event::Queue2Submit {
                tick,
                tx_id: tx_id.to_string(),
                sender_id,
                receiver_id,
                amount,
                declared_rtgs_priority: priority,
            });
            Ok(SubmissionResult::Queued { position })
        }
    }

    fn split_and_release(
        &mut self,
        agent_id: &str,
        tick: usize,
        tx_id: &str,
        num_splits: usize,
        split_friction_charged: &mut HashMap<String, i64>,
    ) -> Result<bool, SimulationError> {
        if num_splits < 2 {
            return Err(SimulationError::InvalidConfig(format!(
                "num_splits must be >= 2, got {num_splits}"
            )));
        }
        let parent = self
            .state
            .get_transaction(tx_id)
            .ok_or_else(|| SimulationError::TransactionNotFound(tx_id.to_string()))?
            .clone();

        if let Some(agent) = self.state.get_agent_mut(agent_id) {
            agent.queue1_remove(tx_id);
        }

        let total = parent.remaining_amount();
        let base = total / num_splits as i64;
        let remainder = total % num_splits as i64;

        let mut child_ids = Vec::with_capacity(num_splits);
        for i in 0..num_splits {
            let child_amount = if i == num_splits - 1 { base + remainder } else { base };
            let child = Transaction::new_split(
                parent.sender_id().to_string(),
                parent.receiver_id().to_string(),
                child_amount,
                parent.arrival_tick(),
                parent.deadline_tick(),
                tx_id.to_string(),
                i,
                parent.priority(),
                parent.is_divisible(),
            );
            let child_id = child.id().to_string();
            child_ids.push(child_id.clone());
            self.state.add_transaction(child);
            // Children stay Pending and enter queue1; payment_tree evaluates
            // them on the next tick rather than being released in this one.
            if let Some(agent) = self.state.get_agent_mut(agent_id) {
                agent.queue1_push(child_id);
            }
        }
        // Nothing settles this tick: children are deferred to the next
        // payment_tree evaluation.
        let all_settled = false;

        let friction = self.cost_rates.split_friction_cost * (num_splits as i64 - 1);
        if friction > 0 {
            *split_friction_charged.entry(agent_id.to_string()).or_insert(0) += friction;
        }

        self.state.log_event(Event::PolicyDecision {
            tick,
            agent_id: agent_id.to_string(),
            tree: "payment_tree".to_string(),
            tx_id: Some(tx_id.to_string()),
            node_id: None,
            result: format!("split:{num_splits}:{}", child_ids.join(",")),
        });
        Ok(all_settled)
    }

    #[allow(clippy::too_many_arguments)]
    fn stagger_split(
        &mut self,
        agent_id: &str,
        tick: usize,
        tx_id: &str,
        num_splits: usize,
        stagger_first_now: usize,
        stagger_gap_ticks: usize,
        priority_boost_children: u8,
        split_friction_charged: &mut HashMap<String, i64>,
    ) -> Result<bool, SimulationError> {
        if num_splits < 2 {
            return Err(SimulationError::InvalidConfig(format!(
                "num_splits must be >= 2, got {num_splits}"
            )));
        }
        let stagger_first_now = stagger_first_now.min(num_splits);
        let parent = self
            .state
            .get_transaction(tx_id)
            .ok_or_else(|| SimulationError::TransactionNotFound(tx_id.to_string()))?
            .clone();

        if let Some(agent) = self.state.get_agent_mut(agent_id) {
            agent.queue1_remove(tx_id);
        }

        let total = parent.remaining_amount();
        let base = total / num_splits as i64;
        let remainder = total % num_splits as i64;
        let child_priority = parent.priority().saturating_add(priority_boost_children).min(10);

        let mut child_ids = Vec::with_capacity(num_splits);
        let mut all_settled = true;
        for i in 0..num_splits {
            let child_amount = if i == num_splits - 1 { base + remainder } else { base };
            let child = Transaction::new_split(
                parent.sender_id().to_string(),
                parent.receiver_id().to_string(),
                child_amount,
                parent.arrival_tick(),
                parent.deadline_tick(),
                tx_id.to_string(),
                i,
                child_priority,
                parent.is_divisible(),
            );
            let child_id = child.id().to_string();
            child_ids.push(child_id.clone());
            self.state.add_transaction(child);

            if i < stagger_first_now {
                let settled = matches!(
                    self.release_to_rtgs(&child_id, tick)?,
                    SubmissionResult::SettledImmediately { .. }
                );
                all_settled = all_settled && settled;
            } else {
                all_settled = false;
                let wave = i - stagger_first_now + 1;
                let release_tick = tick + stagger_gap_ticks * wave;
                if let Some(tx) = self.state.get_transaction_mut(&child_id) {
                    tx.mark_queued1()?;
                }
                self.scheduled_releases
                    .entry(release_tick)
                    .or_default()
                    .push((agent_id.to_string(), child_id));
            }
        }

        let friction = self.cost_rates.split_friction_cost * (num_splits as i64 - 1);
        if friction > 0 {
            *split_friction_charged.entry(agent_id.to_string()).or_insert(0) += friction;
        }

        self.state.log_event(Event::PolicyDecision {
            tick,
            agent_id: agent_id.to_string(),
            tree: "payment_tree".to_string(),
            tx_id: Some(tx_id.to_string()),
            node_id: None,
            result: format!("stagger_split:{num_splits}:{}", child_ids.join(",")),
        });
        Ok(all_settled)
    }

    fn handle_end_of_day(&mut self, tick: usize, day: usize) -> Result<(), SimulationError> {
        let agent_ids = self.state.get_all_agent_ids();
        for agent_id in &agent_ids {
            if let Some(agent_snapshot) = self.state.get_agent(agent_id).cloned() {
                if let Some(policy) = self.policies.get_mut(agent_id) {
                    if let Some(tree_policy) = policy.as_any_mut().downcast_mut::<TreePolicy>() {
                        let decision = tree_policy.evaluate_end_of_tick_collateral(
                            &agent_snapshot,
                            &self.state,
                            tick,
                            &self.cost_rates,
                        )?;
                        self.apply_collateral_decision(agent_id, tick, decision)?;
                    }
                }
            }
        }

        let unsettled_count = self.state.queue_size() + self.state.total_internal_queue_size();
        let mut penalties_charged = 0i64;

        let overdue_ids: Vec<String> = self
            .state
            .rtgs_queue()
            .iter()
            .filter(|tx_id| {
                self.state
                    .get_transaction(tx_id)
                    .map(|t| t.is_overdue())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for tx_id in overdue_ids {
            let agent_id = self
                .state
                .get_transaction(&tx_id)
                .map(|t| t.sender_id().to_string())
                .unwrap_or_default();
            let penalty = self.cost_rates.eod_penalty_per_transaction;
            penalties_charged += penalty;
            if let Some(accumulator) = self.accumulated_costs.get_mut(&agent_id) {
                accumulator.total_deadline_penalty += penalty;
            }
            self.state.log_event(Event::CostAccrual {
                tick,
                agent_id,
                liquidity_cost: 0,
                delay_cost: 0,
                collateral_cost: 0,
                deadline_penalty: penalty,
                split_friction_cost: 0,
                total: penalty,
            });
        }

        self.state.log_event(Event::EndOfDay {
            tick,
            day,
            unsettled_count,
            penalties_charged,
        });
        Ok(())
    }

    /// Ceiling-rounded cost: `ceil(amount * rate)`, computed in fixed-point
    /// to avoid float rounding from silently dropping sub-cent cost.
    fn ceil_rate_cost(amount: i64, rate: f64) -> i64 {
        if amount <= 0 || rate <= 0.0 {
            return 0;
        }
        const SCALE: i128 = 1_000_000_000;
        let scaled_rate = (rate * SCALE as f64).round() as i128;
        let numerator = amount as i128 * scaled_rate;
        ((numerator + SCALE - 1) / SCALE) as i64
    }

    // ========================================================================
    // Checkpointing (spec.md 4.9)
    // ========================================================================

    pub fn save_state(&self) -> Result<checkpoint::StateSnapshot, SimulationError> {
        let agents = self
            .state
            .agents()
            .values()
            .map(checkpoint::AgentSnapshot::from_agent)
            .collect();
        let transactions = self
            .state
            .transactions()
            .values()
            .map(checkpoint::TransactionSnapshot::from_transaction)
            .collect();
        let config_hash = checkpoint::compute_config_hash(&self.config_snapshot())?;

        Ok(checkpoint::StateSnapshot {
            tick: self.current_tick(),
            ticks_per_day: self.ticks_per_day,
            rng_seed: self.rng_seed,
            rng_state: self.rng_manager.get_state(),
            config_hash,
            agents,
            transactions,
            rtgs_queue: self.state.rtgs_queue().clone(),
            accumulated_costs: self.accumulated_costs.clone(),
            event_journal_digest: self.state.event_log().digest(),
        })
    }

    /// Restore an orchestrator from a snapshot. `config` must match the
    /// configuration the snapshot was taken under (checked via hash) for
    /// everything except the agent/transaction state itself, which the
    /// snapshot fully overrides.
    pub fn load_state(
        config: OrchestratorConfig,
        snapshot: checkpoint::StateSnapshot,
    ) -> Result<Self, SimulationError> {
        let expected_hash = checkpoint::compute_config_hash(&config)?;
        if expected_hash != snapshot.config_hash {
            return Err(SimulationError::ConfigMismatch {
                expected: expected_hash,
                found: snapshot.config_hash,
            });
        }

        let mut orchestrator = Self::new(config)?;

        let agents: BTreeMap<String, Agent> = snapshot
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.to_agent()))
            .collect();
        let transactions: BTreeMap<String, Transaction> = snapshot
            .transactions
            .iter()
            .map(|t| (t.id.clone(), t.to_transaction()))
            .collect();
        let expected_total_balance: i64 = agents.values().map(|a| a.balance()).sum();
        checkpoint::validate_snapshot(&snapshot, expected_total_balance)?;

        orchestrator.state =
            SimulationState::from_parts(agents, transactions, snapshot.rtgs_queue.clone())
                .map_err(SimulationError::Integrity)?;
        orchestrator.rng_manager = RngManager::from_state(snapshot.rng_state);
        orchestrator.rng_seed = snapshot.rng_seed;
        orchestrator.time_manager = TimeManager::new(snapshot.ticks_per_day);
        for _ in 0..snapshot.tick {
            orchestrator.time_manager.advance_tick();
        }
        orchestrator.accumulated_costs = snapshot.accumulated_costs.clone();

        Ok(orchestrator)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tick", &self.current_tick())
            .field("day", &self.current_day())
            .field("num_agents", &self.state.num_agents())
            .field("num_transactions", &self.state.num_transactions())
            .field("queue2_size", &self.state.queue_size())
            .field("event_count", &self.event_count())
            .finish()
    }
}
