//! Deadline-Aware Policy
//!
//! Prioritizes transactions approaching their deadline.
//!
//! # Behavior
//!
//! - Submits transactions within `urgency_threshold` ticks of deadline
//! - Holds transactions with time remaining (non-urgent)
//! - Drops transactions past deadline (already expired)
//!
//! # Parameters
//!
//! - `urgency_threshold`: Ticks before deadline to consider urgent (default: 5)

use super::{CashManagerPolicy, HoldReason, ReleaseDecision};
use crate::orchestrator::CostRates;
use crate::{Agent, SimulationState};

/// Deadline-aware policy: prioritize expiring transactions.
///
/// # Example
///
/// ```
/// use payment_simulator_core_rs::policy::{DeadlinePolicy, CashManagerPolicy};
/// use payment_simulator_core_rs::{Agent, SimulationState, Transaction, CostRates};
///
/// let mut policy = DeadlinePolicy::new(5);
/// let agent = Agent::new("BANK_A".to_string(), 1_000_000, 0);
/// let mut state = SimulationState::new(vec![agent.clone()]);
///
/// let tx_urgent = Transaction::new("BANK_A".to_string(), "BANK_B".to_string(), 100_000, 0, 10);
/// let id_urgent = tx_urgent.id().to_string();
/// state.add_transaction(tx_urgent);
///
/// let tx_later = Transaction::new("BANK_A".to_string(), "BANK_B".to_string(), 200_000, 0, 50);
/// let id_later = tx_later.id().to_string();
/// state.add_transaction(tx_later);
///
/// state.get_agent_mut("BANK_A").unwrap().queue1_push(id_urgent);
/// state.get_agent_mut("BANK_A").unwrap().queue1_push(id_later);
///
/// let agent = state.get_agent("BANK_A").unwrap();
/// let decisions = policy.evaluate_queue(agent, &state, 8, &CostRates::default());
///
/// assert_eq!(decisions.len(), 2);
/// ```
pub struct DeadlinePolicy {
    /// Ticks before deadline to consider transaction urgent
    urgency_threshold: usize,
}

impl DeadlinePolicy {
    /// Create new deadline policy.
    ///
    /// ```
    /// use payment_simulator_core_rs::policy::DeadlinePolicy;
    ///
    /// let policy = DeadlinePolicy::new(10);
    /// ```
    pub fn new(urgency_threshold: usize) -> Self {
        Self { urgency_threshold }
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

impl CashManagerPolicy for DeadlinePolicy {
    fn evaluate_queue(
        &mut self,
        agent: &Agent,
        state: &SimulationState,
        tick: usize,
        _cost_rates: &CostRates,
    ) -> Vec<ReleaseDecision> {
        let mut decisions = Vec::new();

        for tx_id in agent.queue1() {
            if let Some(tx) = state.get_transaction(tx_id) {
                let deadline = tx.deadline_tick();

                if deadline <= tick {
                    decisions.push(ReleaseDecision::Drop {
                        tx_id: tx_id.clone(),
                    });
                } else {
                    let ticks_remaining = deadline - tick;

                    if ticks_remaining <= self.urgency_threshold {
                        decisions.push(ReleaseDecision::SubmitFull {
                            tx_id: tx_id.clone(),
                            priority_override: None,
                            target_tick: None,
                        });
                    } else {
                        decisions.push(ReleaseDecision::Hold {
                            tx_id: tx_id.clone(),
                            reason: HoldReason::NearDeadline { ticks_remaining },
                        });
                    }
                }
            }
        }

        decisions
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
