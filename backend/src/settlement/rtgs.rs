//! RTGS (Real-Time Gross Settlement) engine.
//!
//! # Settlement Flow
//!
//! ```text
//! Bank A (sender) → RTGS @ central bank → Bank B (receiver)
//!                          ↓
//!                   Debit Bank A's account
//!                   Credit Bank B's account
//! ```
//!
//! 1. Receives a payment order (Transaction), submitted by a bank to RTGS.
//! 2. Checks whether the sender has sufficient liquidity (balance + overdraft headroom).
//! 3. If yes: immediate settlement (debit sender, credit receiver).
//! 4. If no: the caller holds the transaction in Queue 2 and retries on a later tick.
//!
//! # Critical Invariants
//!
//! - **Atomicity**: debit and credit happen together, or neither happens.
//! - **Balance conservation**: total system balance is unchanged by settlement.
//! - **Credit limits**: a sender may go negative up to its allowed overdraft limit.

use crate::models::agent::{Agent, AgentError};
use crate::models::state::SimulationState;
use crate::models::transaction::{Transaction, TransactionError, TransactionStatus};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur during RTGS settlement
#[derive(Debug, Error, PartialEq)]
pub enum SettlementError {
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: i64, available: i64 },

    #[error("Transaction already settled")]
    AlreadySettled,

    #[error("Transaction has been dropped")]
    Dropped,

    #[error("Agent error: {0}")]
    AgentError(#[from] AgentError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
}

/// Attempt immediate RTGS settlement of a transaction's full remaining amount.
///
/// If insufficient liquidity, returns `InsufficientLiquidity` and **no state changes occur**.
///
/// # Example
///
/// ```rust
/// use payment_simulator_core_rs::{Agent, Transaction};
/// use payment_simulator_core_rs::settlement::try_settle;
///
/// let mut sender = Agent::new("BANK_A".to_string(), 1_000_000, 0);
/// let mut receiver = Agent::new("BANK_B".to_string(), 0, 0);
/// let mut transaction = Transaction::new(
///     "BANK_A".to_string(),
///     "BANK_B".to_string(),
///     500_000,
///     0,
///     100,
/// );
///
/// let result = try_settle(&mut sender, &mut receiver, &mut transaction, 5);
/// assert!(result.is_ok());
/// assert_eq!(sender.balance(), 500_000);
/// assert_eq!(receiver.balance(), 500_000);
/// assert!(transaction.is_settled());
/// ```
pub fn try_settle(
    sender: &mut Agent,
    receiver: &mut Agent,
    transaction: &mut Transaction,
    tick: usize,
) -> Result<(), SettlementError> {
    if transaction.is_settled() {
        return Err(SettlementError::AlreadySettled);
    }
    if matches!(transaction.status(), TransactionStatus::Dropped) {
        return Err(SettlementError::Dropped);
    }

    let amount = transaction.remaining_amount();

    if !sender.can_debit(amount) {
        return Err(SettlementError::InsufficientLiquidity {
            required: amount,
            available: sender.available_credit(),
        });
    }

    sender.debit(amount)?;
    receiver.credit(amount);
    transaction.settle(amount, tick)?;

    Ok(())
}

/// Attempt partial settlement of a transaction, settling at most `amount` of
/// the remaining balance. Used by Queue 2 liquidity releases and LSM passes
/// where only part of a divisible transaction can clear this tick.
pub fn try_settle_partial(
    sender: &mut Agent,
    receiver: &mut Agent,
    transaction: &mut Transaction,
    amount: i64,
    tick: usize,
) -> Result<(), SettlementError> {
    if transaction.is_settled() {
        return Err(SettlementError::AlreadySettled);
    }
    if matches!(transaction.status(), TransactionStatus::Dropped) {
        return Err(SettlementError::Dropped);
    }

    let amount = amount.min(transaction.remaining_amount());
    if !sender.can_debit(amount) {
        return Err(SettlementError::InsufficientLiquidity {
            required: amount,
            available: sender.available_credit(),
        });
    }

    sender.debit(amount)?;
    receiver.credit(amount);
    transaction.settle(amount, tick)?;

    Ok(())
}

/// Result of submitting a transaction to RTGS
#[derive(Debug, PartialEq)]
pub enum SubmissionResult {
    SettledImmediately { tick: usize },
    Queued { position: usize },
}

/// Statistics from processing the RTGS queue (Queue 2)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueProcessingResult {
    pub settled_count: usize,
    pub settled_value: i64,
    pub remaining_queue_size: usize,
    pub dropped_count: usize,
}

/// Submit a transaction to RTGS (Queue 2). Attempts immediate settlement;
/// if the sender has insufficient liquidity, the transaction is queued.
///
/// # Example
///
/// ```rust
/// use payment_simulator_core_rs::{Agent, Transaction, SimulationState};
/// use payment_simulator_core_rs::settlement::{submit_transaction, SubmissionResult};
///
/// let agents = vec![
///     Agent::new("BANK_A".to_string(), 1_000_000, 0),
///     Agent::new("BANK_B".to_string(), 0, 0),
/// ];
/// let mut state = SimulationState::new(agents);
///
/// let tx = Transaction::new(
///     "BANK_A".to_string(),
///     "BANK_B".to_string(),
///     500_000,
///     0,
///     100,
/// );
///
/// let result = submit_transaction(&mut state, tx, 5);
/// assert!(matches!(result, Ok(SubmissionResult::SettledImmediately { .. })));
/// ```
pub fn submit_transaction(
    state: &mut SimulationState,
    transaction: Transaction,
    tick: usize,
) -> Result<SubmissionResult, SettlementError> {
    let tx_id = transaction.id().to_string();
    let sender_id = transaction.sender_id().to_string();
    let receiver_id = transaction.receiver_id().to_string();
    let amount = transaction.remaining_amount();
    let priority = transaction.declared_rtgs_priority();

    state.add_transaction(transaction);

    let can_pay = {
        let sender = state
            .get_agent(&sender_id)
            .ok_or(AgentError::InsufficientLiquidity { required: 0, available: 0 })?;
        sender.can_debit(amount)
    };

    if can_pay {
        {
            let sender = state.get_agent_mut(&sender_id).unwrap();
            sender.debit(amount)?;
        }
        {
            let receiver = state.get_agent_mut(&receiver_id).unwrap();
            receiver.credit(amount);
        }
        let sender_balance_after = state.get_agent(&sender_id).unwrap().balance();
        {
            let transaction = state.get_transaction_mut(&tx_id).unwrap();
            transaction.settle(amount, tick)?;
        }
        state.log_event(crate::models::Event::RtgsImmediateSettlement {
            tick,
            tx_id: tx_id.clone(),
            sender_id,
            receiver_id,
            amount,
            sender_balance_before: sender_balance_after + amount,
            sender_balance_after,
        });
        debug!(tx_id = %tx_id, amount, "rtgs immediate settlement");
        Ok(SubmissionResult::SettledImmediately { tick })
    } else {
        state.queue_transaction(tx_id.clone());
        {
            let transaction = state.get_transaction_mut(&tx_id).unwrap();
            transaction.mark_queued2(tick, priority)?;
        }
        let position = state.queue_size();
        state.log_event(crate::models::Event::Queue2Submit {
            tick,
            tx_id,
            sender_id,
            receiver_id,
            amount,
            declared_rtgs_priority: priority,
        });
        Ok(SubmissionResult::Queued { position })
    }
}

/// Process Queue 2: retry pending transactions in priority order.
///
/// Drain order is `(declared_rtgs_priority desc, submission_tick asc, tx_id asc)`,
/// so higher-priority and older transactions get first crack at available liquidity
/// each tick. A transaction past its deadline is still retried here; it is the
/// orchestrator's overdue-detection stage, not this queue drain, that marks it
/// `Overdue` — `Queued2` has no `Dropped` transition in the status graph.
pub fn process_queue(state: &mut SimulationState, tick: usize) -> QueueProcessingResult {
    let mut result = QueueProcessingResult::default();
    let mut still_pending = Vec::new();

    let queue = state.rtgs_queue_mut();
    let mut tx_ids: Vec<String> = queue.drain(..).collect();

    // Sort snapshot: priority desc, then submission_tick asc, then tx_id asc.
    let mut sort_keys: Vec<(u8, usize, String, String)> = tx_ids
        .drain(..)
        .filter_map(|tx_id| {
            state.get_transaction(&tx_id).map(|tx| {
                (
                    tx.declared_rtgs_priority(),
                    tx.submission_tick(),
                    tx_id.clone(),
                    tx_id,
                )
            })
        })
        .collect();
    sort_keys.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    tx_ids = sort_keys.into_iter().map(|k| k.3).collect();

    for tx_id in tx_ids {
        let is_settled = state.get_transaction(&tx_id).map(|t| t.is_settled()).unwrap_or(true);
        if is_settled {
            continue;
        }

        let (sender_id, receiver_id, amount, queue_wait_ticks) = {
            let tx = state.get_transaction(&tx_id).unwrap();
            (
                tx.sender_id().to_string(),
                tx.receiver_id().to_string(),
                tx.remaining_amount(),
                tick.saturating_sub(tx.submission_tick()),
            )
        };

        let can_settle = state
            .get_agent(&sender_id)
            .map(|a| a.can_debit(amount))
            .unwrap_or(false);

        if can_settle {
            {
                let sender = state.get_agent_mut(&sender_id).unwrap();
                sender.debit(amount).unwrap();
            }
            {
                let receiver = state.get_agent_mut(&receiver_id).unwrap();
                receiver.credit(amount);
            }
            {
                let transaction = state.get_transaction_mut(&tx_id).unwrap();
                transaction.settle(amount, tick).unwrap();
            }
            state.log_event(crate::models::Event::Queue2LiquidityRelease {
                tick,
                tx_id: tx_id.clone(),
                sender_id,
                receiver_id,
                amount,
                queue_wait_ticks,
                release_reason: "liquidity_available".to_string(),
            });
            trace!(tx_id = %tx_id, amount, "queue2 liquidity release");
            result.settled_count += 1;
            result.settled_value += amount;
        } else {
            still_pending.push(tx_id);
        }
    }

    *state.rtgs_queue_mut() = still_pending;
    result.remaining_queue_size = state.queue_size();
    result
}
