//! Transaction model and lifecycle state machine.
//!
//! A transaction moves through a fixed status graph:
//! `Pending -> {Settled, Queued1, Queued2, Dropped}`,
//! `Queued1 -> {Queued2, Settled}`, `Queued2 -> {Settled, Overdue}`,
//! `Overdue -> {Settled}`. `Settled` and `Dropped` are terminal.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Queued1,
    Queued2,
    Settled,
    Dropped,
    Overdue,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction is not divisible")]
    IndivisibleTransaction,
    #[error("amount {amount} exceeds remaining {remaining}")]
    AmountExceedsRemaining { amount: i64, remaining: i64 },
    #[error("transaction already fully settled")]
    AlreadySettled,
    #[error("transaction has been dropped")]
    TransactionDropped,
    #[error("invalid amount: must be positive")]
    InvalidAmount,
}

/// A single payment instruction between two agents.
///
/// All monetary fields are `i64` cents. `tx_id` is an opaque string handle;
/// callers never need to know the internal representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    sender_id: String,
    receiver_id: String,
    amount: i64,
    amount_settled: i64,
    priority: u8,
    arrival_tick: usize,
    deadline_tick: usize,
    is_divisible: bool,
    status: TransactionStatus,
    settlement_tick: Option<usize>,
    overdue_since_tick: Option<usize>,
    parent_tx_id: Option<String>,
    split_index: Option<usize>,
    /// Tick this transaction was submitted to Queue 2 (sort tiebreak and
    /// the basis for `queue_wait_ticks` on release). Equals `arrival_tick`
    /// until actually submitted.
    submission_tick: usize,
    /// Priority declared at RTGS-queue submission time; may be boosted
    /// above the payment's own `priority` by a bank-level release budget.
    declared_rtgs_priority: u8,
}

impl Transaction {
    pub fn new(
        sender_id: String,
        receiver_id: String,
        amount: i64,
        arrival_tick: usize,
        deadline_tick: usize,
    ) -> Self {
        assert!(amount > 0, "amount must be positive");
        assert!(
            deadline_tick >= arrival_tick,
            "deadline must be >= arrival_tick"
        );
        Self {
            id: format!("tx_{}", Uuid::new_v4().simple()),
            sender_id,
            receiver_id,
            amount,
            amount_settled: 0,
            priority: 5,
            arrival_tick,
            deadline_tick,
            is_divisible: false,
            status: TransactionStatus::Pending,
            settlement_tick: None,
            overdue_since_tick: None,
            parent_tx_id: None,
            split_index: None,
            submission_tick: arrival_tick,
            declared_rtgs_priority: 5,
        }
    }

    /// Construct a child transaction created by a `Split` policy action.
    #[allow(clippy::too_many_arguments)]
    pub fn new_split(
        sender_id: String,
        receiver_id: String,
        amount: i64,
        arrival_tick: usize,
        deadline_tick: usize,
        parent_tx_id: String,
        split_index: usize,
        priority: u8,
        is_divisible: bool,
    ) -> Self {
        let mut tx = Self::new(sender_id, receiver_id, amount, arrival_tick, deadline_tick);
        tx.parent_tx_id = Some(parent_tx_id);
        tx.split_index = Some(split_index);
        tx.priority = priority.min(10);
        tx.declared_rtgs_priority = tx.priority;
        tx.is_divisible = is_divisible;
        tx
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self.declared_rtgs_priority = self.priority;
        self
    }

    pub fn divisible(mut self) -> Self {
        self.is_divisible = true;
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }
    pub fn amount(&self) -> i64 {
        self.amount
    }
    pub fn amount_settled(&self) -> i64 {
        self.amount_settled
    }
    pub fn remaining_amount(&self) -> i64 {
        self.amount - self.amount_settled
    }
    pub fn priority(&self) -> u8 {
        self.priority
    }
    pub fn declared_rtgs_priority(&self) -> u8 {
        self.declared_rtgs_priority
    }
    pub fn arrival_tick(&self) -> usize {
        self.arrival_tick
    }
    pub fn deadline_tick(&self) -> usize {
        self.deadline_tick
    }
    pub fn is_divisible(&self) -> bool {
        self.is_divisible
    }
    pub fn status(&self) -> TransactionStatus {
        self.status
    }
    pub fn settlement_tick(&self) -> Option<usize> {
        self.settlement_tick
    }
    pub fn overdue_since_tick(&self) -> Option<usize> {
        self.overdue_since_tick
    }
    pub fn parent_tx_id(&self) -> Option<&str> {
        self.parent_tx_id.as_deref()
    }
    pub fn split_index(&self) -> Option<usize> {
        self.split_index
    }
    pub fn submission_tick(&self) -> usize {
        self.submission_tick
    }
    pub fn is_split(&self) -> bool {
        self.parent_tx_id.is_some()
    }
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
    pub fn is_settled(&self) -> bool {
        self.status == TransactionStatus::Settled
    }
    pub fn is_dropped(&self) -> bool {
        self.status == TransactionStatus::Dropped
    }
    pub fn is_overdue(&self) -> bool {
        self.status == TransactionStatus::Overdue
    }
    pub fn is_past_deadline(&self, current_tick: usize) -> bool {
        current_tick > self.deadline_tick
    }
    pub fn ticks_to_deadline(&self, current_tick: usize) -> i64 {
        self.deadline_tick as i64 - current_tick as i64
    }

    // -- mutators -------------------------------------------------------------

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority.min(10);
    }

    pub fn set_declared_rtgs_priority(&mut self, priority: u8) {
        self.declared_rtgs_priority = priority;
    }

    fn check_active(&self) -> Result<(), TransactionError> {
        match self.status {
            TransactionStatus::Settled => Err(TransactionError::AlreadySettled),
            TransactionStatus::Dropped => Err(TransactionError::TransactionDropped),
            _ => Ok(()),
        }
    }

    pub fn mark_queued1(&mut self) -> Result<(), TransactionError> {
        self.check_active()?;
        self.status = TransactionStatus::Queued1;
        Ok(())
    }

    pub fn mark_queued2(
        &mut self,
        tick: usize,
        declared_priority: u8,
    ) -> Result<(), TransactionError> {
        self.check_active()?;
        self.status = TransactionStatus::Queued2;
        self.submission_tick = tick;
        self.declared_rtgs_priority = declared_priority;
        Ok(())
    }

    /// Settle `amount` cents of this transaction at `tick`. Partial
    /// settlement requires `is_divisible`; a settlement that exhausts
    /// `remaining_amount` always transitions to `Settled` regardless of
    /// divisibility.
    pub fn settle(&mut self, amount: i64, tick: usize) -> Result<(), TransactionError> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount);
        }
        self.check_active()?;
        let remaining = self.remaining_amount();
        if amount > remaining {
            return Err(TransactionError::AmountExceedsRemaining { amount, remaining });
        }
        if amount < remaining && !self.is_divisible {
            return Err(TransactionError::IndivisibleTransaction);
        }
        self.amount_settled += amount;
        if self.settlement_tick.is_none() {
            self.settlement_tick = Some(tick);
        }
        if self.amount_settled == self.amount {
            self.status = TransactionStatus::Settled;
        }
        Ok(())
    }

    pub fn mark_overdue(&mut self, tick: usize) -> Result<(), TransactionError> {
        self.check_active()?;
        if self.overdue_since_tick.is_none() {
            self.overdue_since_tick = Some(tick);
        }
        self.status = TransactionStatus::Overdue;
        Ok(())
    }

    pub fn drop_transaction(&mut self, tick: usize) {
        self.status = TransactionStatus::Dropped;
        if self.settlement_tick.is_none() {
            self.settlement_tick = Some(tick);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_snapshot(
        id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        amount_settled: i64,
        priority: u8,
        arrival_tick: usize,
        deadline_tick: usize,
        is_divisible: bool,
        status: TransactionStatus,
        settlement_tick: Option<usize>,
        overdue_since_tick: Option<usize>,
        parent_tx_id: Option<String>,
        split_index: Option<usize>,
        submission_tick: usize,
        declared_rtgs_priority: u8,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            amount,
            amount_settled,
            priority,
            arrival_tick,
            deadline_tick,
            is_divisible,
            status,
            settlement_tick,
            overdue_since_tick,
            parent_tx_id,
            split_index,
            submission_tick,
            declared_rtgs_priority,
        }
    }
}
