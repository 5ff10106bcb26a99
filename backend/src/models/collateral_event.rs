//! Collateral decision bookkeeping.
//!
//! Lightweight records produced by `strategic_collateral_tree` and
//! `end_of_tick_collateral_tree` evaluation, before being folded into the
//! journal as `Event::CollateralPosted` / `Event::CollateralReleased`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralAction {
    Post,
    Withdraw,
    Hold,
}

/// Which tree produced a collateral decision — useful for diagnostics and
/// for distinguishing intra-tick strategic decisions from EOD decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralLayer {
    Strategic,
    EndOfTick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralEvent {
    pub tick: usize,
    pub agent_id: String,
    pub action: CollateralAction,
    pub amount: i64,
    pub reason: String,
    pub new_total: i64,
    pub layer: CollateralLayer,
}
