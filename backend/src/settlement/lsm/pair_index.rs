//! Incremental bilateral-pair index over Queue 2.
//!
//! Scans the queue once to group transactions by unordered agent pair, so
//! `bilateral_offset` doesn't have to rescan the whole queue for every pair
//! it processes. "Ready" pairs are those with queued flow in both
//! directions; they're popped in deterministic priority order (largest
//! liquidity release first, agent IDs as a tie-break).

use crate::models::state::SimulationState;
use std::collections::BTreeMap;

/// An unordered agent pair with queued flow in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairKey {
    agent_a: String,
    agent_b: String,
    liquidity_release: i64,
}

impl PairKey {
    pub fn agent_a(&self) -> &str {
        &self.agent_a
    }
    pub fn agent_b(&self) -> &str {
        &self.agent_b
    }
    pub fn liquidity_release(&self) -> i64 {
        self.liquidity_release
    }
}

pub struct PairIndex {
    ready: Vec<PairKey>,
    tx_ids: BTreeMap<(String, String), Vec<String>>,
    flow_sums: BTreeMap<(String, String), i64>,
}

impl PairIndex {
    pub fn from_queue(state: &SimulationState) -> Self {
        let mut tx_ids: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        let mut flow_sums: BTreeMap<(String, String), i64> = BTreeMap::new();

        for tx_id in state.rtgs_queue() {
            if let Some(tx) = state.get_transaction(tx_id) {
                let directional = (tx.sender_id().to_string(), tx.receiver_id().to_string());
                tx_ids.entry(directional.clone()).or_default().push(tx_id.clone());
                *flow_sums.entry(directional).or_insert(0) += tx.remaining_amount();
            }
        }

        let mut seen_pairs: BTreeMap<(String, String), ()> = BTreeMap::new();
        for (sender, receiver) in tx_ids.keys() {
            let key = if sender < receiver {
                (sender.clone(), receiver.clone())
            } else {
                (receiver.clone(), sender.clone())
            };
            seen_pairs.insert(key, ());
        }

        let mut ready = Vec::new();
        for (a, b) in seen_pairs.keys() {
            let sum_ab = flow_sums.get(&(a.clone(), b.clone())).copied().unwrap_or(0);
            let sum_ba = flow_sums.get(&(b.clone(), a.clone())).copied().unwrap_or(0);
            let liquidity_release = sum_ab.min(sum_ba);
            if liquidity_release > 0 {
                ready.push(PairKey {
                    agent_a: a.clone(),
                    agent_b: b.clone(),
                    liquidity_release,
                });
            }
        }

        ready.sort_by(|x, y| {
            y.liquidity_release
                .cmp(&x.liquidity_release)
                .then_with(|| x.agent_a.cmp(&y.agent_a))
                .then_with(|| x.agent_b.cmp(&y.agent_b))
        });

        Self { ready, tx_ids, flow_sums }
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn pop_ready(&mut self) -> Option<PairKey> {
        if self.ready.is_empty() {
            None
        } else {
            Some(self.ready.remove(0))
        }
    }

    pub fn get_transactions(&self, key: &PairKey) -> (Vec<String>, Vec<String>) {
        let ab = self
            .tx_ids
            .get(&(key.agent_a.clone(), key.agent_b.clone()))
            .cloned()
            .unwrap_or_default();
        let ba = self
            .tx_ids
            .get(&(key.agent_b.clone(), key.agent_a.clone()))
            .cloned()
            .unwrap_or_default();
        (ab, ba)
    }

    pub fn flow_sum(&self, from: &str, to: &str) -> i64 {
        self.flow_sums
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Agent, SimulationState, Transaction};

    fn tx(sender: &str, receiver: &str, amount: i64) -> Transaction {
        Transaction::new(sender.to_string(), receiver.to_string(), amount, 0, 100)
    }

    #[test]
    fn test_ready_pair_detected_both_directions() {
        let agents = vec![Agent::new("A".to_string(), 0, 0), Agent::new("B".to_string(), 0, 0)];
        let mut state = SimulationState::new(agents);
        let t1 = tx("A", "B", 500_000);
        let t2 = tx("B", "A", 300_000);
        state.add_transaction(t1.clone());
        state.add_transaction(t2.clone());
        state.queue_transaction(t1.id().to_string());
        state.queue_transaction(t2.id().to_string());

        let index = PairIndex::from_queue(&state);
        assert_eq!(index.ready_count(), 1);
    }

    #[test]
    fn test_one_directional_pair_is_not_ready() {
        let agents = vec![Agent::new("A".to_string(), 0, 0), Agent::new("B".to_string(), 0, 0)];
        let mut state = SimulationState::new(agents);
        let t1 = tx("A", "B", 500_000);
        state.add_transaction(t1.clone());
        state.queue_transaction(t1.id().to_string());

        let index = PairIndex::from_queue(&state);
        assert_eq!(index.ready_count(), 0);
    }

    #[test]
    fn test_pop_ready_highest_liquidity_release_first() {
        let agents = vec![
            Agent::new("A".to_string(), 0, 0),
            Agent::new("B".to_string(), 0, 0),
            Agent::new("C".to_string(), 0, 0),
        ];
        let mut state = SimulationState::new(agents);

        let small_ab = tx("A", "B", 50_000);
        let small_ba = tx("B", "A", 40_000);
        let big_ac = tx("A", "C", 500_000);
        let big_ca = tx("C", "A", 500_000);
        for t in [&small_ab, &small_ba, &big_ac, &big_ca] {
            state.add_transaction(t.clone());
            state.queue_transaction(t.id().to_string());
        }

        let mut index = PairIndex::from_queue(&state);
        let first = index.pop_ready().unwrap();
        assert_eq!(first.liquidity_release(), 500_000);
    }
}
