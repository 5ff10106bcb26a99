//! Property-based checks of the kernel's core invariants:
//!
//! - INV-CREDIT: an agent's balance never drops below `-allowed_overdraft_limit`.
//! - INV-CONSERVATION: total balance across all agents never changes (every
//!   settlement is a zero-sum transfer).
//! - INV-DETERMINISM: same seed + same config + same submissions always
//!   produce an identical event journal.

use payment_simulator_core_rs::orchestrator::{
    AgentConfig, CostRates, Orchestrator, OrchestratorConfig, PolicyConfig,
};
use payment_simulator_core_rs::settlement::lsm::LsmConfig;
use proptest::prelude::*;

fn build_config(seed: u64, opening: [i64; 3], caps: [i64; 3]) -> OrchestratorConfig {
    let ids = ["A", "B", "C"];
    let agent_configs = ids
        .iter()
        .enumerate()
        .map(|(i, id)| AgentConfig {
            id: id.to_string(),
            opening_balance: opening[i],
            unsecured_cap: caps[i],
            max_collateral_capacity: None,
            collateral_haircut: None,
            policy: PolicyConfig::Fifo,
            arrival_config: None,
        })
        .collect();

    OrchestratorConfig {
        ticks_per_day: 30,
        num_days: 1,
        rng_seed: seed,
        agent_configs,
        cost_rates: CostRates::default(),
        lsm_config: LsmConfig::default(),
    }
}

fn run_with_submissions(
    seed: u64,
    opening: [i64; 3],
    caps: [i64; 3],
    submissions: &[(usize, usize, i64, usize)],
) -> Orchestrator {
    let ids = ["A", "B", "C"];
    let mut orch = Orchestrator::new(build_config(seed, opening, caps)).unwrap();
    let mut submissions = submissions.to_vec();
    submissions.sort_by_key(|s| s.3);
    let mut next = 0;
    for tick in 0..20 {
        while next < submissions.len() && submissions[next].3 == tick {
            let (from, to, amount, _) = submissions[next];
            if from != to {
                let _ = orch.submit_transaction(
                    ids[from % 3],
                    ids[to % 3],
                    amount.max(1),
                    tick + 15,
                    5,
                    false,
                );
            }
            next += 1;
        }
        orch.tick().unwrap();
    }
    orch
}

proptest! {
    #[test]
    fn inv_conservation_and_credit_hold(
        seed in any::<u64>(),
        opening in prop::array::uniform3(1_000i64..500_000i64),
        caps in prop::array::uniform3(0i64..200_000i64),
        submissions in prop::collection::vec(
            (0usize..3, 0usize..3, 1i64..100_000i64, 0usize..15),
            0..8,
        ),
    ) {
        let orch = run_with_submissions(seed, opening, caps, &submissions);

        let total_opening: i64 = opening.iter().sum();
        let total_final: i64 = ["A", "B", "C"]
            .iter()
            .map(|id| orch.get_agent_balance(id).unwrap())
            .sum();
        prop_assert_eq!(total_opening, total_final);

        for (i, id) in ["A", "B", "C"].iter().enumerate() {
            let balance = orch.get_agent_balance(id).unwrap();
            let limit = orch.get_agent_allowed_overdraft_limit(id).unwrap();
            prop_assert!(balance >= -limit, "agent {} violated INV-CREDIT: balance {} < -{}", id, balance, limit);
            let _ = caps[i];
        }
    }

    #[test]
    fn inv_determinism_same_inputs_same_journal(
        seed in any::<u64>(),
        opening in prop::array::uniform3(1_000i64..500_000i64),
        caps in prop::array::uniform3(0i64..200_000i64),
        submissions in prop::collection::vec(
            (0usize..3, 0usize..3, 1i64..100_000i64, 0usize..15),
            0..8,
        ),
    ) {
        let orch_a = run_with_submissions(seed, opening, caps, &submissions);
        let orch_b = run_with_submissions(seed, opening, caps, &submissions);

        let types_a: Vec<_> = orch_a.get_all_events().iter().map(|e| e.event_type()).collect();
        let types_b: Vec<_> = orch_b.get_all_events().iter().map(|e| e.event_type()).collect();
        prop_assert_eq!(types_a, types_b);

        for id in ["A", "B", "C"] {
            prop_assert_eq!(
                orch_a.get_agent_balance(id).unwrap(),
                orch_b.get_agent_balance(id).unwrap()
            );
        }
    }
}
