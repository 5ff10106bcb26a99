//! xorshift64* random number generator
//!
//! This is a fast, high-quality PRNG that is deterministic and suitable
//! for simulation purposes.
//!
//! # Algorithm
//!
//! xorshift64* is a variant of xorshift that passes TestU01's BigCrush
//! statistical tests. It uses 64-bit state and produces 64-bit output.
//!
//! # Determinism
//!
//! Same seed → same sequence of random numbers. This is CRITICAL for:
//! - Debugging (reproduce exact simulation)
//! - Testing (verify behavior)
//! - Research (validate results)

use serde::{Deserialize, Serialize};

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use payment_simulator_core_rs::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let value = rng.next();
/// let range_value = rng.range(0, 100); // [0, 100)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (64-bit)
    state: u64,
}

impl RngManager {
    /// Create a new RNG with given seed
    ///
    /// # Arguments
    /// * `seed` - Initial seed value (u64)
    ///
    /// # Example
    /// ```
    /// use payment_simulator_core_rs::RngManager;
    ///
    /// let rng = RngManager::new(12345);
    /// ```
    pub fn new(seed: u64) -> Self {
        // Ensure seed is never zero (xorshift requirement)
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Restore an RNG directly from a previously observed internal state,
    /// e.g. one recovered from `get_state()` in a checkpoint.
    pub fn from_state(state: u64) -> Self {
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }

    /// Generate next random u64 value
    ///
    /// This advances the internal state and returns a random value.
    ///
    /// # Example
    /// ```
    /// use payment_simulator_core_rs::RngManager;
    ///
    /// let mut rng = RngManager::new(12345);
    /// let value = rng.next();
    /// ```
    pub fn next(&mut self) -> u64 {
        // xorshift64* algorithm
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Generate random value in range [min, max)
    ///
    /// # Arguments
    /// * `min` - Minimum value (inclusive)
    /// * `max` - Maximum value (exclusive)
    ///
    /// # Panics
    /// Panics if min >= max
    ///
    /// # Example
    /// ```
    /// use payment_simulator_core_rs::RngManager;
    ///
    /// let mut rng = RngManager::new(12345);
    /// let amount = rng.range(10000, 100000); // $100 to $1000 in cents
    /// ```
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");

        let value = self.next();
        let range_size = (max - min) as u64;
        min + (value % range_size) as i64
    }

    /// Get current RNG state (for checkpointing/replay)
    ///
    /// # Example
    /// ```
    /// use payment_simulator_core_rs::RngManager;
    ///
    /// let rng = RngManager::new(12345);
    /// let state = rng.get_state();
    ///
    /// // Later, can recreate RNG from this state
    /// let rng2 = RngManager::new(state);
    /// ```
    pub fn get_state(&self) -> u64 {
        self.state
    }

    /// Generate random f64 in range [0.0, 1.0)
    ///
    /// Useful for sampling from probability distributions.
    ///
    /// # Example
    /// ```
    /// use payment_simulator_core_rs::RngManager;
    ///
    /// let mut rng = RngManager::new(12345);
    /// let probability = rng.next_f64();
    /// assert!(probability >= 0.0 && probability < 1.0);
    /// ```
    pub fn next_f64(&mut self) -> f64 {
        let value = self.next();
        // Convert to [0.0, 1.0) by dividing by 2^64
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Sample from a Poisson distribution with the given rate (Knuth's algorithm).
    ///
    /// Uses repeated `next_f64()` draws, so it inherits this generator's
    /// determinism: the same seed/state always yields the same sample.
    pub fn poisson(&mut self, rate: f64) -> u64 {
        if rate <= 0.0 {
            return 0;
        }
        let l = (-rate).exp();
        let mut k = 0u64;
        let mut p = 1.0;
        loop {
            k += 1;
            p *= self.next_f64();
            if p <= l {
                return k - 1;
            }
        }
    }

    /// Derive a fresh, independent sub-stream seeded deterministically from
    /// `(master_seed, category, key, tick)`.
    ///
    /// Used so that e.g. agent A's arrival draws at tick 5 never perturb
    /// agent B's stream regardless of the order agents are evaluated in.
    ///
    /// # Example
    /// ```
    /// use payment_simulator_core_rs::RngManager;
    ///
    /// let mut a = RngManager::derive(42, "arrival", "BANK_A", 5);
    /// let mut b = RngManager::derive(42, "arrival", "BANK_A", 5);
    /// assert_eq!(a.next(), b.next());
    /// ```
    pub fn derive(master_seed: u64, category: &str, key: &str, tick: usize) -> Self {
        let mut hash: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
        for chunk in [
            master_seed.to_le_bytes().as_slice(),
            category.as_bytes(),
            key.as_bytes(),
            (tick as u64).to_le_bytes().as_slice(),
        ] {
            for &byte in chunk {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
        }
        Self::new(splitmix64(hash))
    }
}

/// splitmix64 finalizer mix, used to spread FNV-1a hashes into
/// well-distributed xorshift64* seeds.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
