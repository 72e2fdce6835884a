//! Egress loss simulation.
//!
//! Both endpoints run the injector, so dropping only outbound writes still
//! emulates a symmetrically lossy channel. Inbound packets are never
//! dropped. Each injector owns its RNG and accepts a seed, so tests can
//! replay an exact drop sequence without cross-test interference.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bernoulli drop applied to every wire write.
#[derive(Debug)]
pub struct LossInjector {
    prob: f64,
    rng: Mutex<StdRng>,
}

impl LossInjector {
    /// Creates an injector with an entropy-seeded RNG. Probabilities
    /// outside `[0, 1]` are clamped.
    pub fn new(prob: f64) -> Self {
        Self::with_rng(prob, StdRng::from_entropy())
    }

    /// Creates an injector with a fixed seed for reproducible drops.
    pub fn seeded(prob: f64, seed: u64) -> Self {
        Self::with_rng(prob, StdRng::seed_from_u64(seed))
    }

    fn with_rng(prob: f64, rng: StdRng) -> Self {
        Self {
            prob: prob.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    /// Configured drop probability.
    pub fn probability(&self) -> f64 {
        self.prob
    }

    /// Draws one decision: `true` means suppress the write.
    pub fn should_drop(&self) -> bool {
        if self.prob <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().expect("loss rng lock poisoned");
        rng.gen_bool(self.prob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_probability_never_drops() {
        let loss = LossInjector::new(0.0);
        assert!((0..1000).all(|_| !loss.should_drop()));
    }

    #[test]
    fn certain_probability_always_drops() {
        let loss = LossInjector::new(1.0);
        assert!((0..1000).all(|_| loss.should_drop()));
    }

    #[test]
    fn same_seed_same_decisions() {
        let a = LossInjector::seeded(0.5, 42);
        let b = LossInjector::seeded(0.5, 42);
        let da: Vec<bool> = (0..256).map(|_| a.should_drop()).collect();
        let db: Vec<bool> = (0..256).map(|_| b.should_drop()).collect();
        assert_eq!(da, db);
        // A half-probability channel should both drop and pass.
        assert!(da.iter().any(|&d| d));
        assert!(da.iter().any(|&d| !d));
    }

    #[test]
    fn out_of_range_probability_is_clamped() {
        assert_eq!(LossInjector::new(-0.3).probability(), 0.0);
        assert_eq!(LossInjector::new(1.7).probability(), 1.0);
    }
}
