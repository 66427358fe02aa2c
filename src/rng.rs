//! # Re-copy dice
//!
//! The snapshot builder bounds hard-link fan-out by occasionally re-copying a
//! file it otherwise would have linked. The decision is a coin flip with
//! probability `p`; this module is the one place that flip happens, so tests
//! can swap in a deterministic sequence instead of real randomness.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Something that can answer "should this file be re-copied instead of
/// hard-linked", given the probability computed by the builder for that file.
pub trait CopyDice {
    fn roll(&mut self, p: f64) -> bool;
}

/// Production RNG: a fast, non-cryptographic PRNG seeded from run-start time.
pub struct TimeSeededDice {
    rng: SmallRng,
}

impl TimeSeededDice {
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for TimeSeededDice {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyDice for TimeSeededDice {
    fn roll(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.gen::<f64>() < p
    }
}

/// Deterministic RNG for tests: seeded explicitly so outcomes are reproducible.
pub struct SeededDice {
    rng: SmallRng,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl CopyDice for SeededDice {
    fn roll(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.gen::<f64>() < p
    }
}

/// Always-link dice, useful in tests that want to assert pure link behavior
/// without probability noise.
pub struct NeverCopyDice;

impl CopyDice for NeverCopyDice {
    fn roll(&mut self, _p: f64) -> bool {
        false
    }
}

/// Always-copy dice, equivalent to `--force-copy`'s effective `p = 1`.
pub struct AlwaysCopyDice;

impl CopyDice for AlwaysCopyDice {
    fn roll(&mut self, _p: f64) -> bool {
        true
    }
}

/// Computes the re-copy probability from the configured policy knobs, per
/// `--hard-link-count N` implies `p = 1/(N+1)`; an explicit
/// `--copy-probability` wins if both are set; `--force-copy` forces `p = 1`;
/// the default is `p = 0`.
pub fn effective_probability(
    hard_link_count: Option<u32>,
    copy_probability: Option<f64>,
    force_copy: bool,
) -> f64 {
    if force_copy {
        return 1.0;
    }
    if let Some(p) = copy_probability {
        return p.clamp(0.0, 1.0);
    }
    if let Some(n) = hard_link_count {
        return 1.0 / (n as f64 + 1.0);
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_defaults_to_zero() {
        assert_eq!(effective_probability(None, None, false), 0.0);
    }

    #[test]
    fn force_copy_wins() {
        assert_eq!(effective_probability(Some(10), Some(0.1), true), 1.0);
    }

    #[test]
    fn explicit_probability_wins_over_hard_link_count() {
        assert_eq!(effective_probability(Some(3), Some(0.5), false), 0.5);
    }

    #[test]
    fn hard_link_count_derives_probability() {
        assert_eq!(effective_probability(Some(1), None, false), 0.5);
        assert_eq!(effective_probability(Some(4), None, false), 0.2);
    }

    #[test]
    fn boundary_probabilities_are_deterministic() {
        let mut never = NeverCopyDice;
        let mut always = AlwaysCopyDice;
        assert!(!never.roll(0.999));
        assert!(always.roll(0.001));
        let mut seeded = SeededDice::new(1);
        assert!(!seeded.roll(0.0));
        assert!(SeededDice::new(2).roll(1.0));
    }
}
