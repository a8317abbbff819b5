//! Shared data generators and assertions for estimator tests across the
//! workspace crates.

use crate::error::OpeResult;
use crate::estimator::{Estimator, Interval};
use crate::types::DecisionExample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `|a - b| <= 1e-6 * (1 + |a| + |b|)`.
pub fn assert_is_close(a: f64, b: f64) {
    assert!(
        (a - b).abs() <= 1e-6 * (1.0 + a.abs() + b.abs()),
        "expected {a} to be close to {b}"
    );
}

/// `n` copies of the same decision.
pub fn constant_examples(n: usize, p_log: f64, reward: f64, p_pred: f64) -> Vec<DecisionExample> {
    vec![DecisionExample::new(p_log, reward, p_pred); n]
}

/// Two actions logged uniformly; the first (even index) pays `reward`, the
/// second pays 0. The target policy plays the first with `p_first`.
pub fn alternating_examples(n: usize, p_first: f64, reward: f64) -> Vec<DecisionExample> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                DecisionExample::new(0.5, reward, p_first)
            } else {
                DecisionExample::new(0.5, 0.0, 1.0 - p_first)
            }
        })
        .collect()
}

/// Same as [`alternating_examples`] with a constant drop probability.
pub fn alternating_examples_with_drop(
    n: usize,
    p_first: f64,
    reward: f64,
    drop_probability: f64,
) -> Vec<DecisionExample> {
    alternating_examples(n, p_first, reward)
        .into_iter()
        .map(|ex| ex.with_drop_probability(drop_probability))
        .collect()
}

/// Pseudo-random decisions over `num_actions` uniformly logged actions with
/// Bernoulli rewards; reproducible from `seed`.
pub fn random_examples(n: usize, num_actions: usize, seed: u64) -> Vec<DecisionExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let p_log = 1.0 / num_actions as f64;
    (0..n)
        .map(|_| {
            let action = rng.gen_range(0..num_actions);
            let reward = if rng.gen::<f64>() < 0.1 + 0.8 * (action as f64 / num_actions as f64) {
                1.0
            } else {
                0.0
            };
            let p_pred = if action == num_actions - 1 { 0.9 } else { 0.1 / (num_actions - 1) as f64 };
            DecisionExample::new(p_log, reward, p_pred)
        })
        .collect()
}

pub fn feed_estimator<E: Estimator>(estimator: &mut E, examples: &[DecisionExample]) -> OpeResult<()> {
    for ex in examples {
        estimator.add(ex)?;
    }
    Ok(())
}

pub fn feed_interval<I: Interval>(interval: &mut I, examples: &[DecisionExample]) -> OpeResult<()> {
    for ex in examples {
        interval.add_example(ex)?;
    }
    Ok(())
}
