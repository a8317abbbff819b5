//! Empirical-likelihood (MLE) estimator.
//!
//! Finds the dual variable `β` of the constrained reweighting
//! `q(w) = 1 / ((w - 1)·β + n)` that satisfies `Σ c·w·q = 1`. The objective
//! needs every weight individually, so unlike the other estimators this one
//! keeps the full list of observations rather than running sums.

use ope_core::math::brentq;
use ope_core::{
    ensure_count, ensure_finite, importance_weight, CompensatedSum, Estimator, Merge, OpeResult,
    WeightBounds,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const GRAD_TOL: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Observation {
    count: f64,
    weight: f64,
    reward: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MleEstimator {
    bounds: WeightBounds,
    data: Vec<Observation>,
}

impl MleEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the theoretical weight bounds. The true bounds work better
    /// than the empirical extremes.
    pub fn with_bounds(bounds: WeightBounds) -> Self {
        Self {
            bounds,
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Add `count` identical decisions as one retained observation.
    pub fn add_counted(&mut self, p_log: f64, reward: f64, p_pred: f64, count: f64) -> OpeResult<()> {
        let w = importance_weight(p_log, p_pred)?;
        ensure_finite("reward", reward)?;
        ensure_count(count)?;

        self.data.push(Observation {
            count,
            weight: w,
            reward,
        });
        self.bounds.observe(w);
        Ok(())
    }

    fn grad_dual_objective(&self, n: f64, beta: f64) -> f64 {
        self.data
            .iter()
            .map(|o| o.count * (o.weight - 1.0) / ((o.weight - 1.0) * beta + n))
            .collect::<CompensatedSum>()
            .value()
    }

    /// Feasible range for `β` keeping every `q` positive.
    fn beta_bracket(&self, n: f64) -> (f64, f64) {
        let beta_ub = n / (1.0 - self.bounds.wmin);
        let beta_max = self
            .data
            .iter()
            .filter(|o| o.weight < 1.0)
            .map(|o| (n - o.count) / (1.0 - o.weight))
            .fold(beta_ub, f64::min);

        let beta_lb = match self.bounds.wmax {
            None => 0.0,
            Some(wmax) => n / (1.0 - wmax),
        };
        let beta_min = self
            .data
            .iter()
            .filter(|o| o.weight > 1.0)
            .map(|o| (n - o.count) / (1.0 - o.weight))
            .fold(beta_lb, f64::max);

        (beta_min, beta_max)
    }
}

impl Estimator for MleEstimator {
    fn add_example(&mut self, p_log: f64, reward: f64, p_pred: f64) -> OpeResult<()> {
        self.add_counted(p_log, reward, p_pred, 1.0)
    }

    fn get(&self) -> OpeResult<Option<f64>> {
        let n = self.data.iter().map(|o| o.count).collect::<CompensatedSum>().value();
        if n == 0.0 {
            return Ok(None);
        }

        let (beta_min, beta_max) = self.beta_bracket(n);
        let grad_min = self.grad_dual_objective(n, beta_min);
        let grad_max = self.grad_dual_objective(n, beta_max);

        // The gradient decreases in β: an end already at (or past) zero is
        // the root, otherwise the bracket holds a sign change.
        let beta_star = if grad_min <= GRAD_TOL {
            beta_min
        } else if grad_max >= -GRAD_TOL {
            beta_max
        } else {
            brentq(|beta| self.grad_dual_objective(n, beta), beta_min, beta_max)?
        };
        debug!(beta_min, beta_max, beta_star, "mle dual solved");

        let q = |o: &Observation| 1.0 / ((o.weight - 1.0) * beta_star + n);
        let sum_of_w = self
            .data
            .iter()
            .map(|o| o.count * o.weight * q(o))
            .collect::<CompensatedSum>()
            .value();
        let missing = (1.0 - sum_of_w).max(0.0);

        let vhat = self
            .data
            .iter()
            .map(|o| o.count * o.weight * o.reward * q(o))
            .collect::<CompensatedSum>()
            .value();
        let rhat_missing = self
            .data
            .iter()
            .map(|o| o.count * o.reward)
            .collect::<CompensatedSum>()
            .value()
            / n;

        Ok(Some(vhat + missing * rhat_missing))
    }
}

/// Concatenates the retained observations, so the merged estimator is exactly
/// the single-pass one.
impl Merge for MleEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        let mut data = self.data.clone();
        data.extend_from_slice(&other.data);
        Ok(Self {
            bounds: self.bounds.merge(&other.bounds),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpsEstimator;
    use ope_core::test_helpers::{
        alternating_examples, assert_is_close, constant_examples, feed_estimator, random_examples,
    };

    #[test]
    fn test_no_data() {
        assert_eq!(MleEstimator::new().get().unwrap(), None);
    }

    #[test]
    fn test_unit_weights_return_mean_reward() {
        let mut mle = MleEstimator::new();
        feed_estimator(&mut mle, &constant_examples(10, 1.0, 3.5, 1.0)).unwrap();
        assert_is_close(mle.get().unwrap().unwrap(), 3.5);
    }

    #[test]
    fn test_single_example_above_one() {
        let mut mle = MleEstimator::new();
        mle.add_example(0.3, 1.0, 0.6).unwrap();
        assert_is_close(mle.get().unwrap().unwrap(), 1.0);
    }

    #[test]
    fn test_single_example_below_one() {
        let mut mle = MleEstimator::new();
        mle.add_example(0.5, 1.0, 0.25).unwrap();
        let v = mle.get().unwrap().unwrap();
        assert!(v.is_finite());
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn test_weights_on_both_sides_of_one() {
        // Weights 1.6 and 0.4 average exactly 1, so the uniform reweighting
        // is already feasible and the estimate equals IPS.
        for n in [2, 10, 100, 2000] {
            let examples = alternating_examples(n, 0.8, 1.0);
            let mut mle = MleEstimator::new();
            feed_estimator(&mut mle, &examples).unwrap();
            let mut ips = IpsEstimator::new();
            feed_estimator(&mut ips, &examples).unwrap();

            assert_is_close(mle.get().unwrap().unwrap(), 0.8);
            assert_is_close(mle.get().unwrap().unwrap(), ips.get().unwrap().unwrap());
        }
    }

    #[test]
    fn test_counted_matches_repeated() {
        let mut counted = MleEstimator::new();
        counted.add_counted(0.5, 1.0, 0.8, 3.0).unwrap();
        counted.add_counted(0.5, 0.0, 0.2, 3.0).unwrap();

        let mut repeated = MleEstimator::new();
        feed_estimator(&mut repeated, &alternating_examples(6, 0.8, 1.0)).unwrap();

        assert_is_close(counted.get().unwrap().unwrap(), repeated.get().unwrap().unwrap());
        assert!(counted.add_counted(0.5, 1.0, 0.5, -1.0).unwrap_err().is_validation());
        assert_eq!(counted.len(), 2);
    }

    #[test]
    fn test_all_zero_weights() {
        let mut mle = MleEstimator::new();
        feed_estimator(&mut mle, &constant_examples(5, 0.5, 1.0, 0.0)).unwrap();
        let v = mle.get().unwrap().unwrap();
        assert!(v.is_finite());
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let examples = random_examples(500, 4, 7);
        let mut full = MleEstimator::new();
        feed_estimator(&mut full, &examples).unwrap();

        let mut left = MleEstimator::new();
        let mut right = MleEstimator::new();
        feed_estimator(&mut left, &examples[..123]).unwrap();
        feed_estimator(&mut right, &examples[123..]).unwrap();

        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.len(), full.len());
        assert_is_close(merged.get().unwrap().unwrap(), full.get().unwrap().unwrap());
    }
}
