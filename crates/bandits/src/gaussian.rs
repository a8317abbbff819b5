//! CLT interval on the importance-weighted reward.

use ope_core::math::normal_quantile;
use ope_core::{
    validate_alpha, CompensatedSum, ConfidenceBounds, DecisionExample, Interval, Merge, OpeResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaussianInterval {
    examples_count: CompensatedSum,
    weighted_reward: CompensatedSum,
    weighted_reward_sq: CompensatedSum,
}

impl GaussianInterval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn examples_count(&self) -> f64 {
        self.examples_count.value()
    }
}

impl Interval for GaussianInterval {
    fn add_example(&mut self, example: &DecisionExample) -> OpeResult<()> {
        let (w, count) = example.drop_adjusted()?;
        let wr = w * example.reward;

        self.examples_count += count;
        self.weighted_reward += wr;
        self.weighted_reward_sq += wr * wr;
        Ok(())
    }

    /// Needs more than one event for a sample variance.
    fn get(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        validate_alpha(alpha)?;
        let n = self.examples_count.value();
        if n <= 1.0 {
            return Ok(ConfidenceBounds::undefined());
        }

        let sum_wr = self.weighted_reward.value();
        let variance = (self.weighted_reward_sq.value() - sum_wr * sum_wr / n) / (n - 1.0);
        let z = normal_quantile(1.0 - alpha / 2.0);
        let delta = z * (variance.max(0.0) / n).sqrt();
        let mean = sum_wr / n;
        Ok(ConfidenceBounds::new(mean - delta, mean + delta))
    }
}

impl Merge for GaussianInterval {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            examples_count: self.examples_count.merge(&other.examples_count),
            weighted_reward: self.weighted_reward.merge(&other.weighted_reward),
            weighted_reward_sq: self.weighted_reward_sq.merge(&other.weighted_reward_sq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ope_core::test_helpers::{alternating_examples, constant_examples, feed_interval};
    use ope_core::DEFAULT_ALPHA;

    #[test]
    fn test_needs_two_examples() {
        let mut interval = GaussianInterval::new();
        assert_eq!(interval.get(DEFAULT_ALPHA).unwrap(), ConfidenceBounds::undefined());
        interval.add_example(&DecisionExample::new(0.5, 1.0, 0.5)).unwrap();
        assert_eq!(interval.get(DEFAULT_ALPHA).unwrap(), ConfidenceBounds::undefined());
        interval.add_example(&DecisionExample::new(0.5, 0.0, 0.5)).unwrap();
        assert!(interval.get(DEFAULT_ALPHA).unwrap().is_defined());
    }

    #[test]
    fn test_constant_reward_collapses() {
        let mut interval = GaussianInterval::new();
        feed_interval(&mut interval, &constant_examples(50, 1.0, 0.5, 1.0)).unwrap();
        let bounds = interval.get(DEFAULT_ALPHA).unwrap();
        let (lower, upper) = (bounds.lower.unwrap(), bounds.upper.unwrap());
        assert!((lower - 0.5).abs() < 1e-6 && (upper - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric_around_ips() {
        let mut interval = GaussianInterval::new();
        feed_interval(&mut interval, &alternating_examples(1000, 0.8, 1.0)).unwrap();
        let bounds = interval.get(0.1).unwrap();
        let (lower, upper) = (bounds.lower.unwrap(), bounds.upper.unwrap());
        assert!(((lower + upper) / 2.0 - 0.8).abs() < 1e-9);
        assert!(bounds.contains(0.8));
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let interval = GaussianInterval::new();
        assert!(interval.get(0.0).unwrap_err().is_validation());
        assert!(interval.get(1.0).unwrap_err().is_validation());
    }
}
