//! Clopper–Pearson interval on importance-weighted rewards.
//!
//! Rewards are normalized onto `[0, 1]` and the weighted sum is treated as a
//! (fractional) binomial count, scaled down by the largest weight seen so that
//! every pseudo-trial is itself a probability.

use ope_core::math::clopper_pearson;
use ope_core::{
    validate_alpha, CompensatedSum, ConfidenceBounds, DecisionExample, Interval, Merge, OpeResult,
    RewardRange,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sums are kept in reward units and normalized at query time, which keeps
/// empirical reward bounds and merging exact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClopperPearsonInterval {
    rewards: RewardRange,
    examples_count: CompensatedSum,
    weighted_reward: CompensatedSum,
    weight_sum: CompensatedSum,
    max_weight: f64,
}

impl ClopperPearsonInterval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rewards(rewards: RewardRange) -> Self {
        Self {
            rewards,
            ..Self::default()
        }
    }

    pub fn rewards(&self) -> RewardRange {
        self.rewards
    }
}

impl Interval for ClopperPearsonInterval {
    fn add_example(&mut self, example: &DecisionExample) -> OpeResult<()> {
        let (w, count) = example.drop_adjusted()?;
        self.rewards.observe(example.reward)?;

        self.examples_count += count;
        self.weighted_reward += w * example.reward;
        self.weight_sum += w;
        self.max_weight = self.max_weight.max(w);
        Ok(())
    }

    fn get(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        validate_alpha(alpha)?;
        let n = self.examples_count.value();
        if n == 0.0 {
            return Ok(ConfidenceBounds::undefined());
        }

        let RewardRange { rmin, rmax, .. } = self.rewards;
        if self.max_weight <= 0.0 {
            return Ok(ConfidenceBounds::new(rmin, rmax));
        }
        let width = self.rewards.width();
        if width == 0.0 {
            return Ok(ConfidenceBounds::new(rmin, rmin));
        }

        let normalized = (self.weighted_reward.value() - rmin * self.weight_sum.value()) / width;
        let trials = n / self.max_weight;
        let mut successes = normalized / self.max_weight;
        if successes > trials {
            warn!(successes, trials, "weighted successes exceed trials, capping");
            successes = trials;
        }

        let (lower, upper) = clopper_pearson(successes, trials, alpha)?;
        Ok(ConfidenceBounds::new(
            self.rewards.scale_back(lower),
            self.rewards.scale_back(upper),
        ))
    }
}

impl Merge for ClopperPearsonInterval {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            rewards: self.rewards.merge(&other.rewards)?,
            examples_count: self.examples_count.merge(&other.examples_count),
            weighted_reward: self.weighted_reward.merge(&other.weighted_reward),
            weight_sum: self.weight_sum.merge(&other.weight_sum),
            max_weight: self.max_weight.max(other.max_weight),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ope_core::test_helpers::{alternating_examples, constant_examples, feed_interval};
    use ope_core::{OpeError, DEFAULT_ALPHA};

    #[test]
    fn test_no_data() {
        assert_eq!(
            ClopperPearsonInterval::new().get(DEFAULT_ALPHA).unwrap(),
            ConfidenceBounds::undefined()
        );
    }

    #[test]
    fn test_zero_weights_give_trivial_bounds() {
        let mut interval = ClopperPearsonInterval::new();
        feed_interval(&mut interval, &constant_examples(10, 0.5, 1.0, 0.0)).unwrap();
        assert_eq!(
            interval.get(DEFAULT_ALPHA).unwrap(),
            ConfidenceBounds::new(0.0, 1.0)
        );
    }

    #[test]
    fn test_all_successes_reach_upper_bound() {
        let mut interval = ClopperPearsonInterval::new();
        feed_interval(&mut interval, &constant_examples(20, 1.0, 1.0, 1.0)).unwrap();
        let bounds = interval.get(DEFAULT_ALPHA).unwrap();
        assert_eq!(bounds.upper, Some(1.0));
        // (alpha / 2)^(1 / 20)
        let expected = (0.025f64).powf(1.0 / 20.0);
        assert!((bounds.lower.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_contains_true_value() {
        let mut interval = ClopperPearsonInterval::new();
        feed_interval(&mut interval, &alternating_examples(2000, 0.8, 1.0)).unwrap();
        assert!(interval.get(DEFAULT_ALPHA).unwrap().contains(0.8));
    }

    #[test]
    fn test_scales_back_to_reward_range() {
        let rewards = RewardRange::fixed(-1.0, 1.0).unwrap();
        let mut interval = ClopperPearsonInterval::with_rewards(rewards);
        feed_interval(&mut interval, &constant_examples(50, 1.0, -1.0, 1.0)).unwrap();
        let bounds = interval.get(DEFAULT_ALPHA).unwrap();
        assert_eq!(bounds.lower, Some(-1.0));
        assert!(bounds.upper.unwrap() < 0.0);
    }

    #[test]
    fn test_fixed_bounds_reject_out_of_range_reward() {
        let mut interval = ClopperPearsonInterval::new();
        let err = interval
            .add_example(&DecisionExample::new(0.5, -0.1, 0.5))
            .unwrap_err();
        assert!(matches!(err, OpeError::RewardOutOfBounds { .. }));
    }
}
