//! CLT interval on the pseudo-inverse weighted reward.

use crate::pseudo_inverse::pseudo_inverse_weight;
use ope_core::math::normal_quantile;
use ope_core::{
    ensure_count, ensure_finite, validate_alpha, CompensatedSum, ConfidenceBounds, Merge,
    OpeResult, SlateInterval,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlateGaussianInterval {
    examples_count: CompensatedSum,
    weighted_reward: CompensatedSum,
    weighted_reward_sq: CompensatedSum,
}

impl SlateGaussianInterval {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlateInterval for SlateGaussianInterval {
    fn add_example(
        &mut self,
        p_logs: &[f64],
        reward: f64,
        p_preds: &[f64],
        count: f64,
    ) -> OpeResult<()> {
        let w = pseudo_inverse_weight(p_logs, p_preds)?;
        ensure_finite("reward", reward)?;
        ensure_count(count)?;

        let wr = reward * w;
        self.examples_count += count;
        self.weighted_reward += wr * count;
        self.weighted_reward_sq += wr * wr * count;
        Ok(())
    }

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

impl Merge for SlateGaussianInterval {
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
    use ope_core::DEFAULT_ALPHA;

    #[test]
    fn test_needs_two_examples() {
        let mut interval = SlateGaussianInterval::new();
        interval.add_example(&[0.5, 0.5], 1.0, &[0.5, 0.5], 1.0).unwrap();
        assert_eq!(interval.get(DEFAULT_ALPHA).unwrap(), ConfidenceBounds::undefined());
        interval.add_example(&[0.5, 0.5], 0.0, &[0.5, 0.5], 1.0).unwrap();
        assert!(interval.get(DEFAULT_ALPHA).unwrap().is_defined());
    }
}
