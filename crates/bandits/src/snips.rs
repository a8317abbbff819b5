//! Self-normalized IPS: `Σ(w·r) / Σw`.

use ope_core::{
    ensure_count, ensure_finite, importance_weight, CompensatedSum, Estimator, Merge, OpeResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnipsEstimator {
    weighted_examples_count: CompensatedSum,
    weighted_reward: CompensatedSum,
}

impl SnipsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` identical decisions at once.
    pub fn add_counted(&mut self, p_log: f64, reward: f64, p_pred: f64, count: f64) -> OpeResult<()> {
        let w = importance_weight(p_log, p_pred)?;
        ensure_finite("reward", reward)?;
        ensure_count(count)?;

        self.weighted_examples_count += count * w;
        self.weighted_reward += count * w * reward;
        Ok(())
    }
}

impl Estimator for SnipsEstimator {
    fn add_example(&mut self, p_log: f64, reward: f64, p_pred: f64) -> OpeResult<()> {
        self.add_counted(p_log, reward, p_pred, 1.0)
    }

    /// `None` whenever the weight sum is exactly zero, including the case
    /// where examples were seen but the target policy never agreed.
    fn get(&self) -> OpeResult<Option<f64>> {
        let sum_w = self.weighted_examples_count.value();
        if sum_w == 0.0 {
            return Ok(None);
        }
        Ok(Some(self.weighted_reward.value() / sum_w))
    }
}

impl Merge for SnipsEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            weighted_examples_count: self
                .weighted_examples_count
                .merge(&other.weighted_examples_count),
            weighted_reward: self.weighted_reward.merge(&other.weighted_reward),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data() {
        assert_eq!(SnipsEstimator::new().get().unwrap(), None);
    }

    #[test]
    fn test_single_example() {
        let mut snips = SnipsEstimator::new();
        snips.add_example(0.3, 1.0, 0.6).unwrap();
        assert_eq!(snips.get().unwrap(), Some(1.0));
    }

    #[test]
    fn test_zero_weight_sum_is_no_data() {
        let mut snips = SnipsEstimator::new();
        snips.add_example(0.5, 1.0, 0.0).unwrap();
        snips.add_example(0.2, 0.0, 0.0).unwrap();
        assert_eq!(snips.get().unwrap(), None);
    }

    #[test]
    fn test_counted_examples() {
        let mut snips = SnipsEstimator::new();
        snips.add_counted(0.5, 1.0, 1.0, 3.0).unwrap();
        snips.add_counted(0.5, 0.0, 0.5, 2.0).unwrap();
        // (3 * 2 * 1) / (3 * 2 + 2 * 1)
        assert_eq!(snips.get().unwrap(), Some(0.75));
        assert!(snips.add_counted(0.5, 1.0, 0.5, f64::NAN).unwrap_err().is_validation());
    }

    #[test]
    fn test_self_normalization() {
        let mut snips = SnipsEstimator::new();
        snips.add_example(0.5, 1.0, 1.0).unwrap();
        snips.add_example(0.5, 0.0, 0.5).unwrap();
        // (2 * 1 + 1 * 0) / (2 + 1)
        assert_eq!(snips.get().unwrap(), Some(2.0 / 3.0));
    }
}
