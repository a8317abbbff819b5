//! Inverse propensity score estimator: `Σ(w·r) / n`.

use ope_core::{
    ensure_count, ensure_finite, importance_weight, CompensatedSum, Estimator, Merge, OpeResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpsEstimator {
    examples_count: CompensatedSum,
    weighted_reward: CompensatedSum,
}

impl IpsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn examples_count(&self) -> f64 {
        self.examples_count.value()
    }

    /// Add `count` identical decisions at once.
    pub fn add_counted(&mut self, p_log: f64, reward: f64, p_pred: f64, count: f64) -> OpeResult<()> {
        let w = importance_weight(p_log, p_pred)?;
        ensure_finite("reward", reward)?;
        ensure_count(count)?;

        self.examples_count += count;
        self.weighted_reward += count * w * reward;
        Ok(())
    }
}

impl Estimator for IpsEstimator {
    fn add_example(&mut self, p_log: f64, reward: f64, p_pred: f64) -> OpeResult<()> {
        self.add_counted(p_log, reward, p_pred, 1.0)
    }

    fn get(&self) -> OpeResult<Option<f64>> {
        let n = self.examples_count.value();
        if n == 0.0 {
            return Ok(None);
        }
        Ok(Some(self.weighted_reward.value() / n))
    }
}

impl Merge for IpsEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            examples_count: self.examples_count.merge(&other.examples_count),
            weighted_reward: self.weighted_reward.merge(&other.weighted_reward),
        })
    }
}
