//! Pseudo-inverse estimator.
//!
//! When the slate space is a Cartesian product and the logging policy picks
//! every slot independently, the slate weight decomposes into a sum of
//! per-slot weights: `w = 1 - K + Σ_k p_pred_k / p_log_k`.

use ope_core::{
    ensure_count, ensure_finite, importance_weight, CompensatedSum, Merge, OpeError, OpeResult,
    SlateEstimator,
};
use serde::{Deserialize, Serialize};

/// Pseudo-inverse weight of one slate. Can be negative.
pub fn pseudo_inverse_weight(p_logs: &[f64], p_preds: &[f64]) -> OpeResult<f64> {
    if p_logs.len() != p_preds.len() {
        return Err(OpeError::LengthMismatch(format!(
            "p_logs and p_preds must be the same length, found {} and {}",
            p_logs.len(),
            p_preds.len()
        )));
    }
    if p_logs.is_empty() {
        return Err(OpeError::Validation("a slate needs at least one slot".into()));
    }

    let mut w = CompensatedSum::from(1.0 - p_logs.len() as f64);
    for (&p_log, &p_pred) in p_logs.iter().zip(p_preds) {
        w += importance_weight(p_log, p_pred)?;
    }
    Ok(w.value())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PseudoInverseEstimator {
    examples_count: CompensatedSum,
    weighted_reward: CompensatedSum,
}

impl PseudoInverseEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlateEstimator for PseudoInverseEstimator {
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

        self.examples_count += count;
        self.weighted_reward += reward * w * count;
        Ok(())
    }

    fn get(&self) -> OpeResult<Option<f64>> {
        let n = self.examples_count.value();
        if n > 0.0 {
            Ok(Some(self.weighted_reward.value() / n))
        } else {
            Ok(None)
        }
    }
}

impl Merge for PseudoInverseEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            examples_count: self.examples_count.merge(&other.examples_count),
            weighted_reward: self.weighted_reward.merge(&other.weighted_reward),
        })
    }
}
