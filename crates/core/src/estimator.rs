//! Capability contracts shared by every estimator in the workspace.
//!
//! Callers compose against these traits only (first-slot wrappers, shard
//! merging in the evaluator binary) and never need the concrete type.

use crate::error::OpeResult;
use crate::types::{ConfidenceBounds, DecisionExample};

/// Confidence level used when the caller does not pick one.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Absolute tolerance for the near-zero checks in closed-form interval solves.
pub const DEFAULT_ATOL: f64 = 1e-9;

/// Point estimator for single-decision (contextual bandit) logs.
pub trait Estimator {
    /// Record one logged decision.
    fn add_example(&mut self, p_log: f64, reward: f64, p_pred: f64) -> OpeResult<()>;

    /// Current estimate, `None` when no data has been observed. Never mutates.
    fn get(&self) -> OpeResult<Option<f64>>;

    /// Drop fields are ignored by point estimators.
    fn add(&mut self, example: &DecisionExample) -> OpeResult<()> {
        self.add_example(example.p_log, example.reward, example.p_pred)
    }
}

/// Confidence interval for single-decision logs.
pub trait Interval {
    fn add_example(&mut self, example: &DecisionExample) -> OpeResult<()>;

    /// Bounds at level `alpha`, undefined when no data has been observed.
    fn get(&self, alpha: f64) -> OpeResult<ConfidenceBounds>;
}

/// Associative, commutative combination of accumulators built over disjoint
/// parts of one logical stream.
pub trait Merge: Sized {
    fn merge(&self, other: &Self) -> OpeResult<Self>;
}

/// Point estimator for slates: one reward per decision made of several slots.
pub trait SlateEstimator {
    fn add_example(
        &mut self,
        p_logs: &[f64],
        reward: f64,
        p_preds: &[f64],
        count: f64,
    ) -> OpeResult<()>;

    fn get(&self) -> OpeResult<Option<f64>>;
}

pub trait SlateInterval {
    fn add_example(
        &mut self,
        p_logs: &[f64],
        reward: f64,
        p_preds: &[f64],
        count: f64,
    ) -> OpeResult<()>;

    fn get(&self, alpha: f64) -> OpeResult<ConfidenceBounds>;
}

/// Merge a non-empty sequence of accumulators, left to right.
pub fn merge_all<'a, T, I>(parts: I) -> OpeResult<Option<T>>
where
    T: Merge + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut iter = parts.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut acc = first.clone();
    for part in iter {
        acc = acc.merge(part)?;
    }
    Ok(Some(acc))
}

/// Check `alpha` lies strictly inside `(0, 1)`.
pub fn validate_alpha(alpha: f64) -> OpeResult<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(crate::error::OpeError::Validation(format!(
            "alpha must be in (0, 1), got {alpha}"
        )))
    }
}
