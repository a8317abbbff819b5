//! CR(-2) estimator and confidence interval.
//!
//! Both add one fake observation at whichever weight bound sits on the far
//! side of the normalization constraint and solve the dual in closed form,
//! so everything is O(1) over a handful of running sums.

use ope_core::math::f_isf_1;
use ope_core::{
    drop_adjusted, ensure_finite, importance_weight, validate_alpha, CompensatedSum,
    ConfidenceBounds, DecisionExample, Estimator, Interval, Merge, OpeError, OpeResult,
    RewardRange, WeightBounds, DEFAULT_ATOL,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;
use tracing::warn;

/// The fake weight: `wmax` if the weights sum short of `n`, else `wmin`.
/// `None` stands for an unbounded `wmax`.
fn fake_weight(bounds: &WeightBounds, sum_w: f64, n: f64) -> Option<f64> {
    if sum_w < n {
        bounds.wmax
    } else {
        Some(bounds.wmin)
    }
}

fn check_weight(w: f64) -> OpeResult<()> {
    if !w.is_finite() || w < 0.0 {
        return Err(OpeError::Validation(format!(
            "negative or non-finite importance weight {w}"
        )));
    }
    Ok(())
}

// ─── Point estimator ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CressiereadEstimator {
    bounds: WeightBounds,
    n: CompensatedSum,
    sum_w: CompensatedSum,
    sum_wsq: CompensatedSum,
    sum_wr: CompensatedSum,
    sum_wsqr: CompensatedSum,
    sum_r: CompensatedSum,
}

impl CressiereadEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the theoretical weight bounds. These work better than the
    /// empirical extremes.
    pub fn with_bounds(bounds: WeightBounds) -> Self {
        Self {
            bounds,
            ..Self::default()
        }
    }

    pub fn bounds(&self) -> WeightBounds {
        self.bounds
    }

    /// Number of examples seen.
    pub fn count(&self) -> f64 {
        self.n.value()
    }

    /// Add an example whose importance weight is already known.
    pub fn add_weighted(&mut self, w: f64, reward: f64) -> OpeResult<()> {
        check_weight(w)?;
        ensure_finite("reward", reward)?;

        self.n += 1.0;
        self.sum_w += w;
        self.sum_wsq += w * w;
        self.sum_wr += w * reward;
        self.sum_wsqr += w * w * reward;
        self.sum_r += reward;
        self.bounds.observe(w);
        Ok(())
    }
}

impl Estimator for CressiereadEstimator {
    fn add_example(&mut self, p_log: f64, reward: f64, p_pred: f64) -> OpeResult<()> {
        self.add_weighted(importance_weight(p_log, p_pred)?, reward)
    }

    fn get(&self) -> OpeResult<Option<f64>> {
        let n = self.n.value();
        if n == 0.0 {
            return Ok(None);
        }

        let sum_w = self.sum_w.value();
        let sum_wsq = self.sum_wsq.value();
        let sum_wr = self.sum_wr.value();
        let sum_wsqr = self.sum_wsqr.value();
        let sum_r = self.sum_r.value();

        let (gamma, beta) = match fake_weight(&self.bounds, sum_w, n) {
            None => (-(1.0 + n) / n, 0.0),
            Some(wfake) => {
                let a = (wfake + sum_w) / (1.0 + n);
                let b = (wfake * wfake + sum_wsq) / (1.0 + n);
                if !(a * a < b) {
                    warn!(a, b, n, "degenerate cressieread dual, no estimate");
                    return Ok(None);
                }
                ((b - a) / (a * a - b), (1.0 - a) / (a * a - b))
            }
        };

        let vhat = (-gamma * sum_wr - beta * sum_wsqr) / (1.0 + n);
        let missing = (1.0 - (-gamma * sum_w - beta * sum_wsq) / (1.0 + n)).max(0.0);
        Ok(Some(vhat + missing * sum_r / n))
    }
}

impl Merge for CressiereadEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            bounds: self.bounds.merge(&other.bounds),
            n: self.n.merge(&other.n),
            sum_w: self.sum_w.merge(&other.sum_w),
            sum_wsq: self.sum_wsq.merge(&other.sum_wsq),
            sum_wr: self.sum_wr.merge(&other.sum_wr),
            sum_wsqr: self.sum_wsqr.merge(&other.sum_wsqr),
            sum_r: self.sum_r.merge(&other.sum_r),
        })
    }
}

// ─── Interval ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CressiereadInterval {
    bounds: WeightBounds,
    rewards: RewardRange,
    n: CompensatedSum,
    sum_w: CompensatedSum,
    sum_wsq: CompensatedSum,
    sum_wr: CompensatedSum,
    sum_wsqr: CompensatedSum,
    sum_wsqrsq: CompensatedSum,
}

impl CressiereadInterval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(bounds: WeightBounds, rewards: RewardRange) -> Self {
        Self {
            bounds,
            rewards,
            ..Self::default()
        }
    }

    pub fn bounds(&self) -> WeightBounds {
        self.bounds
    }

    pub fn rewards(&self) -> RewardRange {
        self.rewards
    }

    /// Number of events seen, implied drops included.
    pub fn count(&self) -> f64 {
        self.n.value()
    }

    /// Add an example whose importance weight is already known. The weight is
    /// rescaled by the drop probability and the implied dropped events are
    /// counted.
    pub fn add_weighted(
        &mut self,
        w: f64,
        reward: f64,
        drop_probability: f64,
        drop_count: Option<u64>,
    ) -> OpeResult<()> {
        let (w, count) = drop_adjusted(w, drop_probability, drop_count)?;
        self.rewards.observe(reward)?;

        self.n += count;
        self.sum_w += w;
        self.sum_wsq += w * w;
        self.sum_wr += w * reward;
        self.sum_wsqr += w * w * reward;
        self.sum_wsqrsq += w * w * reward * reward;
        self.bounds.observe(w);
        Ok(())
    }

    /// Bounds at level `alpha`; `atol` absorbs round-off in the feasibility
    /// test of each candidate.
    pub fn get_with_tolerance(&self, alpha: f64, atol: f64) -> OpeResult<ConfidenceBounds> {
        validate_alpha(alpha)?;
        let n = self.n.value();
        if n == 0.0 {
            return Ok(ConfidenceBounds::undefined());
        }

        let sum_w = self.sum_w.value();
        let sum_wsq = self.sum_wsq.value();
        let sum_wr = self.sum_wr.value();
        let sum_wsqr = self.sum_wsqr.value();
        let sum_wsqrsq = self.sum_wsqrsq.value();
        let RewardRange { rmin, rmax, .. } = self.rewards;

        let unc_gstar = match fake_weight(&self.bounds, sum_w, n) {
            None => 1.0 + 1.0 / n,
            Some(wfake) => {
                let a = (wfake + sum_w) / (1.0 + n);
                let b = (wfake * wfake + sum_wsq) / (1.0 + n);
                if !(b > a * a) {
                    warn!(a, b, n, "degenerate cressieread interval, using reward range");
                    return Ok(ConfidenceBounds::new(rmin, rmax));
                }
                (1.0 + n) * (a - 1.0).powi(2) / (b - a * a)
            }
        };

        let delta = f_isf_1(alpha, n)?;
        let phi = (-unc_gstar - delta) / (2.0 * (1.0 + n));

        let mut endpoints = [rmin, rmax];
        for (endpoint, (r, sign)) in endpoints.iter_mut().zip([(rmin, 1.0), (rmax, -1.0)]) {
            let mut best: Option<f64> = None;
            let mut consider = |x: f64, y: f64, z: f64| {
                let candidate = if (y * z).abs() <= atol * atol {
                    Some(x - SQRT_2 * atol)
                } else if z <= 0.0 && y * z >= 0.0 {
                    Some(x - (2.0 * y * z).sqrt())
                } else {
                    None
                };
                if let Some(c) = candidate {
                    best = Some(best.map_or(c, |b: f64| b.min(c)));
                }
            };

            for wfake in [Some(self.bounds.wmin), self.bounds.wmax] {
                match wfake {
                    None => {
                        let x = sign * (r + (sum_wr - sum_w * r) / n);
                        let y = (r * sum_w - sum_wr).powi(2) / (n * (1.0 + n))
                            - (r * r * sum_wsq - 2.0 * r * sum_wsqr + sum_wsqrsq) / (1.0 + n);
                        let z = phi + 1.0 / (2.0 * n);
                        consider(x, y, z);
                    }
                    Some(wfake) => {
                        let barw = (wfake + sum_w) / (1.0 + n);
                        let barwsq = (wfake * wfake + sum_wsq) / (1.0 + n);
                        let barwr = sign * (wfake * r + sum_wr) / (1.0 + n);
                        let barwsqr = sign * (wfake * wfake * r + sum_wsqr) / (1.0 + n);
                        let barwsqrsq = (wfake * wfake * r * r + sum_wsqrsq) / (1.0 + n);

                        let spread = barwsq - barw * barw;
                        if spread > 0.0 {
                            let cov = barwsqr - barw * barwr;
                            let x = barwr + (1.0 - barw) * cov / spread;
                            let y = cov * cov / spread - (barwsqrsq - barwr * barwr);
                            let z = phi + 0.5 * (1.0 - barw).powi(2) / spread;
                            consider(x, y, z);
                        }
                    }
                }
            }

            // No feasible candidate leaves the trivial bound in place.
            if let Some(best) = best {
                *endpoint = self.rewards.clamp(sign * best);
            }
        }

        Ok(ConfidenceBounds::new(endpoints[0], endpoints[1]))
    }
}

impl Interval for CressiereadInterval {
    fn add_example(&mut self, example: &DecisionExample) -> OpeResult<()> {
        let w = example.importance_weight()?;
        self.add_weighted(
            w,
            example.reward,
            example.drop_probability,
            example.drop_count,
        )
    }

    fn get(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        self.get_with_tolerance(alpha, DEFAULT_ATOL)
    }
}

impl Merge for CressiereadInterval {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            rewards: self.rewards.merge(&other.rewards)?,
            bounds: self.bounds.merge(&other.bounds),
            n: self.n.merge(&other.n),
            sum_w: self.sum_w.merge(&other.sum_w),
            sum_wsq: self.sum_wsq.merge(&other.sum_wsq),
            sum_wr: self.sum_wr.merge(&other.sum_wr),
            sum_wsqr: self.sum_wsqr.merge(&other.sum_wsqr),
            sum_wsqrsq: self.sum_wsqrsq.merge(&other.sum_wsqrsq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ope_core::test_helpers::{
        alternating_examples, assert_is_close, constant_examples, feed_estimator, feed_interval,
    };
    use ope_core::DEFAULT_ALPHA;

    #[test]
    fn test_no_data() {
        assert_eq!(CressiereadEstimator::new().get().unwrap(), None);
        assert_eq!(
            CressiereadInterval::new().get(DEFAULT_ALPHA).unwrap(),
            ConfidenceBounds::undefined()
        );
    }

    #[test]
    fn test_unit_weights_return_mean_reward() {
        let mut estimator = CressiereadEstimator::new();
        feed_estimator(&mut estimator, &constant_examples(10, 1.0, 0.25, 1.0)).unwrap();
        assert_is_close(estimator.get().unwrap().unwrap(), 0.25);
    }

    #[test]
    fn test_single_example() {
        let mut estimator = CressiereadEstimator::new();
        estimator.add_example(0.3, 1.0, 0.6).unwrap();
        assert_is_close(estimator.get().unwrap().unwrap(), 1.0);
    }

    #[test]
    fn test_expected_value() {
        let mut estimator = CressiereadEstimator::new();
        feed_estimator(&mut estimator, &alternating_examples(2000, 0.8, 1.0)).unwrap();
        let v = estimator.get().unwrap().unwrap();
        assert!((v - 0.8).abs() < 0.05, "{v}");
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut estimator = CressiereadEstimator::new();
        assert!(estimator.add_weighted(-1.0, 1.0).unwrap_err().is_validation());
        assert_eq!(estimator.count(), 0.0);
    }

    #[test]
    fn test_interval_contains_true_value() {
        let mut interval = CressiereadInterval::new();
        feed_interval(&mut interval, &alternating_examples(2000, 0.8, 1.0)).unwrap();
        let bounds = interval.get(DEFAULT_ALPHA).unwrap();
        let (lower, upper) = (bounds.lower.unwrap(), bounds.upper.unwrap());
        assert!(lower <= upper);
        assert!((0.0..=1.0).contains(&lower) && (0.0..=1.0).contains(&upper));
        assert!(bounds.contains(0.8), "{bounds:?}");
    }

    #[test]
    fn test_interval_fixed_bounds_reject_out_of_range_reward() {
        let mut interval = CressiereadInterval::new();
        let err = interval
            .add_example(&DecisionExample::new(0.5, 2.0, 0.5))
            .unwrap_err();
        assert!(matches!(err, OpeError::RewardOutOfBounds { .. }));
        assert_eq!(interval.count(), 0.0);
    }

    #[test]
    fn test_interval_empirical_bounds_widen() {
        let rewards = RewardRange::empirical(0.0, 1.0).unwrap();
        let mut interval = CressiereadInterval::with_config(WeightBounds::default(), rewards);
        interval.add_example(&DecisionExample::new(0.5, 3.0, 0.5)).unwrap();
        assert_eq!(interval.rewards().rmax, 3.0);
    }

    #[test]
    fn test_interval_counts_implied_drops() {
        let mut interval = CressiereadInterval::new();
        interval
            .add_example(&DecisionExample::new(0.5, 1.0, 0.5).with_drop_probability(0.5))
            .unwrap();
        assert_is_close(interval.count(), 2.0);

        interval
            .add_example(&DecisionExample::new(0.5, 1.0, 0.5).with_drop_count(3))
            .unwrap();
        assert_is_close(interval.count(), 6.0);
    }

    #[test]
    fn test_merge_rejects_mismatched_reward_bounds() {
        let a = CressiereadInterval::new();
        let b = CressiereadInterval::with_config(
            WeightBounds::default(),
            RewardRange::fixed(0.0, 2.0).unwrap(),
        );
        assert!(a.merge(&b).unwrap_err().is_configuration());

        let c = CressiereadInterval::with_config(
            WeightBounds::default(),
            RewardRange::empirical(0.0, 1.0).unwrap(),
        );
        assert!(a.merge(&c).unwrap_err().is_configuration());
    }
}
