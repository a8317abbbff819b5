//! Anytime-valid confidence sequence for importance-weighted rewards.
//!
//! Both bounds come from a betting martingale on the rescaled reward: the
//! lower bound bets on `X = w·(r - rmin)/(rmax - rmin)` and the upper bound
//! on the mirrored `w·(rmax - r)/(rmax - rmin)`. Each running sum is paired
//! with a predictable plug-in mean, so the bound stays valid however often it
//! is queried. The plug-ins make the state path dependent, so there is no
//! merge.

use ope_core::math::{brentq, ln_lower_gamma, trigamma};
use ope_core::{
    validate_alpha, CompensatedSum, ConfidenceBounds, DecisionExample, Interval, OpeError,
    OpeResult, RewardRange,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const RHO: f64 = 1.0;

/// Log-wealth of the gamma-mixture betting process.
fn log_wealth(s: f64, v: f64, rho: f64) -> OpeResult<f64> {
    if !(s + v + rho > 0.0) || !(rho > 0.0) {
        return Err(OpeError::RootFinding(format!(
            "log-wealth is undefined for s = {s}, v = {v}, rho = {rho}"
        )));
    }
    Ok(s + v + rho * rho.ln() - (v + rho) * (s + v + rho).ln()
        + ln_lower_gamma(v + rho, s + v + rho)?
        - ln_lower_gamma(rho, rho)?)
}

/// Largest `μ` in `[0, min(1, ΣX/t)]` the process has not yet rejected at
/// level `alpha`.
fn lower_bound_log_wealth(t: f64, sum_x: f64, v: f64, alpha: f64) -> OpeResult<f64> {
    let threshold = -alpha.ln();

    let min_mu = 0.0;
    if log_wealth(sum_x, v, RHO)? <= threshold {
        return Ok(min_mu);
    }

    let max_mu = (sum_x / t).min(1.0);
    if log_wealth(sum_x - t * max_mu, v, RHO)? >= threshold {
        return Ok(max_mu);
    }

    brentq(
        |mu| log_wealth(sum_x - t * mu, v, RHO).unwrap_or(f64::NAN) - threshold,
        min_mu,
        max_mu,
    )
}

/// One side of the betting process: its sum-of-squares term against the
/// predictable mean.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Side {
    sum_wr_xhat: CompensatedSum,
    sum_w_xhat: CompensatedSum,
    sum_xhat_sq: CompensatedSum,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceSequenceInterval {
    rewards: RewardRange,
    t: f64,
    sum_wsqrsq: CompensatedSum,
    sum_wsqr: CompensatedSum,
    sum_wsq: CompensatedSum,
    sum_wr: CompensatedSum,
    sum_w: CompensatedSum,
    low: Side,
    high: Side,
}

impl ConfidenceSequenceInterval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rewards(rewards: RewardRange) -> Self {
        Self {
            rewards,
            ..Self::default()
        }
    }

    /// Number of events seen, implied drops included.
    pub fn count(&self) -> f64 {
        self.t
    }

    /// `(ΣX_low, ΣX_high)` under the current reward range.
    fn running_x(&self) -> (f64, f64) {
        let width = self.rewards.width();
        if width == 0.0 {
            return (0.0, 0.0);
        }
        let sum_w = self.sum_w.value();
        let sum_wr = self.sum_wr.value();
        (
            (sum_wr - sum_w * self.rewards.rmin) / width,
            (sum_w * self.rewards.rmax - sum_wr) / width,
        )
    }
}

impl Interval for ConfidenceSequenceInterval {
    fn add_example(&mut self, example: &DecisionExample) -> OpeResult<()> {
        let (w, count) = example.drop_adjusted()?;
        let r = example.reward;
        self.rewards.observe(r)?;

        let dropped = count - 1.0;
        let (sum_x_low, sum_x_high) = self.running_x();
        if dropped > 0.0 {
            // A run of `dropped` zero-weight events contributes
            // Σ_{s<dropped} (a / (b + s))² = a²·(ψ₁(b) - ψ₁(b + dropped)).
            let b = self.t + 1.0;
            let decay = trigamma(b) - trigamma(b + dropped);
            self.low.sum_xhat_sq += (sum_x_low + 0.5).powi(2) * decay;
            self.high.sum_xhat_sq += (sum_x_high + 0.5).powi(2) * decay;
            self.t += dropped;
        }

        let xhat_low = (sum_x_low + 0.5) / (self.t + 1.0);
        let xhat_high = (sum_x_high + 0.5) / (self.t + 1.0);

        self.sum_wsqrsq += (w * r).powi(2);
        self.sum_wsqr += w * w * r;
        self.sum_wsq += w * w;
        self.sum_wr += w * r;
        self.sum_w += w;

        self.low.sum_wr_xhat += w * r * xhat_low;
        self.low.sum_w_xhat += w * xhat_low;
        self.low.sum_xhat_sq += xhat_low * xhat_low;
        self.high.sum_wr_xhat += w * r * xhat_high;
        self.high.sum_w_xhat += w * xhat_high;
        self.high.sum_xhat_sq += xhat_high * xhat_high;

        self.t += 1.0;
        Ok(())
    }

    fn get(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        validate_alpha(alpha)?;
        let width = self.rewards.width();
        if self.t == 0.0 || width == 0.0 {
            return Ok(ConfidenceBounds::undefined());
        }
        let RewardRange { rmin, rmax, .. } = self.rewards;

        let sum_wsqrsq = self.sum_wsqrsq.value();
        let sum_wsqr = self.sum_wsqr.value();
        let sum_wsq = self.sum_wsq.value();
        let (sum_x_low, sum_x_high) = self.running_x();

        let v_low = (sum_wsqrsq - 2.0 * rmin * sum_wsqr + rmin * rmin * sum_wsq) / (width * width)
            - 2.0 * (self.low.sum_wr_xhat.value() - rmin * self.low.sum_w_xhat.value()) / width
            + self.low.sum_xhat_sq.value();
        let lower = lower_bound_log_wealth(self.t, sum_x_low, v_low, alpha / 2.0)?;

        let v_high = (sum_wsqrsq - 2.0 * rmax * sum_wsqr + rmax * rmax * sum_wsq) / (width * width)
            + 2.0 * (self.high.sum_wr_xhat.value() - rmax * self.high.sum_w_xhat.value()) / width
            + self.high.sum_xhat_sq.value();
        let upper = 1.0 - lower_bound_log_wealth(self.t, sum_x_high, v_high, alpha / 2.0)?;

        debug!(t = self.t, lower, upper, "confidence sequence bounds");
        Ok(ConfidenceBounds::new(
            self.rewards.scale_back(lower),
            self.rewards.scale_back(upper),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ope_core::test_helpers::{alternating_examples, constant_examples, feed_interval};
    use ope_core::DEFAULT_ALPHA;

    #[test]
    fn test_no_data() {
        assert_eq!(
            ConfidenceSequenceInterval::new().get(DEFAULT_ALPHA).unwrap(),
            ConfidenceBounds::undefined()
        );
    }

    #[test]
    fn test_degenerate_reward_range_is_undefined() {
        let rewards = RewardRange::fixed(1.0, 1.0).unwrap();
        let mut interval = ConfidenceSequenceInterval::with_rewards(rewards);
        interval.add_example(&DecisionExample::new(0.5, 1.0, 0.5)).unwrap();
        assert_eq!(
            interval.get(DEFAULT_ALPHA).unwrap(),
            ConfidenceBounds::undefined()
        );
    }

    #[test]
    fn test_bounds_are_ordered_and_within_range() {
        let mut interval = ConfidenceSequenceInterval::new();
        feed_interval(&mut interval, &alternating_examples(1000, 0.8, 1.0)).unwrap();
        let bounds = interval.get(DEFAULT_ALPHA).unwrap();
        let (lower, upper) = (bounds.lower.unwrap(), bounds.upper.unwrap());
        assert!(0.0 <= lower && lower <= upper && upper <= 1.0, "{bounds:?}");
        assert!(bounds.contains(0.8), "{bounds:?}");
    }

    #[test]
    fn test_constant_reward_is_covered() {
        let mut interval = ConfidenceSequenceInterval::new();
        feed_interval(&mut interval, &constant_examples(200, 1.0, 0.3, 1.0)).unwrap();
        assert!(interval.get(DEFAULT_ALPHA).unwrap().contains(0.3));
    }

    #[test]
    fn test_drop_count_advances_time() {
        let mut interval = ConfidenceSequenceInterval::new();
        interval
            .add_example(&DecisionExample::new(0.5, 1.0, 0.5).with_drop_count(4))
            .unwrap();
        assert_eq!(interval.count(), 5.0);
    }

    #[test]
    fn test_log_wealth_at_origin_is_zero() {
        // s = v = 0 leaves nothing to bet on.
        assert!(log_wealth(0.0, 0.0, RHO).unwrap().abs() < 1e-12);
    }
}
