use crate::error::{OpeError, OpeResult};
use serde::{Deserialize, Serialize};

/// One logged decision: the logging policy's probability of the chosen action,
/// the observed reward, and the target policy's probability of the same action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionExample {
    pub p_log: f64,
    pub reward: f64,
    pub p_pred: f64,
    /// Probability that an event like this one was filtered out before
    /// evaluation.
    #[serde(default)]
    pub drop_probability: f64,
    /// Number of dropped events between this one and the previous one.
    /// Authoritative over `drop_probability` when present.
    #[serde(default)]
    pub drop_count: Option<u64>,
}

impl DecisionExample {
    pub fn new(p_log: f64, reward: f64, p_pred: f64) -> Self {
        Self {
            p_log,
            reward,
            p_pred,
            drop_probability: 0.0,
            drop_count: None,
        }
    }

    pub fn with_drop_probability(mut self, drop_probability: f64) -> Self {
        self.drop_probability = drop_probability;
        self
    }

    pub fn with_drop_count(mut self, drop_count: u64) -> Self {
        self.drop_count = Some(drop_count);
        self
    }

    /// `p_pred / p_log`, validated.
    pub fn importance_weight(&self) -> OpeResult<f64> {
        importance_weight(self.p_log, self.p_pred)
    }

    /// Number of implied zero-weight events preceding this example.
    pub fn implied_drop_count(&self) -> f64 {
        implied_drop_count(self.drop_probability, self.drop_count)
    }

    /// Importance weight corrected for the drop probability, together with the
    /// number of events this example stands for (itself plus dropped ones).
    pub fn drop_adjusted(&self) -> OpeResult<(f64, f64)> {
        ensure_finite("reward", self.reward)?;
        let w = self.importance_weight()?;
        drop_adjusted(w, self.drop_probability, self.drop_count)
    }

    pub fn validate(&self) -> OpeResult<()> {
        self.drop_adjusted().map(|_| ())
    }
}

fn implied_drop_count(drop_probability: f64, drop_count: Option<u64>) -> f64 {
    match drop_count {
        Some(count) => count as f64,
        None => drop_probability / (1.0 - drop_probability),
    }
}

/// Scale an already computed weight `w` by `1 / (1 - drop_probability)` and
/// return it with the number of events it stands for.
pub fn drop_adjusted(
    w: f64,
    drop_probability: f64,
    drop_count: Option<u64>,
) -> OpeResult<(f64, f64)> {
    if !w.is_finite() || w < 0.0 {
        return Err(OpeError::Validation(format!(
            "negative or non-finite importance weight {w}"
        )));
    }
    if !(0.0..1.0).contains(&drop_probability) {
        return Err(OpeError::Validation(format!(
            "drop_probability must be in [0, 1), got {drop_probability}"
        )));
    }
    Ok((
        w / (1.0 - drop_probability),
        1.0 + implied_drop_count(drop_probability, drop_count),
    ))
}

/// Validate a `(p_log, p_pred)` pair and return the importance weight.
pub fn importance_weight(p_log: f64, p_pred: f64) -> OpeResult<f64> {
    if !(p_log > 0.0 && p_log <= 1.0) {
        return Err(OpeError::Validation(format!(
            "p_log must be a probability in (0, 1], got {p_log}"
        )));
    }
    if !(0.0..=1.0).contains(&p_pred) {
        return Err(OpeError::Validation(format!(
            "p_pred must be a probability in [0, 1], got {p_pred}"
        )));
    }
    Ok(p_pred / p_log)
}

/// Check a per-record multiplicity: finite and non-negative.
pub fn ensure_count(count: f64) -> OpeResult<()> {
    ensure_finite("count", count)?;
    if count < 0.0 {
        return Err(OpeError::Validation(format!(
            "count must be non-negative, got {count}"
        )));
    }
    Ok(())
}

pub fn ensure_finite(name: &str, value: f64) -> OpeResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(OpeError::Validation(format!(
            "{name} must be finite, got {value}"
        )))
    }
}

// ─── Weight bounds ──────────────────────────────────────────────────────

/// Smallest and largest importance weight an accumulator may see.
///
/// Seeded with the theoretical bounds when the caller knows them and widened
/// as examples arrive. `wmax == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub wmin: f64,
    pub wmax: Option<f64>,
}

impl WeightBounds {
    pub fn new(wmin: f64, wmax: Option<f64>) -> OpeResult<Self> {
        if !(wmin < 1.0) || wmin < 0.0 {
            return Err(OpeError::Config(format!(
                "wmin must be in [0, 1), got {wmin}"
            )));
        }
        if let Some(wmax) = wmax {
            if !(wmax > 1.0) || !wmax.is_finite() {
                return Err(OpeError::Config(format!(
                    "wmax must be finite and greater than 1, got {wmax}"
                )));
            }
        }
        Ok(Self { wmin, wmax })
    }

    pub fn observe(&mut self, w: f64) {
        self.wmin = self.wmin.min(w);
        self.wmax = self.wmax.map(|wmax| wmax.max(w));
    }

    /// Pairwise extrema.
    pub fn merge(&self, other: &WeightBounds) -> WeightBounds {
        WeightBounds {
            wmin: self.wmin.min(other.wmin),
            wmax: match (self.wmax, other.wmax) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }

    /// Bounds on the product of `exponent` independent weights.
    pub fn powi(&self, exponent: i32) -> WeightBounds {
        WeightBounds {
            wmin: self.wmin.powi(exponent),
            wmax: self.wmax.map(|wmax| wmax.powi(exponent)),
        }
    }
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            wmin: 0.0,
            wmax: None,
        }
    }
}

// ─── Reward bounds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsMode {
    /// Rewards outside the declared range are rejected.
    Fixed,
    /// The range widens to the observed extremes.
    Empirical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardRange {
    pub rmin: f64,
    pub rmax: f64,
    pub mode: BoundsMode,
}

impl RewardRange {
    pub fn fixed(rmin: f64, rmax: f64) -> OpeResult<Self> {
        Self::new(rmin, rmax, BoundsMode::Fixed)
    }

    pub fn empirical(rmin: f64, rmax: f64) -> OpeResult<Self> {
        Self::new(rmin, rmax, BoundsMode::Empirical)
    }

    pub fn new(rmin: f64, rmax: f64, mode: BoundsMode) -> OpeResult<Self> {
        if !rmin.is_finite() || !rmax.is_finite() || rmin > rmax {
            return Err(OpeError::Config(format!(
                "invalid reward range [{rmin}, {rmax}]"
            )));
        }
        Ok(Self { rmin, rmax, mode })
    }

    pub fn is_empirical(&self) -> bool {
        self.mode == BoundsMode::Empirical
    }

    /// Widen (empirical) or check (fixed) against a newly observed reward.
    pub fn observe(&mut self, reward: f64) -> OpeResult<()> {
        ensure_finite("reward", reward)?;
        match self.mode {
            BoundsMode::Empirical => {
                self.rmin = self.rmin.min(reward);
                self.rmax = self.rmax.max(reward);
                Ok(())
            }
            BoundsMode::Fixed if reward < self.rmin || reward > self.rmax => {
                Err(OpeError::RewardOutOfBounds {
                    reward,
                    rmin: self.rmin,
                    rmax: self.rmax,
                })
            }
            BoundsMode::Fixed => Ok(()),
        }
    }

    /// Reject merging accumulators with different bound policies.
    pub fn merge(&self, other: &RewardRange) -> OpeResult<RewardRange> {
        if self.mode != other.mode {
            return Err(OpeError::Config(
                "cannot merge accumulators with different reward bound modes".into(),
            ));
        }
        if self.mode == BoundsMode::Fixed && (self.rmin != other.rmin || self.rmax != other.rmax) {
            return Err(OpeError::Config(format!(
                "cannot merge accumulators with different reward bounds [{}, {}] and [{}, {}]",
                self.rmin, self.rmax, other.rmin, other.rmax
            )));
        }
        Ok(RewardRange {
            rmin: self.rmin.min(other.rmin),
            rmax: self.rmax.max(other.rmax),
            mode: self.mode,
        })
    }

    pub fn width(&self) -> f64 {
        self.rmax - self.rmin
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.rmin).min(self.rmax)
    }

    /// Map a unit-interval value back onto the reward range.
    pub fn scale_back(&self, unit: f64) -> f64 {
        self.rmin + unit * self.width()
    }
}

impl Default for RewardRange {
    fn default() -> Self {
        Self {
            rmin: 0.0,
            rmax: 1.0,
            mode: BoundsMode::Fixed,
        }
    }
}

// ─── Interval result ────────────────────────────────────────────────────

/// Lower and upper confidence bound. Both are `None` when no data has been
/// observed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceBounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl ConfidenceBounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub fn undefined() -> Self {
        Self::default()
    }

    pub fn is_defined(&self) -> bool {
        self.lower.is_some() && self.upper.is_some()
    }

    pub fn width(&self) -> Option<f64> {
        Some(self.upper? - self.lower?)
    }

    pub fn contains(&self, value: f64) -> bool {
        matches!((self.lower, self.upper), (Some(l), Some(u)) if l <= value && value <= u)
    }

    /// Interval product at the bound level: the extrema of the four endpoint
    /// products. Undefined if either side is undefined.
    pub fn product(&self, other: &ConfidenceBounds) -> ConfidenceBounds {
        match (self.lower, self.upper, other.lower, other.upper) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let products = [a * c, a * d, b * c, b * d];
                let lower = products.iter().copied().fold(f64::INFINITY, f64::min);
                let upper = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                ConfidenceBounds::new(lower, upper)
            }
            _ => ConfidenceBounds::undefined(),
        }
    }
}

impl From<(f64, f64)> for ConfidenceBounds {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self::new(lower, upper)
    }
}
