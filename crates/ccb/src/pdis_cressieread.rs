//! Per-decision importance sampling with CR(-2) accumulators.
//!
//! Position `i` is evaluated with the cumulative weight of positions `0..=i`
//! and bounded by the `i + 1`-th power of the per-step weight bounds.
//! Episodes shorter than the longest seen simply do not reach the later
//! positions, so each impression is the position's count over position 0's.

use crate::base::{CcbEstimator, CcbInterval};
use crate::episode::Episode;
use ope_bandits::{CressiereadEstimator, CressiereadInterval};
use ope_core::math::clopper_pearson;
use ope_core::{
    ensure_finite, merge_all, validate_alpha, ConfidenceBounds, Estimator, Interval, Merge,
    OpeResult, RewardRange, WeightBounds,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Position-wise merge; positions only one side has reached are copied.
fn merge_positions<T: Merge + Clone>(a: &[T], b: &[T]) -> OpeResult<Vec<T>> {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    long.iter()
        .enumerate()
        .map(|(i, position)| match short.get(i) {
            Some(other) => position.merge(other),
            None => Ok(position.clone()),
        })
        .collect()
}

fn position_bounds(bounds: &WeightBounds, position: usize) -> WeightBounds {
    bounds.powi(position as i32 + 1)
}

// ─── Point estimator ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdisCressiereadEstimator {
    bounds: WeightBounds,
    positions: Vec<CressiereadEstimator>,
}

impl PdisCressiereadEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-step weight bounds; position `i` uses their `i + 1`-th power.
    pub fn with_bounds(bounds: WeightBounds) -> Self {
        Self {
            bounds,
            positions: Vec::new(),
        }
    }
}

impl CcbEstimator for PdisCressiereadEstimator {
    fn add_episode(&mut self, episode: &Episode) -> OpeResult<()> {
        episode.validate()?;
        let weights = episode.cumulative_weights()?;
        for &r in &episode.rewards {
            ensure_finite("reward", r)?;
        }

        for (i, (&w, &r)) in weights.iter().zip(&episode.rewards).enumerate() {
            if self.positions.len() <= i {
                self.positions
                    .push(CressiereadEstimator::with_bounds(position_bounds(&self.bounds, i)));
            }
            self.positions[i].add_weighted(w, r)?;
        }
        Ok(())
    }

    fn get_impression(&self) -> OpeResult<Vec<f64>> {
        let Some(first) = self.positions.first() else {
            return Ok(Vec::new());
        };
        let total = first.count();
        Ok(self.positions.iter().map(|p| p.count() / total).collect())
    }

    fn get_r_given_impression(&self) -> OpeResult<Vec<Option<f64>>> {
        self.positions.iter().map(|p| p.get()).collect()
    }

    fn get_r_overall(&self) -> OpeResult<Option<f64>> {
        match merge_all(&self.positions)? {
            Some(merged) => merged.get(),
            None => Ok(None),
        }
    }
}

impl Merge for PdisCressiereadEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        let positions = merge_positions(&self.positions, &other.positions)?;
        debug!(positions = positions.len(), "merged pdis estimators");
        Ok(Self {
            bounds: self.bounds.merge(&other.bounds),
            positions,
        })
    }
}

// ─── Interval ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdisCressiereadInterval {
    bounds: WeightBounds,
    rewards: RewardRange,
    positions: Vec<CressiereadInterval>,
}

impl PdisCressiereadInterval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(bounds: WeightBounds, rewards: RewardRange) -> Self {
        Self {
            bounds,
            rewards,
            positions: Vec::new(),
        }
    }
}

impl CcbInterval for PdisCressiereadInterval {
    fn add_episode(&mut self, episode: &Episode) -> OpeResult<()> {
        episode.validate()?;
        let weights = episode.cumulative_weights()?;
        // Check every reward before touching any position.
        let mut rewards = self.rewards;
        for &r in &episode.rewards {
            rewards.observe(r)?;
        }

        for (i, (&w, &r)) in weights.iter().zip(&episode.rewards).enumerate() {
            if self.positions.len() <= i {
                self.positions.push(CressiereadInterval::with_config(
                    position_bounds(&self.bounds, i),
                    self.rewards,
                ));
            }
            self.positions[i].add_weighted(w, r, episode.drop_probability, episode.drop_count)?;
        }
        Ok(())
    }

    /// Exact Clopper–Pearson interval on each position's share of episodes.
    fn get_impression(&self, alpha: f64) -> OpeResult<Vec<ConfidenceBounds>> {
        validate_alpha(alpha)?;
        let Some(first) = self.positions.first() else {
            return Ok(Vec::new());
        };
        let total = first.count();
        self.positions
            .iter()
            .map(|p| clopper_pearson(p.count(), total, alpha).map(ConfidenceBounds::from))
            .collect()
    }

    fn get_r_given_impression(&self, alpha: f64) -> OpeResult<Vec<ConfidenceBounds>> {
        self.positions.iter().map(|p| p.get(alpha)).collect()
    }

    fn get_r_overall(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        match merge_all(&self.positions)? {
            Some(merged) => merged.get(alpha),
            None => Ok(ConfidenceBounds::undefined()),
        }
    }
}

impl Merge for PdisCressiereadInterval {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        let rewards = self.rewards.merge(&other.rewards)?;
        let positions = merge_positions(&self.positions, &other.positions)?;
        debug!(positions = positions.len(), "merged pdis intervals");
        Ok(Self {
            bounds: self.bounds.merge(&other.bounds),
            rewards,
            positions,
        })
    }
}
