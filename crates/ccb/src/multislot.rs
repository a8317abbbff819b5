//! Multislot evaluation keyed by explicit slot labels.
//!
//! Each label owns an independent CR(-2) accumulator fed with the cumulative
//! weight up to that label's position in the episode, so the label set and
//! its order may change from one episode to the next without disturbing the
//! other labels. Per-label rewards are reported as
//! `P(label shown) × E[reward | label shown]`.

use crate::episode::Episode;
use ope_bandits::{CressiereadEstimator, CressiereadInterval};
use ope_core::math::clopper_pearson;
use ope_core::{
    drop_adjusted, ensure_finite, merge_all, validate_alpha, CompensatedSum, ConfidenceBounds,
    Estimator, Interval, Merge, OpeResult, RewardRange, WeightBounds,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Union of two label maps, merging labels present on both sides.
fn merge_slots<T: Merge + Clone>(
    a: &BTreeMap<String, T>,
    b: &BTreeMap<String, T>,
) -> OpeResult<BTreeMap<String, T>> {
    let mut merged = a.clone();
    for (slot_id, other) in b {
        let slot = match a.get(slot_id) {
            Some(slot) => slot.merge(other)?,
            None => other.clone(),
        };
        merged.insert(slot_id.clone(), slot);
    }
    Ok(merged)
}

// ─── Point estimator ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultislotEstimator {
    n: CompensatedSum,
    slots: BTreeMap<String, CressiereadEstimator>,
}

impl MultislotEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn episodes(&self) -> f64 {
        self.n.value()
    }

    pub fn add_episode(&mut self, episode: &Episode) -> OpeResult<()> {
        episode.validate()?;
        let slot_ids = episode.require_slot_ids()?;
        let weights = episode.cumulative_weights()?;
        for &r in &episode.rewards {
            ensure_finite("reward", r)?;
        }

        self.n += 1.0;
        for ((slot_id, &w), &r) in slot_ids.iter().zip(&weights).zip(&episode.rewards) {
            self.slots
                .entry(slot_id.clone())
                .or_default()
                .add_weighted(w, r)?;
        }
        Ok(())
    }

    /// Share of episodes in which each label was shown.
    pub fn get_impression(&self) -> BTreeMap<String, f64> {
        let n = self.n.value();
        if n == 0.0 {
            return BTreeMap::new();
        }
        self.slots
            .iter()
            .map(|(slot_id, slot)| (slot_id.clone(), slot.count() / n))
            .collect()
    }

    pub fn get_r_given_impression(&self) -> OpeResult<BTreeMap<String, Option<f64>>> {
        self.slots
            .iter()
            .map(|(slot_id, slot)| Ok((slot_id.clone(), slot.get()?)))
            .collect()
    }

    pub fn get_r(&self) -> OpeResult<BTreeMap<String, Option<f64>>> {
        let impression = self.get_impression();
        let mut r = self.get_r_given_impression()?;
        for (slot_id, value) in r.iter_mut() {
            let shown = impression.get(slot_id).copied().unwrap_or(0.0);
            *value = value.map(|v| shown * v);
        }
        Ok(r)
    }

    /// Estimate over every label's statistics pooled together.
    pub fn get_r_overall(&self) -> OpeResult<Option<f64>> {
        match merge_all(self.slots.values())? {
            Some(merged) => merged.get(),
            None => Ok(None),
        }
    }
}

impl Merge for MultislotEstimator {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        let slots = merge_slots(&self.slots, &other.slots)?;
        debug!(slots = slots.len(), "merged multislot estimators");
        Ok(Self {
            n: self.n.merge(&other.n),
            slots,
        })
    }
}

// ─── Interval ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultislotInterval {
    rewards: RewardRange,
    n: CompensatedSum,
    slots: BTreeMap<String, CressiereadInterval>,
}

impl MultislotInterval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rewards(rewards: RewardRange) -> Self {
        Self {
            rewards,
            ..Self::default()
        }
    }

    /// Episodes seen, implied drops included.
    pub fn episodes(&self) -> f64 {
        self.n.value()
    }

    pub fn add_episode(&mut self, episode: &Episode) -> OpeResult<()> {
        episode.validate()?;
        let slot_ids = episode.require_slot_ids()?;
        let weights = episode.cumulative_weights()?;
        let (_, count) = drop_adjusted(1.0, episode.drop_probability, episode.drop_count)?;
        let mut rewards = self.rewards;
        for &r in &episode.rewards {
            rewards.observe(r)?;
        }

        self.n += count;
        for ((slot_id, &w), &r) in slot_ids.iter().zip(&weights).zip(&episode.rewards) {
            let config = self.rewards;
            self.slots
                .entry(slot_id.clone())
                .or_insert_with(|| CressiereadInterval::with_config(WeightBounds::default(), config))
                .add_weighted(w, r, episode.drop_probability, episode.drop_count)?;
        }
        Ok(())
    }

    /// Exact Clopper–Pearson interval on each label's share of episodes.
    pub fn get_impression(&self, alpha: f64) -> OpeResult<BTreeMap<String, ConfidenceBounds>> {
        validate_alpha(alpha)?;
        let n = self.n.value();
        if n == 0.0 {
            return Ok(BTreeMap::new());
        }
        self.slots
            .iter()
            .map(|(slot_id, slot)| {
                let bounds = clopper_pearson(slot.count(), n, alpha)?;
                Ok((slot_id.clone(), ConfidenceBounds::from(bounds)))
            })
            .collect()
    }

    pub fn get_r_given_impression(
        &self,
        alpha: f64,
    ) -> OpeResult<BTreeMap<String, ConfidenceBounds>> {
        self.slots
            .iter()
            .map(|(slot_id, slot)| Ok((slot_id.clone(), slot.get(alpha)?)))
            .collect()
    }

    /// Interval product of the two factors at the bound level.
    pub fn get_r(&self, alpha: f64) -> OpeResult<BTreeMap<String, ConfidenceBounds>> {
        let impression = self.get_impression(alpha)?;
        let mut r = self.get_r_given_impression(alpha)?;
        for (slot_id, bounds) in r.iter_mut() {
            *bounds = impression
                .get(slot_id)
                .map_or_else(ConfidenceBounds::undefined, |shown| shown.product(bounds));
        }
        Ok(r)
    }

    pub fn get_r_overall(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        match merge_all(self.slots.values())? {
            Some(merged) => merged.get(alpha),
            None => Ok(ConfidenceBounds::undefined()),
        }
    }
}

impl Merge for MultislotInterval {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        let rewards = self.rewards.merge(&other.rewards)?;
        let slots = merge_slots(&self.slots, &other.slots)?;
        debug!(slots = slots.len(), "merged multislot intervals");
        Ok(Self {
            rewards,
            n: self.n.merge(&other.n),
            slots,
        })
    }
}
