//! Projection of a CCB log onto its first slot.
//!
//! Wraps any single-decision estimator or interval and feeds it slot 0 of
//! every episode. Later slots are only checked for length agreement and are
//! reported as never shown.

use crate::base::{CcbEstimator, CcbInterval};
use crate::episode::Episode;
use ope_core::{ConfidenceBounds, Estimator, Interval, Merge, OpeResult};
use serde::{Deserialize, Serialize};

fn first_slot_impression(slots_count: usize) -> Vec<f64> {
    let mut impression = vec![0.0; slots_count];
    if let Some(first) = impression.first_mut() {
        *first = 1.0;
    }
    impression
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirstSlotEstimator<E> {
    inner: E,
    slots_count: usize,
}

impl<E: Estimator> FirstSlotEstimator<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            slots_count: 0,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Estimator> CcbEstimator for FirstSlotEstimator<E> {
    fn add_episode(&mut self, episode: &Episode) -> OpeResult<()> {
        let first = episode.first_decision()?;
        self.inner.add(&first)?;
        self.slots_count = self.slots_count.max(episode.len());
        Ok(())
    }

    fn get_impression(&self) -> OpeResult<Vec<f64>> {
        Ok(first_slot_impression(self.slots_count))
    }

    fn get_r_given_impression(&self) -> OpeResult<Vec<Option<f64>>> {
        if self.slots_count == 0 {
            return Ok(Vec::new());
        }
        let mut result = vec![Some(0.0); self.slots_count];
        result[0] = self.inner.get()?;
        Ok(result)
    }

    fn get_r_overall(&self) -> OpeResult<Option<f64>> {
        Ok(self.get_r()?.first().copied().flatten())
    }
}

impl<E: Merge> Merge for FirstSlotEstimator<E> {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            inner: self.inner.merge(&other.inner)?,
            slots_count: self.slots_count.max(other.slots_count),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirstSlotInterval<I> {
    inner: I,
    slots_count: usize,
}

impl<I: Interval> FirstSlotInterval<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            slots_count: 0,
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<I: Interval> CcbInterval for FirstSlotInterval<I> {
    fn add_episode(&mut self, episode: &Episode) -> OpeResult<()> {
        let first = episode.first_decision()?;
        self.inner.add_example(&first)?;
        self.slots_count = self.slots_count.max(episode.len());
        Ok(())
    }

    fn get_impression(&self, _alpha: f64) -> OpeResult<Vec<ConfidenceBounds>> {
        Ok(first_slot_impression(self.slots_count)
            .into_iter()
            .map(|p| ConfidenceBounds::new(p, p))
            .collect())
    }

    fn get_r_given_impression(&self, alpha: f64) -> OpeResult<Vec<ConfidenceBounds>> {
        if self.slots_count == 0 {
            return Ok(Vec::new());
        }
        let mut result = vec![ConfidenceBounds::new(0.0, 0.0); self.slots_count];
        result[0] = self.inner.get(alpha)?;
        Ok(result)
    }

    fn get_r_overall(&self, alpha: f64) -> OpeResult<ConfidenceBounds> {
        Ok(self
            .get_r(alpha)?
            .first()
            .copied()
            .unwrap_or_else(ConfidenceBounds::undefined))
    }
}

impl<I: Merge> Merge for FirstSlotInterval<I> {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            inner: self.inner.merge(&other.inner)?,
            slots_count: self.slots_count.max(other.slots_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ope_bandits::{GaussianInterval, IpsEstimator};
    use ope_core::DEFAULT_ALPHA;

    #[test]
    fn test_no_data() {
        let estimator = FirstSlotEstimator::new(IpsEstimator::new());
        assert!(estimator.get_impression().unwrap().is_empty());
        assert!(estimator.get_r().unwrap().is_empty());
        assert_eq!(estimator.get_r_overall().unwrap(), None);

        let interval = FirstSlotInterval::new(GaussianInterval::new());
        assert!(interval.get_r(DEFAULT_ALPHA).unwrap().is_empty());
        assert_eq!(
            interval.get_r_overall(DEFAULT_ALPHA).unwrap(),
            ConfidenceBounds::undefined()
        );
    }

    #[test]
    fn test_reports_first_slot_only() {
        let mut estimator = FirstSlotEstimator::new(IpsEstimator::new());
        estimator
            .add_episode(&Episode::new(vec![0.5, 0.5, 0.5], vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]))
            .unwrap();
        estimator
            .add_episode(&Episode::new(vec![0.5], vec![0.0], vec![1.0]))
            .unwrap();

        assert_eq!(estimator.get_impression().unwrap(), vec![1.0, 0.0, 0.0]);
        assert_eq!(
            estimator.get_r().unwrap(),
            vec![Some(1.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(estimator.get_r_overall().unwrap(), Some(1.0));
    }

    #[test]
    fn test_rejects_mismatched_lengths() {
        let mut estimator = FirstSlotEstimator::new(IpsEstimator::new());
        let err = estimator
            .add_episode(&Episode::new(vec![0.5, 0.5], vec![1.0], vec![0.5, 0.5]))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(estimator.get_impression().unwrap().is_empty());
    }
}
