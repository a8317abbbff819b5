//! Capability contracts for positional CCB estimators.
//!
//! Results are indexed by slot position and have one entry per position seen
//! so far. Every per-slot reward decomposes as
//! `P(slot shown) × E[reward | slot shown]`.

use crate::episode::Episode;
use ope_core::{ConfidenceBounds, OpeResult};

pub trait CcbEstimator {
    fn add_episode(&mut self, episode: &Episode) -> OpeResult<()>;

    /// Probability that each position is shown.
    fn get_impression(&self) -> OpeResult<Vec<f64>>;

    fn get_r_given_impression(&self) -> OpeResult<Vec<Option<f64>>>;

    /// Expected reward per position.
    fn get_r(&self) -> OpeResult<Vec<Option<f64>>> {
        let impression = self.get_impression()?;
        let r_given_impression = self.get_r_given_impression()?;
        Ok(impression
            .into_iter()
            .zip(r_given_impression)
            .map(|(p, r)| r.map(|r| p * r))
            .collect())
    }

    /// Expected reward of the whole episode.
    fn get_r_overall(&self) -> OpeResult<Option<f64>>;
}

pub trait CcbInterval {
    fn add_episode(&mut self, episode: &Episode) -> OpeResult<()>;

    fn get_impression(&self, alpha: f64) -> OpeResult<Vec<ConfidenceBounds>>;

    fn get_r_given_impression(&self, alpha: f64) -> OpeResult<Vec<ConfidenceBounds>>;

    /// Interval product of the two factors at the bound level.
    fn get_r(&self, alpha: f64) -> OpeResult<Vec<ConfidenceBounds>> {
        let impression = self.get_impression(alpha)?;
        let r_given_impression = self.get_r_given_impression(alpha)?;
        Ok(impression
            .iter()
            .zip(&r_given_impression)
            .map(|(p, r)| p.product(r))
            .collect())
    }

    fn get_r_overall(&self, alpha: f64) -> OpeResult<ConfidenceBounds>;
}
