use ope_core::{importance_weight, DecisionExample, OpeError, OpeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One CCB episode: parallel per-slot lists in decision order, plus the drop
/// fields shared by every slot of the episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_ids: Option<Vec<String>>,
    pub p_logs: Vec<f64>,
    #[serde(alias = "rs")]
    pub rewards: Vec<f64>,
    pub p_preds: Vec<f64>,
    #[serde(default)]
    pub drop_probability: f64,
    #[serde(default)]
    pub drop_count: Option<u64>,
}

impl Episode {
    pub fn new(p_logs: Vec<f64>, rewards: Vec<f64>, p_preds: Vec<f64>) -> Self {
        Self {
            slot_ids: None,
            p_logs,
            rewards,
            p_preds,
            drop_probability: 0.0,
            drop_count: None,
        }
    }

    pub fn with_slot_ids<S: Into<String>>(mut self, slot_ids: impl IntoIterator<Item = S>) -> Self {
        self.slot_ids = Some(slot_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_drop_probability(mut self, drop_probability: f64) -> Self {
        self.drop_probability = drop_probability;
        self
    }

    pub fn with_drop_count(mut self, drop_count: u64) -> Self {
        self.drop_count = Some(drop_count);
        self
    }

    pub fn len(&self) -> usize {
        self.p_logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p_logs.is_empty()
    }

    /// Non-empty, equal-length lists and, when present, unique slot ids.
    pub fn validate(&self) -> OpeResult<()> {
        let n = self.p_logs.len();
        if n != self.rewards.len() || n != self.p_preds.len() {
            return Err(OpeError::LengthMismatch(format!(
                "p_logs, rewards and p_preds must be the same length, found {}, {} and {}",
                n,
                self.rewards.len(),
                self.p_preds.len()
            )));
        }
        if n == 0 {
            return Err(OpeError::Validation("an episode needs at least one slot".into()));
        }
        if let Some(slot_ids) = &self.slot_ids {
            let unique: HashSet<&str> = slot_ids.iter().map(String::as_str).collect();
            if slot_ids.len() != n || unique.len() != n {
                return Err(OpeError::LengthMismatch(format!(
                    "expected {n} unique slot ids, found {} ({} unique)",
                    slot_ids.len(),
                    unique.len()
                )));
            }
        }
        Ok(())
    }

    /// Slot ids, failing if the episode carries none.
    pub fn require_slot_ids(&self) -> OpeResult<&[String]> {
        self.slot_ids
            .as_deref()
            .ok_or_else(|| OpeError::Validation("episode has no slot_ids".into()))
    }

    /// Per-decision importance weights: slot `i` carries the product of the
    /// weights of slots `0..=i`.
    pub fn cumulative_weights(&self) -> OpeResult<Vec<f64>> {
        let mut w = 1.0;
        let mut weights = Vec::with_capacity(self.len());
        for (&p_log, &p_pred) in self.p_logs.iter().zip(&self.p_preds) {
            w *= importance_weight(p_log, p_pred)?;
            if !w.is_finite() {
                return Err(OpeError::Validation(format!(
                    "cumulative importance weight overflowed at slot {}",
                    weights.len()
                )));
            }
            weights.push(w);
        }
        Ok(weights)
    }

    /// Slot 0 as a single decision, drop fields included.
    pub fn first_decision(&self) -> OpeResult<DecisionExample> {
        self.validate()?;
        Ok(DecisionExample {
            p_log: self.p_logs[0],
            reward: self.rewards[0],
            p_pred: self.p_preds[0],
            drop_probability: self.drop_probability,
            drop_count: self.drop_count,
        })
    }
}
