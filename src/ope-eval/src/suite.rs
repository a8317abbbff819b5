//! Per-mode estimator suites evaluated shard by shard and merged.

use anyhow::Context;
use ope_bandits::{
    ClopperPearsonInterval, ConfidenceSequenceInterval, CressiereadEstimator, CressiereadInterval,
    GaussianInterval, IpsEstimator, MleEstimator, SnipsEstimator,
};
use ope_ccb::{
    CcbEstimator, CcbInterval, Episode, FirstSlotEstimator, FirstSlotInterval, MultislotEstimator,
    MultislotInterval, PdisCressiereadEstimator, PdisCressiereadInterval,
};
use ope_core::{
    merge_all, ConfidenceBounds, DecisionExample, Estimator, EvaluatorConfig, Interval, Merge,
    OpeResult, SlateEstimator, SlateInterval,
};
use ope_slates::{PseudoInverseEstimator, SlateGaussianInterval};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A bundle of mergeable accumulators fed from one kind of input record.
pub trait Suite: Merge + Clone + Send {
    type Record: DeserializeOwned + Sync;
    type Report: Serialize;

    fn new(config: &EvaluatorConfig) -> OpeResult<Self>;

    fn add(&mut self, record: &Self::Record) -> OpeResult<()>;

    fn report(&self, config: &EvaluatorConfig) -> OpeResult<Self::Report>;
}

/// Accumulate `records` in `config.shards` parallel shards, merge the shards
/// and report on the combined state.
pub fn evaluate<S: Suite>(records: &[S::Record], config: &EvaluatorConfig) -> anyhow::Result<S::Report> {
    let shard_size = records.len().div_ceil(config.shards.max(1)).max(1);
    let parts = records
        .par_chunks(shard_size)
        .enumerate()
        .map(|(shard, chunk)| {
            let mut suite = S::new(config)?;
            for (i, record) in chunk.iter().enumerate() {
                suite
                    .add(record)
                    .with_context(|| format!("record {}", shard * shard_size + i + 1))?;
            }
            Ok(suite)
        })
        .collect::<anyhow::Result<Vec<S>>>()?;
    debug!(shards = parts.len(), shard_size, "accumulated shards");

    let merged = match merge_all(&parts).context("failed to merge shards")? {
        Some(merged) => merged,
        None => S::new(config)?,
    };
    Ok(merged.report(config)?)
}

/// Confidence sequences are not mergeable, so they get one sequential pass.
pub fn confidence_sequence(
    records: &[DecisionExample],
    config: &EvaluatorConfig,
) -> anyhow::Result<ConfidenceBounds> {
    let mut interval = ConfidenceSequenceInterval::with_rewards(config.reward_range()?);
    for (i, record) in records.iter().enumerate() {
        interval
            .add_example(record)
            .with_context(|| format!("record {}", i + 1))?;
    }
    Ok(interval.get(config.alpha)?)
}

// ─── Bandit ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BanditSuite {
    ips: IpsEstimator,
    snips: SnipsEstimator,
    cressieread: CressiereadEstimator,
    mle: MleEstimator,
    gaussian: GaussianInterval,
    clopper_pearson: ClopperPearsonInterval,
    cressieread_interval: CressiereadInterval,
}

#[derive(Debug, Serialize)]
pub struct BanditReport {
    pub ips: Option<f64>,
    pub snips: Option<f64>,
    pub cressieread: Option<f64>,
    pub mle: Option<f64>,
    pub gaussian: ConfidenceBounds,
    pub clopper_pearson: ConfidenceBounds,
    pub cressieread_interval: ConfidenceBounds,
    pub confidence_sequence: ConfidenceBounds,
}

impl Suite for BanditSuite {
    type Record = DecisionExample;
    type Report = BanditReport;

    fn new(config: &EvaluatorConfig) -> OpeResult<Self> {
        let bounds = config.weight_bounds()?;
        let rewards = config.reward_range()?;
        Ok(Self {
            ips: IpsEstimator::new(),
            snips: SnipsEstimator::new(),
            cressieread: CressiereadEstimator::with_bounds(bounds),
            mle: MleEstimator::with_bounds(bounds),
            gaussian: GaussianInterval::new(),
            clopper_pearson: ClopperPearsonInterval::with_rewards(rewards),
            cressieread_interval: CressiereadInterval::with_config(bounds, rewards),
        })
    }

    fn add(&mut self, record: &DecisionExample) -> OpeResult<()> {
        // Intervals check rewards against the declared range; run them first
        // so a rejected record leaves the point estimators untouched too.
        self.cressieread_interval.add_example(record)?;
        self.clopper_pearson.add_example(record)?;
        self.gaussian.add_example(record)?;
        self.ips.add(record)?;
        self.snips.add(record)?;
        self.cressieread.add(record)?;
        self.mle.add(record)
    }

    fn report(&self, config: &EvaluatorConfig) -> OpeResult<BanditReport> {
        Ok(BanditReport {
            ips: self.ips.get()?,
            snips: self.snips.get()?,
            cressieread: self.cressieread.get()?,
            mle: self.mle.get()?,
            gaussian: self.gaussian.get(config.alpha)?,
            clopper_pearson: self.clopper_pearson.get(config.alpha)?,
            cressieread_interval: self
                .cressieread_interval
                .get_with_tolerance(config.alpha, config.atol)?,
            confidence_sequence: ConfidenceBounds::undefined(),
        })
    }
}

impl Merge for BanditSuite {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            ips: self.ips.merge(&other.ips)?,
            snips: self.snips.merge(&other.snips)?,
            cressieread: self.cressieread.merge(&other.cressieread)?,
            mle: self.mle.merge(&other.mle)?,
            gaussian: self.gaussian.merge(&other.gaussian)?,
            clopper_pearson: self.clopper_pearson.merge(&other.clopper_pearson)?,
            cressieread_interval: self.cressieread_interval.merge(&other.cressieread_interval)?,
        })
    }
}

// ─── Slots ──────────────────────────────────────────────────────────────

/// Decomposed per-slot results; `I` holds impressions, `R` rewards, `O` the
/// whole-episode value.
#[derive(Debug, Serialize)]
pub struct SlotReport<I, R, O> {
    pub impression: I,
    pub r_given_impression: R,
    pub r: R,
    pub r_overall: O,
}

fn estimator_slots<E: CcbEstimator>(
    estimator: &E,
) -> OpeResult<SlotReport<Vec<f64>, Vec<Option<f64>>, Option<f64>>> {
    Ok(SlotReport {
        impression: estimator.get_impression()?,
        r_given_impression: estimator.get_r_given_impression()?,
        r: estimator.get_r()?,
        r_overall: estimator.get_r_overall()?,
    })
}

fn interval_slots<I: CcbInterval>(
    interval: &I,
    alpha: f64,
) -> OpeResult<SlotReport<Vec<ConfidenceBounds>, Vec<ConfidenceBounds>, ConfidenceBounds>> {
    Ok(SlotReport {
        impression: interval.get_impression(alpha)?,
        r_given_impression: interval.get_r_given_impression(alpha)?,
        r: interval.get_r(alpha)?,
        r_overall: interval.get_r_overall(alpha)?,
    })
}

#[derive(Debug, Clone)]
pub struct CcbSuite {
    pdis: PdisCressiereadEstimator,
    pdis_interval: PdisCressiereadInterval,
    first_slot: FirstSlotEstimator<CressiereadEstimator>,
    first_slot_interval: FirstSlotInterval<CressiereadInterval>,
}

#[derive(Debug, Serialize)]
pub struct CcbReport {
    pub pdis: SlotReport<Vec<f64>, Vec<Option<f64>>, Option<f64>>,
    pub pdis_interval: SlotReport<Vec<ConfidenceBounds>, Vec<ConfidenceBounds>, ConfidenceBounds>,
    pub first_slot: SlotReport<Vec<f64>, Vec<Option<f64>>, Option<f64>>,
    pub first_slot_interval:
        SlotReport<Vec<ConfidenceBounds>, Vec<ConfidenceBounds>, ConfidenceBounds>,
}

impl Suite for CcbSuite {
    type Record = Episode;
    type Report = CcbReport;

    fn new(config: &EvaluatorConfig) -> OpeResult<Self> {
        let bounds = config.weight_bounds()?;
        let rewards = config.reward_range()?;
        Ok(Self {
            pdis: PdisCressiereadEstimator::with_bounds(bounds),
            pdis_interval: PdisCressiereadInterval::with_config(bounds, rewards),
            first_slot: FirstSlotEstimator::new(CressiereadEstimator::with_bounds(bounds)),
            first_slot_interval: FirstSlotInterval::new(CressiereadInterval::with_config(
                bounds, rewards,
            )),
        })
    }

    fn add(&mut self, episode: &Episode) -> OpeResult<()> {
        self.pdis_interval.add_episode(episode)?;
        self.first_slot_interval.add_episode(episode)?;
        self.pdis.add_episode(episode)?;
        self.first_slot.add_episode(episode)
    }

    fn report(&self, config: &EvaluatorConfig) -> OpeResult<CcbReport> {
        Ok(CcbReport {
            pdis: estimator_slots(&self.pdis)?,
            pdis_interval: interval_slots(&self.pdis_interval, config.alpha)?,
            first_slot: estimator_slots(&self.first_slot)?,
            first_slot_interval: interval_slots(&self.first_slot_interval, config.alpha)?,
        })
    }
}

impl Merge for CcbSuite {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            pdis: self.pdis.merge(&other.pdis)?,
            pdis_interval: self.pdis_interval.merge(&other.pdis_interval)?,
            first_slot: self.first_slot.merge(&other.first_slot)?,
            first_slot_interval: self.first_slot_interval.merge(&other.first_slot_interval)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MultislotSuite {
    estimator: MultislotEstimator,
    interval: MultislotInterval,
}

#[derive(Debug, Serialize)]
pub struct MultislotReport {
    pub estimator: SlotReport<BTreeMap<String, f64>, BTreeMap<String, Option<f64>>, Option<f64>>,
    pub interval: SlotReport<
        BTreeMap<String, ConfidenceBounds>,
        BTreeMap<String, ConfidenceBounds>,
        ConfidenceBounds,
    >,
}

impl Suite for MultislotSuite {
    type Record = Episode;
    type Report = MultislotReport;

    fn new(config: &EvaluatorConfig) -> OpeResult<Self> {
        Ok(Self {
            estimator: MultislotEstimator::new(),
            interval: MultislotInterval::with_rewards(config.reward_range()?),
        })
    }

    fn add(&mut self, episode: &Episode) -> OpeResult<()> {
        self.interval.add_episode(episode)?;
        self.estimator.add_episode(episode)
    }

    fn report(&self, config: &EvaluatorConfig) -> OpeResult<MultislotReport> {
        let alpha = config.alpha;
        Ok(MultislotReport {
            estimator: SlotReport {
                impression: self.estimator.get_impression(),
                r_given_impression: self.estimator.get_r_given_impression()?,
                r: self.estimator.get_r()?,
                r_overall: self.estimator.get_r_overall()?,
            },
            interval: SlotReport {
                impression: self.interval.get_impression(alpha)?,
                r_given_impression: self.interval.get_r_given_impression(alpha)?,
                r: self.interval.get_r(alpha)?,
                r_overall: self.interval.get_r_overall(alpha)?,
            },
        })
    }
}

impl Merge for MultislotSuite {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            estimator: self.estimator.merge(&other.estimator)?,
            interval: self.interval.merge(&other.interval)?,
        })
    }
}

// ─── Slate ──────────────────────────────────────────────────────────────

/// One slate decision: per-slot logging and target probabilities with a
/// single reward.
#[derive(Debug, Clone, Deserialize)]
pub struct SlateRecord {
    pub p_logs: Vec<f64>,
    pub reward: f64,
    pub p_preds: Vec<f64>,
    #[serde(default = "default_count")]
    pub count: f64,
}

fn default_count() -> f64 { 1.0 }

#[derive(Debug, Clone, Default)]
pub struct SlateSuite {
    estimator: PseudoInverseEstimator,
    interval: SlateGaussianInterval,
}

#[derive(Debug, Serialize)]
pub struct SlateReport {
    pub pseudo_inverse: Option<f64>,
    pub gaussian: ConfidenceBounds,
}

impl Suite for SlateSuite {
    type Record = SlateRecord;
    type Report = SlateReport;

    fn new(_config: &EvaluatorConfig) -> OpeResult<Self> {
        Ok(Self::default())
    }

    fn add(&mut self, record: &SlateRecord) -> OpeResult<()> {
        self.interval
            .add_example(&record.p_logs, record.reward, &record.p_preds, record.count)?;
        self.estimator
            .add_example(&record.p_logs, record.reward, &record.p_preds, record.count)
    }

    fn report(&self, config: &EvaluatorConfig) -> OpeResult<SlateReport> {
        Ok(SlateReport {
            pseudo_inverse: self.estimator.get()?,
            gaussian: self.interval.get(config.alpha)?,
        })
    }
}

impl Merge for SlateSuite {
    fn merge(&self, other: &Self) -> OpeResult<Self> {
        Ok(Self {
            estimator: self.estimator.merge(&other.estimator)?,
            interval: self.interval.merge(&other.interval)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ope_core::test_helpers::{assert_is_close, random_examples};

    fn config_with_shards(shards: usize) -> EvaluatorConfig {
        EvaluatorConfig {
            shards,
            ..EvaluatorConfig::default()
        }
    }

    fn assert_bounds_close(a: ConfidenceBounds, b: ConfidenceBounds) {
        assert_is_close(a.lower.unwrap(), b.lower.unwrap());
        assert_is_close(a.upper.unwrap(), b.upper.unwrap());
    }

    #[test]
    fn test_empty_input_reports_no_data() {
        let report = evaluate::<BanditSuite>(&[], &config_with_shards(4)).unwrap();
        assert_eq!(report.ips, None);
        assert_eq!(report.gaussian, ConfidenceBounds::undefined());

        let report = evaluate::<MultislotSuite>(&[], &config_with_shards(4)).unwrap();
        assert!(report.estimator.r.is_empty());
    }

    #[test]
    fn test_sharding_does_not_change_bandit_results() {
        let examples = random_examples(2_000, 4, 11);
        let single = evaluate::<BanditSuite>(&examples, &config_with_shards(1)).unwrap();
        let sharded = evaluate::<BanditSuite>(&examples, &config_with_shards(7)).unwrap();

        assert_is_close(single.ips.unwrap(), sharded.ips.unwrap());
        assert_is_close(single.snips.unwrap(), sharded.snips.unwrap());
        assert_is_close(single.cressieread.unwrap(), sharded.cressieread.unwrap());
        assert_is_close(single.mle.unwrap(), sharded.mle.unwrap());
        assert_bounds_close(single.gaussian, sharded.gaussian);
        assert_bounds_close(single.clopper_pearson, sharded.clopper_pearson);
        assert_bounds_close(single.cressieread_interval, sharded.cressieread_interval);
    }

    #[test]
    fn test_bad_record_is_reported_with_its_position() {
        let mut examples = random_examples(10, 2, 3);
        examples[6] = DecisionExample::new(0.5, 2.0, 0.5);
        let err = evaluate::<BanditSuite>(&examples, &config_with_shards(3)).unwrap_err();
        assert!(err.to_string().contains("record 7"), "{err}");
    }

    #[test]
    fn test_confidence_sequence_pass() {
        let examples = random_examples(500, 2, 5);
        let bounds = confidence_sequence(&examples, &EvaluatorConfig::default()).unwrap();
        assert!(bounds.is_defined());
        assert!(bounds.lower.unwrap() <= bounds.upper.unwrap());
    }

    #[test]
    fn test_ccb_sharding_matches_sequential() {
        let episodes: Vec<Episode> = (0..300)
            .map(|i| {
                let r = if i % 3 == 0 { 1.0 } else { 0.0 };
                Episode::new(vec![0.5, 0.5], vec![r, 1.0 - r], vec![0.5, 0.5])
            })
            .collect();
        let single = evaluate::<CcbSuite>(&episodes, &config_with_shards(1)).unwrap();
        let sharded = evaluate::<CcbSuite>(&episodes, &config_with_shards(4)).unwrap();

        assert_eq!(single.pdis.impression, vec![1.0, 1.0]);
        assert_is_close(
            single.pdis.r_overall.unwrap(),
            sharded.pdis.r_overall.unwrap(),
        );
        assert_is_close(
            single.first_slot.r[0].unwrap(),
            sharded.first_slot.r[0].unwrap(),
        );
        assert_bounds_close(single.pdis_interval.r[1], sharded.pdis_interval.r[1]);
    }

    #[test]
    fn test_slate_single_slot_matches_ips() {
        let examples = random_examples(1_000, 3, 9);
        let records: Vec<SlateRecord> = examples
            .iter()
            .map(|ex| SlateRecord {
                p_logs: vec![ex.p_log],
                reward: ex.reward,
                p_preds: vec![ex.p_pred],
                count: 1.0,
            })
            .collect();
        let slate = evaluate::<SlateSuite>(&records, &config_with_shards(4)).unwrap();
        let bandit = evaluate::<BanditSuite>(&examples, &config_with_shards(4)).unwrap();
        assert_is_close(slate.pseudo_inverse.unwrap(), bandit.ips.unwrap());
    }
}
