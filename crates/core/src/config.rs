use crate::error::OpeResult;
use crate::estimator::{DEFAULT_ALPHA, DEFAULT_ATOL};
use crate::types::{BoundsMode, RewardRange, WeightBounds};
use serde::Deserialize;

/// Root evaluator configuration. Loaded from an optional TOML/JSON file and
/// environment variables with the prefix `OPE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_atol")]
    pub atol: f64,
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub weights: WeightConfig,
}

// ─── Reward bounds ──────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_rmin")]
    pub rmin: f64,
    #[serde(default = "default_rmax")]
    pub rmax: f64,
    /// Widen the range to observed rewards instead of rejecting them.
    #[serde(default)]
    pub empirical: bool,
}

fn default_rmin() -> f64 { 0.0 }
fn default_rmax() -> f64 { 1.0 }

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            rmin: default_rmin(),
            rmax: default_rmax(),
            empirical: false,
        }
    }
}

// ─── Weight bounds ──────────────────────────────────────────────────────
/// Theoretical importance-weight bounds; `wmax` absent means unbounded.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightConfig {
    #[serde(default)]
    pub wmin: f64,
    #[serde(default)]
    pub wmax: Option<f64>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            wmin: 0.0,
            wmax: None,
        }
    }
}

fn default_alpha() -> f64 { DEFAULT_ALPHA }
fn default_atol() -> f64 { DEFAULT_ATOL }
fn default_shards() -> usize { 4 }

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            atol: default_atol(),
            shards: default_shards(),
            reward: RewardConfig::default(),
            weights: WeightConfig::default(),
        }
    }
}

impl EvaluatorConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional file, overlaid with environment
    /// variables (`OPE__ALPHA`, `OPE__REWARD__RMAX`, ...).
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("OPE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn reward_range(&self) -> OpeResult<RewardRange> {
        let mode = if self.reward.empirical {
            BoundsMode::Empirical
        } else {
            BoundsMode::Fixed
        };
        RewardRange::new(self.reward.rmin, self.reward.rmax, mode)
    }

    pub fn weight_bounds(&self) -> OpeResult<WeightBounds> {
        WeightBounds::new(self.weights.wmin, self.weights.wmax)
    }
}
