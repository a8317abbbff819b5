//! Off-policy evaluation core: the decision data model and the estimator
//! capability traits shared by the estimator crates.

pub mod config;
pub mod error;
pub mod estimator;
pub mod math;
pub mod summation;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod types;

pub use config::EvaluatorConfig;
pub use error::{OpeError, OpeResult};
pub use estimator::{
    merge_all, validate_alpha, Estimator, Interval, Merge, SlateEstimator, SlateInterval,
    DEFAULT_ALPHA, DEFAULT_ATOL,
};
pub use summation::CompensatedSum;
pub use types::{
    drop_adjusted, ensure_count, ensure_finite, importance_weight, BoundsMode, ConfidenceBounds,
    DecisionExample, RewardRange, WeightBounds,
};
