//! Slate estimators for Cartesian-product action spaces under a product
//! logging policy.

pub mod gaussian;
pub mod pseudo_inverse;

pub use gaussian::SlateGaussianInterval;
pub use pseudo_inverse::{pseudo_inverse_weight, PseudoInverseEstimator};
