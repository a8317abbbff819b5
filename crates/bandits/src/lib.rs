//! Single-decision (contextual bandit) estimators: IPS, SNIPS, empirical
//! likelihood and CR(-2) point estimates, plus Gaussian, Clopper–Pearson,
//! CR(-2) and anytime-valid confidence intervals.

pub mod clopper_pearson;
pub mod cressieread;
pub mod cs;
pub mod gaussian;
pub mod ips;
pub mod mle;
pub mod snips;

pub use clopper_pearson::ClopperPearsonInterval;
pub use cressieread::{CressiereadEstimator, CressiereadInterval};
pub use cs::ConfidenceSequenceInterval;
pub use gaussian::GaussianInterval;
pub use ips::IpsEstimator;
pub use mle::MleEstimator;
pub use snips::SnipsEstimator;
