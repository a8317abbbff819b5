//! Conditional contextual bandit (CCB) evaluation: single-decision
//! estimators lifted to episodes holding a variable number of ordered slots.

pub mod base;
pub mod episode;
pub mod first_slot;
pub mod multislot;
pub mod pdis_cressieread;

pub use base::{CcbEstimator, CcbInterval};
pub use episode::Episode;
pub use first_slot::{FirstSlotEstimator, FirstSlotInterval};
pub use multislot::{MultislotEstimator, MultislotInterval};
pub use pdis_cressieread::{PdisCressiereadEstimator, PdisCressiereadInterval};
