use thiserror::Error;

pub type OpeResult<T> = Result<T, OpeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpeError {
    /// Malformed probability, weight, alpha or other per-call input.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Reward {reward} is outside declared bounds [{rmin}, {rmax}]")]
    RewardOutOfBounds { reward: f64, rmin: f64, rmax: f64 },

    #[error("Length mismatch: {0}")]
    LengthMismatch(String),

    /// Incompatible accumulator configurations or invalid bound declarations.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A root-finding bracket that should contain a sign change did not,
    /// or the solver hit its iteration cap.
    #[error("Root finding error: {0}")]
    RootFinding(String),
}

impl OpeError {
    /// True for errors attributable to the offending `add_example` call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OpeError::Validation(_)
                | OpeError::RewardOutOfBounds { .. }
                | OpeError::LengthMismatch(_)
        )
    }

    /// True for data/assumption mismatches rather than bad calls.
    pub fn is_configuration(&self) -> bool {
        matches!(self, OpeError::Config(_) | OpeError::RootFinding(_))
    }
}
