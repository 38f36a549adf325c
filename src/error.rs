use thiserror::Error;

/// Errors raised while validating inputs to a threshold test or a decision
///
/// All of them are detected before any per-gene computation starts, so an
/// operation either produces a row for every gene or fails as a whole.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreatError {
    #[error("Invalid contrast: {reason}")]
    InvalidContrast { reason: String },

    #[error("Invalid threshold: {reason}")]
    InvalidThreshold { reason: String },

    #[error("Empty input: no genes to test")]
    EmptyInput,

    #[error("Inconsistent gene set: {reason}")]
    InconsistentGeneSet { reason: String },

    #[error("Invalid model fit: {reason}")]
    InvalidFit { reason: String },

    #[error("Reference distribution error: {0}")]
    Distribution(String),
}

pub type Result<T> = std::result::Result<T, TreatError>;
