use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("detection probability must be in [0.0, 1.0], got {0}")]
    Probability(f64),
    #[error("detection script must not be empty")]
    EmptyScript,
}

pub type Result<T> = std::result::Result<T, SimError>;
