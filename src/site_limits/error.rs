use thiserror::Error;

/// Errors produced by the site limits core
#[derive(Error, Debug)]
pub enum LimitError {
    /// Malformed secret material or code input
    #[error("Validation Error: {0}")]
    Validation(String),

    /// The submitted code matched none of the candidate codes
    #[error("Invalid Code")]
    InvalidCode,

    #[error("Invalid Secret ID")]
    UnknownSecret(String),

    #[error("{0} is not tracked")]
    NotTracked(String),

    #[error("{0} is already tracked")]
    AlreadyTracked(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Too many attempts, try again in {retry_after_secs} seconds")]
    TooManyAttempts { retry_after_secs: u64 },

    /// The persistent state store could not be read or written
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LimitError {
    /// Whether the error only means "nothing to do" for the caller
    pub fn is_not_tracked(&self) -> bool {
        matches!(self, LimitError::NotTracked(_))
    }
}

pub type Result<T, E = LimitError> = std::result::Result<T, E>;
