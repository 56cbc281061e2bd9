use thiserror::Error;

use crate::{ledger::LedgerError, rates::RateError};

/// Rejection of a single piece of user input. The step stays where it was.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("input is empty")]
    Empty,
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error("value must be greater than zero")]
    NotPositive,
    #[error("value must not exceed {max}")]
    TooLarge { max: i64 },
    #[error("the result is too large to display")]
    Overflow,
    #[error("`{0}` is not a whole number")]
    NotAnInteger(String),
    #[error("`{0}` is not a date in YYYY-MM-DD format")]
    InvalidDate(String),
    #[error("`{0}` is not one of the offered choices")]
    UnknownChoice(String),
    #[error("`{0}` is not a valid currency code")]
    InvalidCurrencyCode(String),
    #[error("input exceeds {max} characters")]
    TooLong { max: usize },
    #[error("commands are not accepted at this step")]
    UnexpectedCommand,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate source unavailable: {0}")]
    Unavailable(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unavailable(_) => "unavailable",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Text that is safe to send back to the user. `NotFound` and `Conflict`
    /// carry a message composed for the user; the other variants carry
    /// diagnostics that must stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(error) => format!("Invalid input: {error}."),
            Self::NotFound(message) | Self::Conflict(message) => message.clone(),
            Self::Unavailable(_) => {
                "The exchange rate service is temporarily unavailable. Please try again later."
                    .to_owned()
            }
            Self::Persistence(_) => {
                "Something went wrong while saving your data. Please try again later.".to_owned()
            }
            Self::Configuration(_) => "An unexpected internal error occurred.".to_owned(),
        }
    }
}

impl From<LedgerError> for ApplicationError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound => Self::NotFound("The requested record was not found.".to_owned()),
            LedgerError::AlreadyExists => Self::Conflict("That record already exists.".to_owned()),
            LedgerError::Storage(detail) => Self::Persistence(detail),
        }
    }
}

impl From<RateError> for ApplicationError {
    fn from(value: RateError) -> Self {
        match value {
            RateError::NotFound(code) => {
                Self::NotFound(format!("Currency {code} is not supported by the rate service."))
            }
            RateError::Unavailable(detail) => Self::Unavailable(detail),
        }
    }
}
