//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Phone number does not have the required shape
    #[error("Invalid phone number: {value:?} (expected {expected})")]
    InvalidPhone { value: String, expected: &'static str },

    /// The operating system randomness source failed
    #[error("Randomness source unavailable: {reason}")]
    Randomness { reason: String },
}

impl DomainError {
    /// Creates an invalid phone error for the given input and expected shape.
    pub fn invalid_phone(value: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidPhone {
            value: value.into(),
            expected,
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
