use std::error::Error as StdError;

use thiserror::Error;

use crate::{domain::error::DomainError, infra::error::InfraError};

/// Flatten an error and its sources into one line for logging.
pub fn error_chain_message(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(inner) = current {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        current = inner.source();
    }
    message
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
