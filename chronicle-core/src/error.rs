//! Error taxonomy surfaced by orchestrator operations.

use crate::narrator::NarratorError;
use crate::persist::PersistError;
use thiserror::Error;

/// Errors returned by lifecycle and query operations.
///
/// Malformed narrator directives are never errors: they are dropped during
/// parsing and only logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Cannot {action} a session that is {status}")]
    InvalidTransition { action: String, status: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Narrator error: {0}")]
    Upstream(#[from] NarratorError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
