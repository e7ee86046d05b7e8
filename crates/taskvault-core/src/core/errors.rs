//! Typed error types for the taskvault-core service layer.

use thiserror::Error;

use crate::ids::EntityKind;

/// Result type alias for core service operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the taskvault-core service layer.
///
/// A missing target on update/delete/comment is not an error: those
/// operations return `Ok(false)`. Integrity warnings are logged, never raised.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The vault is not initialized.
    #[error("Not a taskvault workspace at {path}. Run 'taskvault init' first.")]
    NotInitialized { path: String },

    /// A required field is missing or the payload breaks a model rule.
    /// Raised before anything is written.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// The id counter stayed contended for every allowed attempt.
    #[error("Could not allocate a {kind} id after {attempts} attempts")]
    Allocation { kind: EntityKind, attempts: u32 },

    /// A referenced entity does not exist.
    #[error("Not found: {id}")]
    NotFound { id: String },

    /// The legacy id migration could not commit.
    #[error("Migration failed: {reason}")]
    Migration { reason: String },

    /// An internal storage or database error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Wrap a raw SQLite error with context.
    pub(crate) fn storage(err: rusqlite::Error, context: &'static str) -> Self {
        Self::Internal(anyhow::Error::new(err).context(context))
    }
}
