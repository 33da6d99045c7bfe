//! The stable error taxonomy shared by every component, from the identity
//! store (C1) down to the GC coordinator (C11). Protocol front-ends map
//! these kinds to wire-level response codes; the core never emits a
//! protocol-specific code itself.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found")]
    NotFound,

    #[error("unique violation: {0}")]
    UniqueViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("message body not yet available")]
    MessageNotYetAvailable,

    #[error("transaction conflict, retry")]
    TransactionConflict,

    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("fatal error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl CoreError {
    /// True if the caller may usefully retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransactionConflict
                | CoreError::Transient(_)
                | CoreError::MessageNotYetAvailable
        )
    }
}

/// Maps a raw `sqlx::Error` to the stable taxonomy. This is the single
/// place where PostgreSQL-specific detail (constraint names, SQLSTATE
/// codes) is allowed to leak in.
impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    // unique_violation
                    Some("23505") => CoreError::UniqueViolation(db_err.message().to_string()),
                    // check_violation
                    Some("23514") => CoreError::InvalidInput(db_err.message().to_string()),
                    // serialization_failure / deadlock_detected
                    Some("40001") | Some("40P01") => CoreError::TransactionConflict,
                    _ => CoreError::Fatal(anyhow::Error::new(err)),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                CoreError::Transient(anyhow::Error::new(err))
            }
            _ => CoreError::Fatal(anyhow::Error::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
