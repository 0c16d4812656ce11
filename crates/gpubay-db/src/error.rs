//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not owner: {0}")]
    NotOwner(String),

    #[error("job {job_id} is {status}")]
    InvalidState { job_id: String, status: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for gpubay_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => gpubay_core::Error::NotFound(what),
            DbError::NotOwner(what) => gpubay_core::Error::NotOwner(what),
            DbError::InvalidState { job_id, status } => {
                gpubay_core::Error::InvalidTransition(format!("job {job_id} is {status}"))
            }
            other => gpubay_core::Error::Internal(other.to_string()),
        }
    }
}
