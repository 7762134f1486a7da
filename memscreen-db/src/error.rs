use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Error::NotFound(e.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::ConstraintViolation(db_err.to_string())
            }
            _ => Error::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<Error> for memscreen_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(m) => memscreen_core::Error::NotFound(m),
            Error::ConstraintViolation(m) => memscreen_core::Error::InvalidArgument(m),
            Error::StorageUnavailable(m) => memscreen_core::Error::StorageUnavailable(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
