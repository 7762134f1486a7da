use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("model runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("model runtime returned an error: {0}")]
    RuntimeError(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::RuntimeUnavailable(e.to_string())
        } else {
            Error::RuntimeError(e.to_string())
        }
    }
}

impl From<Error> for memscreen_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidArgument(m) => memscreen_core::Error::InvalidArgument(m),
            Error::RuntimeUnavailable(m) => memscreen_core::Error::RuntimeUnavailable(m),
            Error::RuntimeError(m) => memscreen_core::Error::RuntimeUnavailable(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
