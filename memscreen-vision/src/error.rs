use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("capture target gone: {0}")]
    TargetGone(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl From<Error> for memscreen_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidArgument(m) => memscreen_core::Error::InvalidArgument(m),
            Error::TargetGone(m) => memscreen_core::Error::TargetGone(m),
            Error::CaptureFailed(m) => memscreen_core::Error::Internal(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
