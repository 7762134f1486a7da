use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio encode failed: {0}")]
    EncodeFailed(String),
}

impl From<Error> for memscreen_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidArgument(m) => memscreen_core::Error::InvalidArgument(m),
            Error::DeviceUnavailable(m) => memscreen_core::Error::TargetGone(m),
            Error::EncodeFailed(m) => memscreen_core::Error::Internal(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
