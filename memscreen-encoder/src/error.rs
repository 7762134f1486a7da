use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("encode failed: {0}")]
    EncodeFailed(String),
}

impl From<Error> for memscreen_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidArgument(m) => memscreen_core::Error::InvalidArgument(m),
            Error::EncoderUnavailable(m) => memscreen_core::Error::EncoderUnavailable(m),
            Error::EncodeFailed(m) => memscreen_core::Error::EncoderUnavailable(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
