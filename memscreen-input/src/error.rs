use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input hook failed: {0}")]
    HookFailed(String),
}

impl From<Error> for memscreen_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::HookFailed(m) => memscreen_core::Error::Internal(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
