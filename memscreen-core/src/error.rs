use thiserror::Error;

/// Shared error taxonomy. Every component-level error type in this workspace
/// ultimately maps onto one of these kinds so the HTTP layer can translate it
/// into a stable `(status, detail)` pair without knowing the originating
/// component.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("model runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("capture target gone: {0}")]
    TargetGone(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable taxonomy tag, independent of the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Busy(_) => "busy",
            Error::NotFound(_) => "not_found",
            Error::RuntimeUnavailable(_) => "runtime_unavailable",
            Error::EncoderUnavailable(_) => "encoder_unavailable",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::TargetGone(_) => "target_gone",
            Error::Cancelled(_) => "cancelled",
            Error::Internal(_) => "internal",
        }
    }

    /// HTTP status the `/` API surface should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidArgument(_) => 400,
            Error::NotFound(_) => 404,
            Error::Busy(_) => 409,
            Error::RuntimeUnavailable(_)
            | Error::EncoderUnavailable(_)
            | Error::StorageUnavailable(_)
            | Error::TargetGone(_)
            | Error::Cancelled(_)
            | Error::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
