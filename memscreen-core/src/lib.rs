pub mod config;
pub mod error;
pub mod language;
pub mod logging;
pub mod paths;
pub mod pii;

pub use config::{AudioSource, Config, RuntimeSettings};
pub use error::{Error, Result};
pub use language::Language;
pub use paths::Paths;
