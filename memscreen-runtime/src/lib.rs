pub mod client;
pub mod error;
pub mod types;

pub use client::RuntimeClient;
pub use error::{Error, Result};
pub use types::{ChatChunk, ChatMessage, ChatRequest, ChatRole, ModelCatalogEntry, PullProgress};
