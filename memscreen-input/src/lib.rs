pub mod error;
pub mod tracker;
pub mod types;

pub use error::{Error, Result};
pub use tracker::InputTracker;
pub use types::{InputEventKind, RawInputEvent};
