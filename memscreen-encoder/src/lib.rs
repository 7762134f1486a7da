pub mod encode;
pub mod error;
pub mod resolver;
pub mod sequence;

pub use encode::{encode, EncodeOutcome, EncodeRequest};
pub use error::{Error, Result};
pub use resolver::find_ffmpeg_path;
pub use sequence::{plan_sequence, SampledFrame, Sequence};
