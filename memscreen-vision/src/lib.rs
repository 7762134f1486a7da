pub mod capture_screenshot_by_window;
pub mod error;
pub mod frame_source;
pub mod monitor;
pub mod ocr;
pub mod privacy_filters;

pub use error::{Error, Result};
pub use frame_source::{
    ClosedReason, DisplayInfo, Frame, FrameStream, Target, WindowInfo,
};
pub use monitor::{list_monitors, monitor_by_id, SafeMonitor};
pub use ocr::run_ocr;
pub use privacy_filters::is_private_window;
