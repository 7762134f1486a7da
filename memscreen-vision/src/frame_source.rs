use std::time::{Duration, Instant};

use tracing::warn;
use xcap::{Monitor, Window};

use crate::error::{Error, Result};
use crate::monitor::{list_monitors, monitor_by_id};

#[derive(Debug, Clone)]
pub struct DisplayInfo {
    pub index: usize,
    pub display_id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub title: String,
    pub app_name: String,
    pub bounds: (i32, i32, u32, u32),
}

/// Capture target, per §4.5. `Window` is resolved at `open()` time to a
/// concrete region on its current display (see DESIGN.md open-question 1).
#[derive(Debug, Clone)]
pub enum Target {
    Full,
    Display(String),
    Region { display_id: String, rect: (i32, i32, u32, u32) },
    Window(String),
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: Instant,
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major, no padding.
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOutcome {
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    Requested,
    TargetGone,
}

pub fn list_displays() -> Result<Vec<DisplayInfo>> {
    let monitors = list_monitors().map_err(|e| Error::CaptureFailed(e.to_string()))?;
    Ok(monitors
        .into_iter()
        .enumerate()
        .map(|(index, m)| DisplayInfo {
            index,
            display_id: m.id().to_string(),
            name: m.name().to_string(),
            width: m.width(),
            height: m.height(),
            is_primary: m.is_primary(),
        })
        .collect())
}

pub fn list_windows() -> Result<Vec<WindowInfo>> {
    let windows = Window::all().map_err(|e| Error::CaptureFailed(e.to_string()))?;
    Ok(windows
        .into_iter()
        .filter_map(|w| {
            let title = w.title().ok()?;
            let app_name = w.app_name().ok()?;
            let x = w.x().ok()?;
            let y = w.y().ok()?;
            let width = w.width().ok()?;
            let height = w.height().ok()?;
            Some(WindowInfo {
                title,
                app_name,
                bounds: (x, y, width, height),
            })
        })
        .collect())
}

enum CaptureSource {
    Monitor(Monitor),
    Window(Window),
    /// A sub-rectangle of a monitor.
    Region { monitor: Monitor, rect: (i32, i32, u32, u32) },
}

/// A frame producer tied to one recording. Frames are pulled cooperatively
/// by calling `next`; the stream never produces faster than `interval`.
pub struct FrameStream {
    source: CaptureSource,
    interval: Duration,
    last_delivered: Option<Instant>,
    drop_counter: u64,
    closed: Option<ClosedReason>,
}

impl FrameStream {
    pub fn open(target: &Target, interval: Duration) -> Result<Self> {
        let source = match target {
            Target::Full => {
                let monitor = primary_monitor()?;
                CaptureSource::Monitor(monitor)
            }
            Target::Display(id) => {
                let monitor = monitor_by_id(parse_id(id)?)
                    .map_err(|_| Error::TargetGone(format!("display {id}")))?;
                CaptureSource::Monitor(monitor)
            }
            Target::Region { display_id, rect } => {
                let monitor = monitor_by_id(parse_id(display_id)?)
                    .map_err(|_| Error::TargetGone(format!("display {display_id}")))?;
                validate_region_in_bounds(&monitor, *rect)?;
                CaptureSource::Region {
                    monitor,
                    rect: *rect,
                }
            }
            Target::Window(title) => {
                let window = find_window(title)?;
                CaptureSource::Window(window)
            }
        };

        Ok(Self {
            source,
            interval,
            last_delivered: None,
            drop_counter: 0,
            closed: None,
        })
    }

    pub fn drop_counter(&self) -> u64 {
        self.drop_counter
    }

    /// Blocks (cooperatively) until the next frame is due, then captures it.
    /// Returns `Ok(Some(frame))`, `Ok(None)` on a soft timeout against
    /// `deadline`, or `Err` when the target has vanished or been closed.
    pub async fn next(&mut self, deadline: Duration) -> std::result::Result<Option<Frame>, ClosedReason> {
        if let Some(reason) = self.closed {
            return Err(reason);
        }

        if let Some(last) = self.last_delivered {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            } else if elapsed > self.interval * 2 {
                self.drop_counter += 1;
            }
        }

        let captured = tokio::time::timeout(deadline, self.capture_once()).await;
        match captured {
            Ok(Ok(frame)) => {
                self.last_delivered = Some(Instant::now());
                Ok(Some(frame))
            }
            Ok(Err(reason)) => {
                self.closed = Some(reason);
                Err(reason)
            }
            Err(_) => Ok(None),
        }
    }

    async fn capture_once(&self) -> std::result::Result<Frame, ClosedReason> {
        match &self.source {
            CaptureSource::Monitor(monitor) => {
                let image = monitor.capture_image().map_err(|_| ClosedReason::TargetGone)?;
                Ok(image_to_frame(image))
            }
            CaptureSource::Window(window) => {
                if !window.is_minimized().unwrap_or(false) {
                    let image = window.capture_image().map_err(|_| ClosedReason::TargetGone)?;
                    Ok(image_to_frame(image))
                } else {
                    Err(ClosedReason::TargetGone)
                }
            }
            CaptureSource::Region { monitor, rect } => {
                let image = monitor.capture_image().map_err(|_| ClosedReason::TargetGone)?;
                Ok(crop_to_region(image_to_frame(image), *rect))
            }
        }
    }

    pub fn close(self, reason: ClosedReason) {
        if reason == ClosedReason::Requested {
            // Explicit close: platform resources (the xcap handles) are
            // released when `self` drops here.
        }
    }
}

fn image_to_frame(buf: image::RgbaImage) -> Frame {
    let (width, height) = (buf.width(), buf.height());
    Frame {
        timestamp: Instant::now(),
        width,
        height,
        pixels: buf.into_raw(),
    }
}

fn crop_to_region(frame: Frame, rect: (i32, i32, u32, u32)) -> Frame {
    let (rx, ry, rw, rh) = rect;
    let mut pixels = Vec::with_capacity((rw * rh * 4) as usize);
    for row in 0..rh {
        let src_y = ry + row as i32;
        if src_y < 0 || src_y as u32 >= frame.height {
            pixels.extend(std::iter::repeat(0u8).take((rw * 4) as usize));
            continue;
        }
        let row_start = (src_y as u32 * frame.width * 4) as usize;
        for col in 0..rw {
            let src_x = rx + col as i32;
            if src_x < 0 || src_x as u32 >= frame.width {
                pixels.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            let idx = row_start + (src_x as u32 * 4) as usize;
            pixels.extend_from_slice(&frame.pixels[idx..idx + 4]);
        }
    }
    Frame {
        timestamp: frame.timestamp,
        width: rw,
        height: rh,
        pixels,
    }
}

fn primary_monitor() -> Result<Monitor> {
    Monitor::all()
        .map_err(|e| Error::CaptureFailed(e.to_string()))?
        .into_iter()
        .find(|m| m.is_primary().unwrap_or(false))
        .ok_or_else(|| Error::CaptureFailed("no primary display".into()))
}

fn find_window(title: &str) -> Result<Window> {
    Window::all()
        .map_err(|e| Error::CaptureFailed(e.to_string()))?
        .into_iter()
        .find(|w| w.title().map(|t| t == title).unwrap_or(false))
        .ok_or_else(|| Error::TargetGone(format!("window {title}")))
}

fn parse_id(id: &str) -> Result<u32> {
    id.parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid display id {id}")))
}

fn validate_region_in_bounds(monitor: &Monitor, rect: (i32, i32, u32, u32)) -> Result<()> {
    let (x, y, w, h) = rect;
    let width = monitor.width().unwrap_or(0) as i32;
    let height = monitor.height().unwrap_or(0) as i32;
    if x < 0 || y < 0 || x + w as i32 > width || y + h as i32 > height {
        warn!(?rect, width, height, "region does not lie inside display bounds");
        return Err(Error::InvalidArgument(
            "region_rect must lie inside target display bounds".into(),
        ));
    }
    Ok(())
}
