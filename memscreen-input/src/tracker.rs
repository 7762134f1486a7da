use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use rdev::{listen, Event, EventType};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{InputEventKind, RawInputEvent};

const MOUSE_MOVE_SAMPLE_INTERVAL_MS: i64 = 50;

struct Listener {
    handle: JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

/// Global keyboard/mouse tracker. Owns at most one `rdev::listen` thread;
/// starting an already-active tracker or stopping an inactive one is a
/// no-op, so a floating indicator toggled without knowing current state
/// can't double-spawn hooks or leave one dangling.
pub struct InputTracker {
    listener: Option<Listener>,
    session_start: Option<DateTime<Utc>>,
}

impl Default for InputTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InputTracker {
    pub fn new() -> Self {
        Self {
            listener: None,
            session_start: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    /// Rebinds the session's logical start time to now without touching
    /// the hook thread.
    pub fn mark_start(&mut self) {
        if self.is_active() {
            self.session_start = Some(Utc::now());
        }
    }

    /// Returns `Some(receiver)` when this call actually started a new
    /// hook, `None` if the tracker was already active.
    pub fn start(&mut self) -> Result<Option<UnboundedReceiver<RawInputEvent>>> {
        if self.listener.is_some() {
            return Ok(None);
        }

        let (tx, rx) = unbounded_channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();

        let handle = std::thread::Builder::new()
            .name("memscreen-input-hook".into())
            .spawn(move || run_hook(tx, thread_stop))
            .map_err(|e| Error::HookFailed(e.to_string()))?;

        self.listener = Some(Listener { handle, stop_flag });
        self.session_start = Some(Utc::now());
        Ok(Some(rx))
    }

    /// Returns `true` if an active hook was actually stopped.
    pub fn stop(&mut self) -> bool {
        self.session_start = None;
        match self.listener.take() {
            Some(listener) => {
                listener.stop_flag.store(true, Ordering::SeqCst);
                // rdev has no portable way to interrupt a blocking listen
                // call; the callback stops forwarding events immediately,
                // and the OS-level hook itself is torn down when the
                // thread exits at process shutdown.
                drop(listener.handle);
                true
            }
            None => false,
        }
    }
}

fn run_hook(tx: UnboundedSender<RawInputEvent>, stop_flag: Arc<AtomicBool>) {
    let last_move_ms = AtomicI64::new(0);
    let callback = move |event: Event| {
        if stop_flag.load(Ordering::SeqCst) {
            return;
        }
        if let Some(raw) = classify(&event, &last_move_ms) {
            let _ = tx.send(raw);
        }
    };
    if let Err(err) = listen(callback) {
        warn!(?err, "input hook terminated");
    }
}

fn classify(event: &Event, last_move_ms: &AtomicI64) -> Option<RawInputEvent> {
    let t = Utc::now();
    let (kind, payload) = match &event.event_type {
        EventType::KeyPress(key) => (
            InputEventKind::KeyPress,
            serde_json::json!({ "key": format!("{key:?}") }),
        ),
        EventType::KeyRelease(key) => (
            InputEventKind::KeyRelease,
            serde_json::json!({ "key": format!("{key:?}") }),
        ),
        EventType::ButtonPress(button) => (
            InputEventKind::MouseDown,
            serde_json::json!({ "button": format!("{button:?}") }),
        ),
        EventType::ButtonRelease(button) => (
            InputEventKind::MouseUp,
            serde_json::json!({ "button": format!("{button:?}") }),
        ),
        EventType::Wheel { delta_x, delta_y } => (
            InputEventKind::Scroll,
            serde_json::json!({ "delta_x": delta_x, "delta_y": delta_y }),
        ),
        EventType::MouseMove { x, y } => {
            let now_ms = t.timestamp_millis();
            let last = last_move_ms.load(Ordering::Relaxed);
            if now_ms - last < MOUSE_MOVE_SAMPLE_INTERVAL_MS {
                return None;
            }
            last_move_ms.store(now_ms, Ordering::Relaxed);
            (
                InputEventKind::MouseMoveSampled,
                serde_json::json!({ "x": x, "y": y }),
            )
        }
    };
    Some(RawInputEvent { t, kind, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn mouse_move(x: f64, y: f64) -> Event {
        Event {
            time: SystemTime::now(),
            name: None,
            event_type: EventType::MouseMove { x, y },
        }
    }

    #[test]
    fn mouse_moves_are_downsampled() {
        let last_move_ms = AtomicI64::new(0);
        let first = classify(&mouse_move(1.0, 1.0), &last_move_ms);
        assert!(first.is_some());
        let second = classify(&mouse_move(2.0, 2.0), &last_move_ms);
        assert!(second.is_none(), "second move within 50ms should be dropped");
    }

    #[test]
    fn stop_on_inactive_tracker_is_noop() {
        let mut tracker = InputTracker::new();
        assert!(!tracker.stop());
    }

    #[test]
    fn mark_start_on_inactive_tracker_is_noop() {
        let mut tracker = InputTracker::new();
        tracker.mark_start();
        assert!(tracker.session_start().is_none());
    }
}
