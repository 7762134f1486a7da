//! Shared keyboard/mouse tracking session (C7 integration), used both by the
//! `/process/tracking/*` HTTP surface and by the Recording Orchestrator when
//! `auto_track_input_with_recording` is enabled.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use memscreen_core::{Error, Result};
use memscreen_db::{models::InputEvent, MetadataStore};
use memscreen_input::{InputEventKind as RawKind, InputTracker, RawInputEvent};
use tokio::sync::{mpsc::UnboundedReceiver, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Owns the single `InputTracker` hook and the in-memory event buffer for
/// the currently-open session. Events are flushed to C2 only on `stop`, per
/// §4.7's "atomic batch: all events or none".
pub struct TrackingManager {
    inner: Mutex<Inner>,
    db: Arc<MetadataStore>,
}

struct Inner {
    tracker: InputTracker,
    session_id: Option<String>,
    session_start: Option<DateTime<Utc>>,
    buffer: Vec<InputEvent>,
    drain: Option<JoinHandle<()>>,
}

impl TrackingManager {
    pub fn new(db: Arc<MetadataStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tracker: InputTracker::new(),
                session_id: None,
                session_start: None,
                buffer: Vec::new(),
                drain: None,
            }),
            db,
        }
    }

    pub async fn is_tracking(&self) -> bool {
        self.inner.lock().await.tracker.is_active()
    }

    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    /// Starts a session if none is active; a no-op otherwise (§4.7).
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.tracker.is_active() {
            return Ok(());
        }
        let session = self
            .db
            .input_session_open(Utc::now())
            .await
            .map_err(memscreen_core::Error::from)?;
        let rx = inner
            .tracker
            .start()
            .map_err(memscreen_core::Error::from)?;
        inner.session_id = Some(session.id.clone());
        inner.session_start = Some(session.start_time);
        inner.buffer.clear();
        if let Some(rx) = rx {
            let this = Arc::clone(self);
            inner.drain = Some(tokio::spawn(async move { this.drain_loop(rx).await }));
        }
        Ok(())
    }

    /// Rebinds the active session's start time to now (§4.7); a no-op when
    /// no session is active.
    pub async fn mark_start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.session_id.clone() {
            inner.tracker.mark_start();
            let now = Utc::now();
            inner.session_start = Some(now);
            self.db
                .input_session_rebind_start(&id, now)
                .await
                .map_err(memscreen_core::Error::from)?;
        }
        Ok(())
    }

    /// Stops tracking and flushes buffered events atomically. Returns the
    /// `(events_saved, start_time, end_time)` triple the HTTP surface wants.
    pub async fn stop(&self) -> Result<(usize, DateTime<Utc>, DateTime<Utc>)> {
        let mut inner = self.inner.lock().await;
        let was_active = inner.tracker.stop();
        let Some(session_id) = inner.session_id.take() else {
            return Ok((0, Utc::now(), Utc::now()));
        };
        let start_time = inner.session_start.take().unwrap_or_else(Utc::now);
        if let Some(handle) = inner.drain.take() {
            handle.abort();
        }
        let events = std::mem::take(&mut inner.buffer);
        let count = events.len();
        let end_time = events.last().map(|e| e.t).unwrap_or(start_time);
        if was_active && !events.is_empty() {
            self.db
                .input_event_append_batch(&session_id, &events)
                .await
                .map_err(memscreen_core::Error::from)?;
        }
        Ok((count, start_time, end_time))
    }

    async fn drain_loop(self: Arc<Self>, mut rx: UnboundedReceiver<RawInputEvent>) {
        while let Some(raw) = rx.recv().await {
            let mut inner = self.inner.lock().await;
            if inner.session_id.is_none() {
                continue;
            }
            inner.buffer.push(InputEvent {
                id: memscreen_db::uuid_v4(),
                session_id: inner.session_id.clone().unwrap_or_default(),
                t: raw.t,
                kind: convert_kind(raw.kind),
                payload: raw.payload.to_string(),
            });
        }
    }
}

fn convert_kind(kind: RawKind) -> memscreen_db::models::InputEventKind {
    use memscreen_db::models::InputEventKind as K;
    match kind {
        RawKind::KeyPress => K::KeyPress,
        RawKind::KeyRelease => K::KeyRelease,
        RawKind::MouseDown => K::MouseDown,
        RawKind::MouseUp => K::MouseUp,
        RawKind::MouseMoveSampled => K::MouseMoveSampled,
        RawKind::Scroll => K::Scroll,
    }
}

/// Bridges a `db::Error`/`input::Error` into the shared taxonomy for call
/// sites that only have `?` available (kept narrow; most conversions already
/// live on the leaf crates' own `Error` types).
pub fn log_drain_error(context: &str, err: &Error) {
    match err {
        Error::Internal(_) => error!(%context, %err, "tracking drain error"),
        _ => warn!(%context, %err, "tracking drain error"),
    }
}
