use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::models::{
    AnalysisState, AudioSourceTag, ChatMessage, ChatRole, ChatThread, FrameArtifact, InputEvent,
    InputEventKind, InputSession, Recording, RecordingFilter, RecordingMode, RecordingOrder,
    RecordingPatch,
};

/// The relational metadata store (C2). Single-writer: all mutating methods
/// take `&self` and rely on sqlite's own lock plus a single pool with a
/// bounded number of connections, matching the "single internal I/O task"
/// policy in §5.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

fn audio_tag_str(tag: AudioSourceTag) -> &'static str {
    match tag {
        AudioSourceTag::None => "none",
        AudioSourceTag::Microphone => "microphone",
        AudioSourceTag::System => "system",
        AudioSourceTag::Mixed => "mixed",
    }
}

fn audio_tag_parse(s: &str) -> AudioSourceTag {
    match s {
        "microphone" => AudioSourceTag::Microphone,
        "system" => AudioSourceTag::System,
        "mixed" => AudioSourceTag::Mixed,
        _ => AudioSourceTag::None,
    }
}

/// Canonical wire/DB string for a `RecordingMode`, matching the
/// `#[serde(rename_all = "kebab-case")]` form other layers expect.
pub fn mode_str(mode: RecordingMode) -> &'static str {
    match mode {
        RecordingMode::Fullscreen => "fullscreen",
        RecordingMode::FullscreenSingle => "fullscreen-single",
        RecordingMode::Region => "region",
    }
}

fn mode_parse(s: &str) -> RecordingMode {
    match s {
        "fullscreen-single" => RecordingMode::FullscreenSingle,
        "region" => RecordingMode::Region,
        _ => RecordingMode::Fullscreen,
    }
}

/// Reads a `FrameArtifact` out of a row produced by a `frame_artifacts fa
/// JOIN recordings r` query, where `fa`'s columns were aliased to avoid
/// colliding with `r`'s identically-named ones (both tables have an `id`
/// column, and a bare `fa.*, r.*` select makes sqlx's by-name lookup resolve
/// to whichever one comes last).
fn row_to_frame_artifact_joined(row: &SqliteRow) -> Result<FrameArtifact> {
    Ok(FrameArtifact {
        id: row.try_get("artifact_id")?,
        recording_id: row.try_get("artifact_recording_id")?,
        t_offset_seconds: row.try_get("artifact_t_offset_seconds")?,
        ocr_text: row.try_get("artifact_ocr_text")?,
        vision_description: row.try_get("artifact_vision_description")?,
        embedding_ref: row.try_get("artifact_embedding_ref")?,
        created_at: row.try_get("artifact_created_at")?,
    })
}

fn row_to_recording(row: &SqliteRow) -> Result<Recording> {
    let content_tags: String = row.try_get("content_tags")?;
    let user_tags: String = row.try_get("user_tags")?;
    let region_x: Option<i32> = row.try_get("region_x")?;
    let region_y: Option<i32> = row.try_get("region_y")?;
    let region_w: Option<i32> = row.try_get("region_w")?;
    let region_h: Option<i32> = row.try_get("region_h")?;
    let region_rect = match (region_x, region_y, region_w, region_h) {
        (Some(x), Some(y), Some(w), Some(h)) => Some((x, y, w, h)),
        _ => None,
    };
    Ok(Recording {
        id: row.try_get("id")?,
        device_name: row.try_get("device_name")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        frame_count: row.try_get("frame_count")?,
        fps: row.try_get("fps")?,
        duration_seconds: row.try_get("duration_seconds")?,
        file_path: row.try_get("file_path")?,
        audio_source_tag: audio_tag_parse(row.try_get::<String, _>("audio_source_tag")?.as_str()),
        mode: mode_parse(row.try_get::<String, _>("mode")?.as_str()),
        target_display_id: row.try_get("target_display_id")?,
        target_window_title: row.try_get("target_window_title")?,
        region_rect,
        app_name: row.try_get("app_name")?,
        content_summary: row.try_get("content_summary")?,
        content_tags: serde_json::from_str(&content_tags).unwrap_or_default(),
        user_tags: serde_json::from_str(&user_tags).unwrap_or_default(),
        analysis_state: AnalysisState::parse(row.try_get::<String, _>("analysis_state")?.as_str()),
    })
}

impl MetadataStore {
    /// Opens the sqlite database at `path`, running all pending migrations
    /// inside a transaction. Refuses to open (surfacing `storage_unavailable`)
    /// if a migration fails.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    #[instrument(skip(self, recording))]
    pub async fn put_recording(&self, recording: &Recording) -> Result<String> {
        let content_tags = serde_json::to_string(&recording.content_tags).unwrap();
        let user_tags = serde_json::to_string(&recording.user_tags).unwrap();
        let (rx, ry, rw, rh) = recording
            .region_rect
            .map(|(x, y, w, h)| (Some(x), Some(y), Some(w), Some(h)))
            .unwrap_or((None, None, None, None));

        sqlx::query(
            r#"
            INSERT INTO recordings (
                id, device_name, start_time, end_time, frame_count, fps, duration_seconds,
                file_path, audio_source_tag, mode, target_display_id, target_window_title,
                region_x, region_y, region_w, region_h, app_name, content_summary,
                content_tags, user_tags, analysis_state
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&recording.id)
        .bind(&recording.device_name)
        .bind(recording.start_time)
        .bind(recording.end_time)
        .bind(recording.frame_count)
        .bind(recording.fps)
        .bind(recording.duration_seconds)
        .bind(&recording.file_path)
        .bind(audio_tag_str(recording.audio_source_tag))
        .bind(mode_str(recording.mode))
        .bind(&recording.target_display_id)
        .bind(&recording.target_window_title)
        .bind(rx)
        .bind(ry)
        .bind(rw)
        .bind(rh)
        .bind(&recording.app_name)
        .bind(&recording.content_summary)
        .bind(content_tags)
        .bind(user_tags)
        .bind(recording.analysis_state.as_str())
        .execute(&self.pool)
        .await?;

        Ok(recording.id.clone())
    }

    pub async fn update_recording(&self, id: &str, patch: &RecordingPatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(state) = patch.analysis_state {
            sqlx::query("UPDATE recordings SET analysis_state = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(end_time) = patch.end_time {
            sqlx::query("UPDATE recordings SET end_time = ? WHERE id = ?")
                .bind(end_time)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(summary) = &patch.content_summary {
            sqlx::query("UPDATE recordings SET content_summary = ? WHERE id = ?")
                .bind(summary)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(tags) = &patch.content_tags {
            sqlx::query("UPDATE recordings SET content_tags = ? WHERE id = ?")
                .bind(serde_json::to_string(tags).unwrap())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(tags) = &patch.user_tags {
            sqlx::query("UPDATE recordings SET user_tags = ? WHERE id = ?")
                .bind(serde_json::to_string(tags).unwrap())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(app_name) = &patch.app_name {
            sqlx::query("UPDATE recordings SET app_name = ? WHERE id = ?")
                .bind(app_name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(fps) = patch.fps {
            sqlx::query("UPDATE recordings SET fps = ? WHERE id = ?")
                .bind(fps)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(frame_count) = patch.frame_count {
            sqlx::query("UPDATE recordings SET frame_count = ? WHERE id = ?")
                .bind(frame_count)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(duration) = patch.duration_seconds {
            sqlx::query("UPDATE recordings SET duration_seconds = ? WHERE id = ?")
                .bind(duration)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(file_path) = &patch.file_path {
            sqlx::query("UPDATE recordings SET file_path = ? WHERE id = ?")
                .bind(file_path)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_recording(&self, id: &str) -> Result<Recording> {
        let row = sqlx::query("SELECT * FROM recordings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("recording {id}")))?;
        row_to_recording(&row)
    }

    pub async fn delete_recording(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("recording {id}")));
        }
        Ok(())
    }

    pub async fn list_recordings(
        &self,
        filter: &RecordingFilter,
        order: RecordingOrder,
        limit: i64,
    ) -> Result<Vec<Recording>> {
        let mut sql = String::from("SELECT * FROM recordings WHERE 1=1");
        if filter.start_after.is_some() {
            sql.push_str(" AND start_time >= ?");
        }
        if filter.start_before.is_some() {
            sql.push_str(" AND start_time <= ?");
        }
        if filter.mode.is_some() {
            sql.push_str(" AND mode = ?");
        }
        if filter.analysis_state.is_some() {
            sql.push_str(" AND analysis_state = ?");
        }
        if filter.tag.is_some() {
            sql.push_str(" AND (content_tags LIKE ? OR user_tags LIKE ?)");
        }
        sql.push_str(match order {
            RecordingOrder::StartTimeDesc => " ORDER BY start_time DESC",
            RecordingOrder::StartTimeAsc => " ORDER BY start_time ASC",
        });
        sql.push_str(" LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(after) = filter.start_after {
            query = query.bind(after);
        }
        if let Some(before) = filter.start_before {
            query = query.bind(before);
        }
        if let Some(mode) = filter.mode {
            query = query.bind(mode_str(mode));
        }
        if let Some(state) = filter.analysis_state {
            query = query.bind(state.as_str());
        }
        if let Some(tag) = &filter.tag {
            let pattern = format!("%\"{tag}\"%");
            query = query.bind(pattern.clone()).bind(pattern);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_recording).collect()
    }

    pub async fn put_frame_artifacts(
        &self,
        recording_id: &str,
        artifacts: &[FrameArtifact],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for artifact in artifacts {
            sqlx::query(
                r#"
                INSERT INTO frame_artifacts
                    (id, recording_id, t_offset_seconds, ocr_text, vision_description, embedding_ref, created_at)
                VALUES (?,?,?,?,?,?,?)
                "#,
            )
            .bind(&artifact.id)
            .bind(recording_id)
            .bind(artifact.t_offset_seconds)
            .bind(&artifact.ocr_text)
            .bind(&artifact.vision_description)
            .bind(&artifact.embedding_ref)
            .bind(artifact.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes all existing frame artifacts for a recording. Used by the
    /// ingestion pipeline to make re-analysis idempotent (§4.10).
    pub async fn delete_frame_artifacts(&self, recording_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT embedding_ref FROM frame_artifacts WHERE recording_id = ?")
            .bind(recording_id)
            .fetch_all(&self.pool)
            .await?;
        let refs: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<Option<String>, _>("embedding_ref"))
            .collect::<std::result::Result<Vec<Option<String>>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        sqlx::query("DELETE FROM frame_artifacts WHERE recording_id = ?")
            .bind(recording_id)
            .execute(&self.pool)
            .await?;
        Ok(refs)
    }

    pub async fn list_frame_artifacts(&self, recording_id: &str) -> Result<Vec<FrameArtifact>> {
        let rows = sqlx::query(
            "SELECT * FROM frame_artifacts WHERE recording_id = ? ORDER BY t_offset_seconds ASC",
        )
        .bind(recording_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(FrameArtifact {
                    id: row.try_get("id")?,
                    recording_id: row.try_get("recording_id")?,
                    t_offset_seconds: row.try_get("t_offset_seconds")?,
                    ocr_text: row.try_get("ocr_text")?,
                    vision_description: row.try_get("vision_description")?,
                    embedding_ref: row.try_get("embedding_ref")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Keyword search over `ocr_text`/`content_summary`/`content_tags`,
    /// used as one leg of the hybrid retrieval in C11.
    pub async fn keyword_search(
        &self,
        query_text: &str,
        limit: i64,
    ) -> Result<Vec<(FrameArtifact, Recording)>> {
        let pattern = format!("%{}%", query_text.to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT
                fa.id AS artifact_id,
                fa.recording_id AS artifact_recording_id,
                fa.t_offset_seconds AS artifact_t_offset_seconds,
                fa.ocr_text AS artifact_ocr_text,
                fa.vision_description AS artifact_vision_description,
                fa.embedding_ref AS artifact_embedding_ref,
                fa.created_at AS artifact_created_at,
                r.*
            FROM frame_artifacts fa
            JOIN recordings r ON r.id = fa.recording_id
            WHERE lower(fa.ocr_text) LIKE ?
               OR lower(r.content_summary) LIKE ?
               OR lower(r.content_tags) LIKE ?
            ORDER BY fa.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let artifact = row_to_frame_artifact_joined(row)?;
                let recording = row_to_recording(row)?;
                Ok((artifact, recording))
            })
            .collect()
    }

    /// Fetches one frame artifact together with its parent recording, used
    /// by the query engine to hydrate vector-store hits (which carry only
    /// an artifact id) into displayable retrieval results.
    pub async fn get_frame_artifact_with_recording(
        &self,
        artifact_id: &str,
    ) -> Result<(FrameArtifact, Recording)> {
        let row = sqlx::query(
            r#"
            SELECT
                fa.id AS artifact_id,
                fa.recording_id AS artifact_recording_id,
                fa.t_offset_seconds AS artifact_t_offset_seconds,
                fa.ocr_text AS artifact_ocr_text,
                fa.vision_description AS artifact_vision_description,
                fa.embedding_ref AS artifact_embedding_ref,
                fa.created_at AS artifact_created_at,
                r.*
            FROM frame_artifacts fa
            JOIN recordings r ON r.id = fa.recording_id
            WHERE fa.id = ?
            "#,
        )
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("frame artifact {artifact_id}")))?;

        let artifact = row_to_frame_artifact_joined(&row)?;
        let recording = row_to_recording(&row)?;
        Ok((artifact, recording))
    }

    // --- Chat threads/messages ---

    pub async fn chat_thread_create(&self, title: &str) -> Result<ChatThread> {
        let now = Utc::now();
        let id = uuid_v4();
        sqlx::query(
            "INSERT INTO chat_threads (id, title, created_at, updated_at, is_active) VALUES (?,?,?,?,0)",
        )
        .bind(&id)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(ChatThread {
            id,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
            is_active: false,
        })
    }

    pub async fn chat_thread_list(&self) -> Result<Vec<ChatThread>> {
        let rows = sqlx::query("SELECT * FROM chat_threads ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ChatThread {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                    is_active: row.try_get::<i64, _>("is_active")? != 0,
                })
            })
            .collect()
    }

    pub async fn chat_thread_set_active(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE chat_threads SET is_active = 0")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE chat_threads SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat thread {id}")));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn chat_thread_delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM chat_threads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("chat thread {id}")));
        }
        Ok(())
    }

    pub async fn chat_message_append(
        &self,
        thread_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<ChatMessage> {
        let mut tx = self.pool.begin().await?;
        let next_ordinal: i64 = sqlx::query(
            "SELECT COALESCE(MAX(ordinal), 0) + 1 AS next FROM chat_messages WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next")?;

        let id = uuid_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO chat_messages (id, thread_id, role, content, created_at, ordinal) VALUES (?,?,?,?,?,?)",
        )
        .bind(&id)
        .bind(thread_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .bind(next_ordinal)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chat_threads SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ChatMessage {
            id,
            thread_id: thread_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
            ordinal: next_ordinal,
        })
    }

    pub async fn chat_history(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        let rows =
            sqlx::query("SELECT * FROM chat_messages WHERE thread_id = ? ORDER BY ordinal ASC")
                .bind(thread_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(ChatMessage {
                    id: row.try_get("id")?,
                    thread_id: row.try_get("thread_id")?,
                    role: ChatRole::parse(row.try_get::<String, _>("role")?.as_str()),
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                    ordinal: row.try_get("ordinal")?,
                })
            })
            .collect()
    }

    // --- Input sessions/events ---

    pub async fn input_session_open(&self, start_time: DateTime<Utc>) -> Result<InputSession> {
        let id = uuid_v4();
        sqlx::query(
            "INSERT INTO input_sessions (id, start_time, end_time, event_count, keystroke_count, click_count) VALUES (?,?,?,0,0,0)",
        )
        .bind(&id)
        .bind(start_time)
        .bind(start_time)
        .execute(&self.pool)
        .await?;
        Ok(InputSession {
            id,
            start_time,
            end_time: start_time,
            event_count: 0,
            keystroke_count: 0,
            click_count: 0,
        })
    }

    pub async fn input_session_rebind_start(&self, id: &str, start_time: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE input_sessions SET start_time = ? WHERE id = ?")
            .bind(start_time)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("input session {id}")));
        }
        Ok(())
    }

    pub async fn input_event_append_batch(
        &self,
        session_id: &str,
        events: &[InputEvent],
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let mut max_t = None;
        let mut keystrokes = 0i64;
        let mut clicks = 0i64;
        for event in events {
            sqlx::query(
                "INSERT INTO input_events (id, session_id, t, kind, payload) VALUES (?,?,?,?,?)",
            )
            .bind(&event.id)
            .bind(session_id)
            .bind(event.t)
            .bind(kind_str(event.kind))
            .bind(&event.payload)
            .execute(&mut *tx)
            .await?;
            max_t = Some(max_t.map_or(event.t, |m: DateTime<Utc>| m.max(event.t)));
            match event.kind {
                InputEventKind::KeyPress => keystrokes += 1,
                InputEventKind::MouseDown => clicks += 1,
                _ => {}
            }
        }
        sqlx::query(
            r#"
            UPDATE input_sessions SET
                event_count = event_count + ?,
                keystroke_count = keystroke_count + ?,
                click_count = click_count + ?,
                end_time = CASE WHEN end_time < ? THEN ? ELSE end_time END
            WHERE id = ?
            "#,
        )
        .bind(events.len() as i64)
        .bind(keystrokes)
        .bind(clicks)
        .bind(max_t)
        .bind(max_t)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn input_session_list(&self) -> Result<Vec<InputSession>> {
        let rows = sqlx::query("SELECT * FROM input_sessions ORDER BY start_time DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(InputSession {
                    id: row.try_get("id")?,
                    start_time: row.try_get("start_time")?,
                    end_time: row.try_get("end_time")?,
                    event_count: row.try_get("event_count")?,
                    keystroke_count: row.try_get("keystroke_count")?,
                    click_count: row.try_get("click_count")?,
                })
            })
            .collect()
    }

    pub async fn input_session_events(&self, id: &str) -> Result<Vec<InputEvent>> {
        let rows = sqlx::query("SELECT * FROM input_events WHERE session_id = ? ORDER BY t ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(InputEvent {
                    id: row.try_get("id")?,
                    session_id: row.try_get("session_id")?,
                    t: row.try_get("t")?,
                    kind: kind_parse(row.try_get::<String, _>("kind")?.as_str()),
                    payload: row.try_get("payload")?,
                })
            })
            .collect()
    }

    pub async fn input_session_delete(&self, id: &str) -> Result<u64> {
        let events = sqlx::query("SELECT COUNT(*) as c FROM input_events WHERE session_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?
            .try_get::<i64, _>("c")?;
        let result = sqlx::query("DELETE FROM input_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("input session {id}")));
        }
        Ok(events as u64)
    }
}

fn kind_str(kind: InputEventKind) -> &'static str {
    match kind {
        InputEventKind::KeyPress => "key_press",
        InputEventKind::KeyRelease => "key_release",
        InputEventKind::MouseDown => "mouse_down",
        InputEventKind::MouseUp => "mouse_up",
        InputEventKind::MouseMoveSampled => "mouse_move_sampled",
        InputEventKind::Scroll => "scroll",
    }
}

fn kind_parse(s: &str) -> InputEventKind {
    match s {
        "key_release" => InputEventKind::KeyRelease,
        "mouse_down" => InputEventKind::MouseDown,
        "mouse_up" => InputEventKind::MouseUp,
        "scroll" => InputEventKind::Scroll,
        "mouse_move_sampled" => InputEventKind::MouseMoveSampled,
        _ => InputEventKind::KeyPress,
    }
}

/// Minimal dependency-free v4 UUID generator (avoids pulling in the `uuid`
/// crate for this internal-id-only crate).
pub fn uuid_v4() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordingMode;

    async fn open_test_store() -> MetadataStore {
        let tmp = tempfile::tempdir().unwrap();
        MetadataStore::open(&tmp.path().join("test.db"))
            .await
            .unwrap()
    }

    fn sample_recording(id: &str) -> Recording {
        let now = Utc::now();
        Recording {
            id: id.to_string(),
            device_name: "monitor_0".to_string(),
            start_time: now,
            end_time: now,
            frame_count: 0,
            fps: 0.0,
            duration_seconds: 0.0,
            file_path: None,
            audio_source_tag: AudioSourceTag::None,
            mode: RecordingMode::Fullscreen,
            target_display_id: None,
            target_window_title: None,
            region_rect: None,
            app_name: None,
            content_summary: None,
            content_tags: vec![],
            user_tags: vec![],
            analysis_state: AnalysisState::Pending,
        }
    }

    #[tokio::test]
    async fn put_and_get_recording_round_trips() {
        let store = open_test_store().await;
        let rec = sample_recording("rec-1");
        store.put_recording(&rec).await.unwrap();
        let loaded = store.get_recording("rec-1").await.unwrap();
        assert_eq!(loaded.device_name, "monitor_0");
        assert_eq!(loaded.analysis_state, AnalysisState::Pending);
    }

    #[tokio::test]
    async fn delete_recording_cascades_frame_artifacts() {
        let store = open_test_store().await;
        let rec = sample_recording("rec-2");
        store.put_recording(&rec).await.unwrap();
        let artifact = FrameArtifact {
            id: "fa-1".into(),
            recording_id: "rec-2".into(),
            t_offset_seconds: 1.0,
            ocr_text: Some("hello".into()),
            vision_description: None,
            embedding_ref: Some("emb-1".into()),
            created_at: Utc::now(),
        };
        store
            .put_frame_artifacts("rec-2", &[artifact])
            .await
            .unwrap();
        store.delete_recording("rec-2").await.unwrap();
        let artifacts = store.list_frame_artifacts("rec-2").await.unwrap();
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn chat_ordinals_are_contiguous() {
        let store = open_test_store().await;
        let thread = store.chat_thread_create("t1").await.unwrap();
        let m1 = store
            .chat_message_append(&thread.id, ChatRole::User, "hi")
            .await
            .unwrap();
        let m2 = store
            .chat_message_append(&thread.id, ChatRole::Assistant, "hello")
            .await
            .unwrap();
        assert_eq!(m1.ordinal, 1);
        assert_eq!(m2.ordinal, 2);
    }

    #[tokio::test]
    async fn update_recording_only_touches_patched_fields() {
        let store = open_test_store().await;
        let rec = sample_recording("rec-3");
        store.put_recording(&rec).await.unwrap();
        store
            .update_recording(
                "rec-3",
                &RecordingPatch {
                    analysis_state: Some(AnalysisState::Done),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let loaded = store.get_recording("rec-3").await.unwrap();
        assert_eq!(loaded.analysis_state, AnalysisState::Done);
        assert_eq!(loaded.device_name, "monitor_0");
    }
}
