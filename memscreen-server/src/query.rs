//! Query Engine (C11): hybrid retrieval over C2+C3, and chat context assembly
//! on top of it. Grounded in the prompt-building shape of the teacher's
//! `live_summary`/`apple_summary` LLM calls, generalized to a proper
//! retrieval-augmented chat loop.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use memscreen_core::{Config, Error, Result};
use memscreen_db::models::{ChatRole, FrameArtifact, Recording};
use memscreen_db::{MetadataStore, VectorFilter, VectorStore};
use memscreen_runtime::RuntimeClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Number of prior messages (excluding the system prompt) folded into a
/// chat request's context window (§4.11).
const CHAT_HISTORY_WINDOW: usize = 12;
/// Number of retrieved snippets folded into a chat request's context.
const CHAT_RETRIEVAL_TOP_K: usize = 6;
/// Reciprocal-rank-fusion constant from spec.md §4.11's literal formula.
const RRF_K: f64 = 60.0;

pub struct QueryEngine {
    config: Config,
    db: Arc<MetadataStore>,
    vectors: Arc<VectorStore>,
    runtime: Arc<RuntimeClient>,
}

#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub artifact: FrameArtifact,
    pub recording: Recording,
    pub snippet: String,
    pub score: f64,
}

impl QueryEngine {
    pub fn new(
        config: Config,
        db: Arc<MetadataStore>,
        vectors: Arc<VectorStore>,
        runtime: Arc<RuntimeClient>,
    ) -> Self {
        Self {
            config,
            db,
            vectors,
            runtime,
        }
    }

    /// Embeds `q` and fuses a C3 vector search (`k' = 4k`) with a C2 keyword
    /// search (top `k`) via reciprocal-rank fusion, breaking ties by
    /// recency. Optionally scoped to a single recording.
    pub async fn retrieve(
        &self,
        q: &str,
        k: usize,
        recording_id: Option<&str>,
    ) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let k_prime = k.saturating_mul(4).max(k);

        let collection = memscreen_db::collection_name_for_model(&self.config.embedding_model);
        let vector_ranked = match self.runtime.embed(q, &self.config.embedding_model).await {
            Ok(embedding) => {
                let filter = VectorFilter {
                    recording_id: recording_id.map(str::to_string),
                };
                match self.vectors.query(&collection, &embedding, k_prime, &filter).await {
                    Ok(hits) => hits.into_iter().map(|hit| hit.id).collect(),
                    Err(err) => {
                        warn!(error = %err, "vector search leg failed, continuing with keyword leg only");
                        Vec::new()
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "embedding the query failed, continuing with keyword leg only");
                Vec::new()
            }
        };

        let keyword_hits = self.db.keyword_search(q, k as i64).await.map_err(Error::from)?;
        let keyword_ranked: Vec<String> = keyword_hits
            .iter()
            .filter(|(artifact, _)| recording_id.map_or(true, |rid| artifact.recording_id == rid))
            .map(|(artifact, _)| artifact.id.clone())
            .collect();

        let mut fused: HashMap<String, f64> = HashMap::new();
        for (rank, id) in vector_ranked.iter().enumerate() {
            *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }
        for (rank, id) in keyword_ranked.iter().enumerate() {
            *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }

        let mut hydrated: Vec<RetrievalHit> = Vec::with_capacity(fused.len());
        for (artifact_id, score) in fused {
            let (artifact, recording) = match self.db.get_frame_artifact_with_recording(&artifact_id).await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, artifact_id, "dropping stale hit no longer backed by a frame artifact");
                    continue;
                }
            };
            let snippet = build_snippet(&artifact, &recording);
            hydrated.push(RetrievalHit {
                artifact,
                recording,
                snippet,
                score,
            });
        }

        hydrated.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.recording.start_time.cmp(&a.recording.start_time))
        });
        hydrated.truncate(k);
        Ok(hydrated)
    }

    /// Appends `user_message` to `thread_id`, streams the assistant reply
    /// over `chunks`, and appends the completed reply once the stream is
    /// exhausted. Dropping `cancel` mid-stream aborts the upstream call and
    /// leaves the thread without an assistant message (§4.11). `model`
    /// overrides `config.chat_model` when the caller has an active
    /// selection (§6 `/chat/model`).
    pub async fn chat(
        &self,
        thread_id: &str,
        user_message: &str,
        model: &str,
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.db
            .chat_message_append(thread_id, ChatRole::User, user_message)
            .await
            .map_err(Error::from)?;

        let history = self.db.chat_history(thread_id).await.map_err(Error::from)?;
        let retrieved = self.retrieve(user_message, CHAT_RETRIEVAL_TOP_K, None).await.unwrap_or_default();

        let messages = self.build_context(&history, &retrieved);

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled("chat stream cancelled before it started".into())),
            result = self.runtime.chat_stream(messages, &model) => result.map_err(Error::from)?,
        };
        tokio::pin!(stream);

        let mut full = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("chat stream cancelled by caller".into()));
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(chunk)) => {
                            full.push_str(&chunk);
                            if chunks.send(chunk).await.is_err() {
                                return Err(Error::Cancelled("chat stream cancelled: client disconnected".into()));
                            }
                        }
                        Some(Err(err)) => return Err(Error::from(err)),
                        None => break,
                    }
                }
            }
        }

        self.db
            .chat_message_append(thread_id, ChatRole::Assistant, &full)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    /// Non-streaming variant of [`chat`](Self::chat), used by `/chat`.
    pub async fn chat_once(&self, thread_id: &str, user_message: &str, model: &str) -> Result<String> {
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let this_thread = thread_id.to_string();
        let this_message = user_message.to_string();
        let this_model = model.to_string();
        let cancel_for_task = cancel.clone();

        let collected = tokio::spawn(async move {
            let mut full = String::new();
            while let Some(chunk) = rx.recv().await {
                full.push_str(&chunk);
            }
            full
        });

        let result = self.chat(&this_thread, &this_message, &this_model, tx, cancel_for_task).await;
        drop(cancel);
        let full = collected.await.map_err(|e| Error::Internal(e.to_string()))?;
        result.map(|()| full)
    }

    fn build_context(
        &self,
        history: &[memscreen_db::models::ChatMessage],
        retrieved: &[RetrievalHit],
    ) -> Vec<memscreen_runtime::ChatMessage> {
        let mut messages = vec![memscreen_runtime::ChatMessage {
            role: memscreen_runtime::ChatRole::System,
            content: system_prompt(retrieved),
        }];
        let start = history.len().saturating_sub(CHAT_HISTORY_WINDOW);
        for message in &history[start..] {
            messages.push(memscreen_runtime::ChatMessage {
                role: crate::models::role_for_wire(message.role),
                content: message.content.clone(),
            });
        }
        messages
    }
}

fn build_snippet(artifact: &FrameArtifact, recording: &Recording) -> String {
    let text = match (&artifact.ocr_text, &artifact.vision_description) {
        (Some(ocr), Some(vision)) => format!("{ocr}\n{vision}"),
        (Some(ocr), None) => ocr.clone(),
        (None, Some(vision)) => vision.clone(),
        (None, None) => String::new(),
    };
    format!(
        "[{} @ {:.1}s in recording {}] {}",
        recording.start_time.to_rfc3339(),
        artifact.t_offset_seconds,
        recording.id,
        text.chars().take(500).collect::<String>()
    )
}

fn system_prompt(retrieved: &[RetrievalHit]) -> String {
    let mut prompt = String::from(
        "You are MemScreen, a local assistant with recall over the user's recorded screen \
         activity. Answer using the retrieved context below when relevant; say so plainly \
         when nothing retrieved is relevant.",
    );
    if !retrieved.is_empty() {
        prompt.push_str("\n\nRetrieved context:\n");
        for hit in retrieved {
            prompt.push_str("- ");
            prompt.push_str(&hit.snippet);
            prompt.push('\n');
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact(id: &str, recording_id: &str) -> FrameArtifact {
        FrameArtifact {
            id: id.to_string(),
            recording_id: recording_id.to_string(),
            t_offset_seconds: 1.5,
            ocr_text: Some("invoice #4471 due friday".into()),
            vision_description: Some("a spreadsheet with a highlighted total row".into()),
            embedding_ref: Some(id.to_string()),
            created_at: chrono::Utc::now(),
        }
    }

    fn sample_recording(id: &str) -> Recording {
        Recording {
            id: id.to_string(),
            device_name: "monitor_primary".into(),
            start_time: chrono::Utc::now(),
            end_time: chrono::Utc::now(),
            frame_count: 10,
            fps: 1.0,
            duration_seconds: 10.0,
            file_path: Some("/tmp/rec.mp4".into()),
            audio_source_tag: memscreen_db::models::AudioSourceTag::None,
            mode: memscreen_db::models::RecordingMode::Fullscreen,
            target_display_id: None,
            target_window_title: None,
            region_rect: None,
            app_name: None,
            content_summary: None,
            content_tags: Vec::new(),
            user_tags: Vec::new(),
            analysis_state: memscreen_db::models::AnalysisState::Done,
        }
    }

    #[test]
    fn snippet_combines_ocr_and_vision() {
        let artifact = sample_artifact("fa-1", "rec-1");
        let recording = sample_recording("rec-1");
        let snippet = build_snippet(&artifact, &recording);
        assert!(snippet.contains("invoice #4471"));
        assert!(snippet.contains("spreadsheet"));
        assert!(snippet.contains("rec-1"));
    }

    #[test]
    fn system_prompt_omits_context_section_when_nothing_retrieved() {
        let prompt = system_prompt(&[]);
        assert!(!prompt.contains("Retrieved context"));
    }

    #[test]
    fn system_prompt_includes_each_snippet() {
        let artifact = sample_artifact("fa-1", "rec-1");
        let recording = sample_recording("rec-1");
        let hit = RetrievalHit {
            snippet: build_snippet(&artifact, &recording),
            artifact,
            recording,
            score: 0.5,
        };
        let prompt = system_prompt(&[hit]);
        assert!(prompt.contains("Retrieved context"));
        assert!(prompt.contains("invoice #4471"));
    }
}
