use std::num::NonZeroUsize;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{Stream, StreamExt};
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    ChatChunk, ChatMessage, ChatRequest, ModelCatalogEntry, PullProgress,
};

const EMBEDDING_CACHE_CAPACITY: usize = 512;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type EmbeddingCache = Mutex<LruCache<(String, String), Vec<f32>>>;

/// Thin HTTP client over a local model runtime (chat, vision, embedding,
/// and model-management endpoints). Every call maps connection and
/// timeout failures to `Error::RuntimeUnavailable` rather than surfacing
/// the raw transport error.
pub struct RuntimeClient {
    client: reqwest::Client,
    base: Url,
    embedding_cache: EmbeddingCache,
}

impl RuntimeClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base,
            embedding_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(EMBEDDING_CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
        })
    }

    pub async fn chat(&self, messages: Vec<ChatMessage>, model: &str) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
        };
        let chunk: ChatChunk = self.post_json("/api/chat", &request).await?;
        Ok(chunk.message.content)
    }

    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
    ) -> Result<impl Stream<Item = Result<String>>> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: true,
        };
        let response = self.post_raw("/api/chat", &request).await?;
        Ok(ndjson_stream::<ChatChunk>(response).map(|item| item.map(|chunk| chunk.message.content)))
    }

    pub async fn describe_image(&self, image_bytes: &[u8], model: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "images": [BASE64.encode(image_bytes)],
            "stream": false,
        });
        let value: serde_json::Value = self.post_json("/api/generate", &body).await?;
        value
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::RuntimeError("model runtime response missing 'response' field".into()))
    }

    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let key = (model.to_string(), hash_text(text));
        if let Some(cached) = self.embedding_cache.lock().get(&key) {
            return Ok(cached.clone());
        }

        let body = serde_json::json!({ "model": model, "input": text });
        let value: serde_json::Value = self.post_json("/api/embed", &body).await?;
        let embedding = value
            .get("embeddings")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_array())
            .map(|floats| {
                floats
                    .iter()
                    .filter_map(|f| f.as_f64())
                    .map(|f| f as f32)
                    .collect::<Vec<f32>>()
            })
            .ok_or_else(|| Error::RuntimeError("model runtime response missing embedding".into()))?;

        self.embedding_cache.lock().put(key, embedding.clone());
        Ok(embedding)
    }

    pub async fn catalog(&self) -> Result<Vec<ModelCatalogEntry>> {
        #[derive(serde::Deserialize)]
        struct Catalog {
            models: Vec<ModelCatalogEntry>,
        }
        let catalog: Catalog = self.get_json("/api/tags").await?;
        Ok(catalog.models)
    }

    pub async fn ensure_model(&self, name: &str) -> Result<impl Stream<Item = Result<PullProgress>>> {
        let body = serde_json::json!({ "name": name, "stream": true });
        let response = self.post_raw("/api/pull", &body).await?;
        Ok(ndjson_stream::<PullProgress>(response))
    }

    async fn post_json<Req, Res>(&self, path: &str, body: &Req) -> Result<Res>
    where
        Req: Serialize + ?Sized,
        Res: serde::de::DeserializeOwned,
    {
        let response = self.post_raw(path, body).await?;
        self.parse_response(response).await
    }

    async fn get_json<Res>(&self, path: &str) -> Result<Res>
    where
        Res: serde::de::DeserializeOwned,
    {
        let url = self.base.join(path).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        debug!(%url, "outgoing model runtime request");
        let response = self.client.get(url).send().await?;
        self.parse_response(response).await
    }

    async fn post_raw<Req>(&self, path: &str, body: &Req) -> Result<reqwest::Response>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.base.join(path).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        debug!(%url, "outgoing model runtime request");
        let response = self.client.post(url).json(body).send().await?;
        if let Err(err) = response.error_for_status_ref() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %truncate(&text, 2048), "model runtime error response");
            return Err(err.into());
        }
        Ok(response)
    }

    async fn parse_response<Res>(&self, response: reqwest::Response) -> Result<Res>
    where
        Res: serde::de::DeserializeOwned,
    {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::RuntimeError(e.to_string()))
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let cut = max_len.saturating_sub(3);
    let boundary = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= cut)
        .last()
        .unwrap_or(0);
    format!("{}...", &s[..boundary])
}

/// Decodes a newline-delimited JSON response body into a stream of `T`,
/// matching the streaming protocol used by `/api/chat` and `/api/pull`.
fn ndjson_stream<T>(response: reqwest::Response) -> impl Stream<Item = Result<T>>
where
    T: serde::de::DeserializeOwned,
{
    futures::stream::unfold(
        (response, String::new(), false),
        |(mut response, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    return match serde_json::from_str::<T>(&line) {
                        Ok(value) => Some((Ok(value), (response, buffer, false))),
                        Err(e) => Some((Err(Error::RuntimeError(e.to_string())), (response, buffer, true))),
                    };
                }
                match response.chunk().await {
                    Ok(Some(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Ok(None) => {
                        let trimmed = buffer.trim().to_string();
                        if trimmed.is_empty() {
                            return None;
                        }
                        return match serde_json::from_str::<T>(&trimmed) {
                            Ok(value) => Some((Ok(value), (response, String::new(), true))),
                            Err(e) => Some((Err(Error::RuntimeError(e.to_string())), (response, String::new(), true))),
                        };
                    }
                    Err(e) => return Some((Err(e.into()), (response, buffer, true))),
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_text_is_stable() {
        assert_eq!(hash_text("hello"), hash_text("hello"));
        assert_ne!(hash_text("hello"), hash_text("world"));
    }

    #[test]
    fn truncate_respects_max_len() {
        let long = "a".repeat(100);
        assert!(truncate(&long, 10).len() <= 13);
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn client_rejects_invalid_base_url() {
        assert!(RuntimeClient::new("not a url").is_err());
    }
}
