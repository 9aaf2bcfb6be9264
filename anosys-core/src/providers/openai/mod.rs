use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::{AnosysError, CoreResult};
use crate::http_client::{HttpClient, SseStream};
use crate::model::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, EmbeddingRequest,
    EmbeddingResponse, ImageRequest, ImageResponse,
};
use crate::provider::{AiClient, ChatOutput};
use crate::stream::ChunkStream;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const PROVIDER: &str = "openai";

/// OpenAI REST client for the three instrumented operations.
#[derive(Debug, Clone)]
pub struct OpenAI {
    http: HttpClient,
    base: String,
    org: Option<String>,
    api_key: SecretString,
}

impl OpenAI {
    pub fn new(api_key: SecretString, base: impl Into<String>) -> CoreResult<Self> {
        Ok(Self {
            http: HttpClient::new_default()?.with_provider(PROVIDER),
            base: base.into().trim_end_matches('/').to_string(),
            org: None,
            api_key,
        })
    }

    /// `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional).
    pub fn from_env() -> CoreResult<Self> {
        let key = std::env::var(ENV_OPENAI_API_KEY)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AnosysError::Validation(format!("{ENV_OPENAI_API_KEY} is not set")))?;
        let base = std::env::var(ENV_OPENAI_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::new(SecretString::from(key), base)
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAI::new(SecretString::from("test-key"), server_base).unwrap()
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        h
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> CoreResult<R>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}{path}", self.base);
        let (resp, upstream_id, latency_ms) = self.http.post_json::<_, R>(&url, body, &hdrs).await?;
        tracing::debug!(path, upstream_id = ?upstream_id, latency_ms, "openai call completed");
        Ok(resp)
    }
}

#[async_trait]
impl AiClient for OpenAI {
    fn system(&self) -> &str {
        PROVIDER
    }

    async fn create_chat_completion(&self, req: ChatCompletionRequest) -> CoreResult<ChatOutput> {
        if !req.is_streaming() {
            let completion: ChatCompletion = self.post("/v1/chat/completions", &req).await?;
            return Ok(ChatOutput::Complete(completion));
        }
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}/v1/chat/completions", self.base);
        let lines = self.http.post_sse_lines(&url, &req, &hdrs).await?;
        Ok(ChatOutput::Stream(chunk_stream(lines)))
    }

    async fn create_embedding(&self, req: EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
        self.post("/v1/embeddings", &req).await
    }

    async fn generate_image(&self, req: ImageRequest) -> CoreResult<ImageResponse> {
        self.post("/v1/images/generations", &req).await
    }
}

#[derive(Debug)]
enum SseEvent {
    Chunk(Box<ChatCompletionChunk>),
    Done,
    Skip,
}

/// Chat chunks from SSE lines. Ends at `[DONE]`, at end of body, or after the first error.
fn chunk_stream(lines: SseStream) -> ChunkStream {
    futures::stream::unfold(Some(lines), |state| async move {
        let mut lines = state?;
        loop {
            match lines.next().await {
                None => return None,
                Some(Err(e)) => return Some((Err(e), None)),
                Some(Ok(l)) => match parse_sse_line(&l.line) {
                    Ok(SseEvent::Chunk(c)) => return Some((Ok(*c), Some(lines))),
                    Ok(SseEvent::Done) => return None,
                    Ok(SseEvent::Skip) => continue,
                    Err(e) => return Some((Err(e), None)),
                },
            }
        }
    })
    .boxed()
}

fn parse_sse_line(line: &str) -> CoreResult<SseEvent> {
    // blank separators, comments, `event:` and `id:` fields carry nothing we use
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim_start();
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let value: Value = serde_json::from_str(data).map_err(|e| stream_error(format!("bad chunk: {e}")))?;
    if let Some(err) = value.get("error") {
        let code = err
            .get("code")
            .and_then(Value::as_str)
            .or_else(|| err.get("type").and_then(Value::as_str))
            .unwrap_or("stream")
            .to_string();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("stream error")
            .to_string();
        return Err(AnosysError::ProviderError {
            provider: PROVIDER.into(),
            code,
            message,
        });
    }
    let chunk: ChatCompletionChunk =
        serde_json::from_value(value).map_err(|e| stream_error(format!("bad chunk: {e}")))?;
    Ok(SseEvent::Chunk(Box::new(chunk)))
}

fn stream_error(message: String) -> AnosysError {
    AnosysError::ProviderError {
        provider: PROVIDER.into(),
        code: "stream".into(),
        message,
    }
}
