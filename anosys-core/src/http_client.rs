use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{AnosysError, CoreResult};

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = std::pin::Pin<
    Box<dyn futures_util::stream::Stream<Item = CoreResult<SseLine>> + Send>,
>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
///
/// `provider` labels the errors this client produces (`RateLimited { provider }` etc.).
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    provider: String,
}

impl HttpClient {
    /// Client for provider calls: 5s connect, 60s overall.
    pub fn new_default() -> CoreResult<Self> {
        Self::build(Duration::from_secs(5), Duration::from_secs(60))
    }

    /// Client for collector traffic, bounded by the configured timeouts.
    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        Self::build(
            Duration::from_millis(cfg.connect_timeout_ms),
            Duration::from_millis(cfg.timeout_ms),
        )
    }

    fn build(connect: Duration, total: Duration) -> CoreResult<Self> {
        let inner = Client::builder()
            .connect_timeout(connect)
            .timeout(total)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| AnosysError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("anosys/", env!("CARGO_PKG_VERSION")).to_string(),
            provider: "http".to_string(),
        })
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// POST JSON, decode a JSON response. Returns the body, the upstream
    /// request id if one was sent back, and the latency in milliseconds.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|_e| self.unavailable())?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let headers = resp.headers().clone();
        let upstream_id = extract_request_id(&headers);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(&self.provider, status, ra, &text));
        }

        let parsed = resp
            .json::<R>()
            .await
            .map_err(|e| AnosysError::ProviderError {
                provider: self.provider.clone(),
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })?;
        Ok((parsed, upstream_id, latency))
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one raw line (trim not applied) from the SSE channel.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|_| self.unavailable())?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(&self.provider, status, ra, &body));
        }

        // Stream body as bytes and split on '\n'
        let byte_stream = resp.bytes_stream();
        let line_stream = LineStream::new(Box::pin(byte_stream), self.provider.clone());
        Ok(Box::pin(line_stream))
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> CoreResult<R> {
        let resp = self
            .inner
            .get(url)
            .query(query)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|_e| self.unavailable())?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(&self.provider, status, ra, &text));
        }

        resp.json::<R>().await.map_err(|e| AnosysError::ProviderError {
            provider: self.provider.clone(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }

    /// POST JSON to the collector and discard the response body.
    /// Any network failure or non-2xx status is a `Transport` error.
    pub async fn post_record<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        bearer: Option<&str>,
    ) -> CoreResult<()> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| AnosysError::Transport {
            status: None,
            message: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AnosysError::Transport {
                status: Some(status.as_u16()),
                message: truncate(&text, 300),
            });
        }
        Ok(())
    }

    fn unavailable(&self) -> AnosysError {
        AnosysError::ProviderUnavailable {
            provider: self.provider.clone(),
        }
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "openai-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

pub(crate) fn map_http_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> AnosysError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AnosysError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => AnosysError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => AnosysError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

/// Cut to at most `max` chars, marking the cut with `...`.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut t = s[..idx].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
struct LineStream {
    inner: std::pin::Pin<
        Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buf: String,
    flushed_tail: bool,
    provider: String,
}

impl LineStream {
    fn new(
        inner: std::pin::Pin<
            Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
        >,
        provider: String,
    ) -> Self {
        Self {
            inner,
            buf: String::new(),
            flushed_tail: false,
            provider,
        }
    }
}

impl futures_util::stream::Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            if let Some(idx) = self.buf.find('\n') {
                let mut line = self.buf.drain(..=idx).collect::<String>();
                if line.ends_with("\r\n") {
                    line.truncate(line.len() - 2);
                } else {
                    line.truncate(line.len() - 1);
                }
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let s = String::from_utf8_lossy(&chunk);
                    self.buf.push_str(&s);
                    continue;
                }
                Poll::Ready(Some(Err(_e))) => {
                    return Poll::Ready(Some(Err(AnosysError::ProviderUnavailable {
                        provider: self.provider.clone(),
                    })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let line = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    } else {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
