//! Span-producing decorator over [`AiClient`].
//!
//! `Instrumented<C>` is itself an `AiClient`: each call opens a span, records
//! the request, delegates, records the result or the error, and hands the
//! finished span to the exporter. Results and errors reach the caller
//! unchanged. Streams are wrapped in [`TracedStream`], which exports once the
//! stream is exhausted or fails.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tracing::Instrument;

use crate::coerce::to_field_value;
use crate::error::CoreResult;
use crate::model::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, EmbeddingRequest,
    EmbeddingResponse, ImageRequest, ImageResponse,
};
use crate::provider::{AiClient, ChatOutput};
use crate::stream::{ChunkStream, aggregate};
use crate::telemetry::keys::*;
use crate::telemetry::{Exporter, SpanContext, SpanKind, SpanRecord};

pub const SPAN_CHAT: &str = "openai.chat.completions.create";
pub const SPAN_EMBEDDINGS: &str = "openai.embeddings.create";
pub const SPAN_IMAGES: &str = "openai.images.generate";

/// Exception type recorded for streams dropped before exhaustion.
pub const ABANDONED: &str = "abandoned";

#[derive(Debug, thiserror::Error)]
#[error("stream abandoned before completion")]
struct Abandoned;

pub struct Instrumented<C> {
    inner: C,
    exporter: Exporter,
    parent: Option<SpanContext>,
}

impl<C: AiClient> Instrumented<C> {
    pub fn new(inner: C, exporter: Exporter) -> Self {
        Self {
            inner,
            exporter,
            parent: None,
        }
    }

    /// Make every span produced by this client a child of `parent`.
    pub fn with_parent(mut self, parent: SpanContext) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    fn open(&self, name: &str, method: &str, operation: &str) -> SpanRecord {
        let mut span = SpanRecord::start(name, SpanKind::Client, self.parent.as_ref());
        span.set_attribute(ATTR_METHOD, method);
        span.set_attribute(GEN_AI_SYSTEM, self.inner.system());
        span.set_attribute(GEN_AI_OPERATION_NAME, operation);
        span
    }

    /// Record the outcome, end and submit the span, and give the outcome back.
    fn close<T>(
        &self,
        mut span: SpanRecord,
        local: &tracing::Span,
        result: CoreResult<T>,
        record: impl FnOnce(&mut SpanRecord, &T),
    ) -> CoreResult<T> {
        match &result {
            Ok(value) => {
                record(&mut span, value);
                span.set_ok();
            }
            Err(e) => span.record_error(e.kind(), e),
        }
        span.end();
        local.record("status", span.status.as_str());
        self.exporter.submit_span(&span);
        result
    }
}

fn local_span(span: &SpanRecord, model: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "anosys.call",
        method = %span.name,
        model = model.unwrap_or(""),
        trace_id = %span.context.trace_id,
        span_id = %span.context.span_id,
        status = tracing::field::Empty,
    )
}

fn record_chat_request(span: &mut SpanRecord, req: &ChatCompletionRequest) {
    span.set_attribute(GEN_AI_REQUEST_MODEL, req.model.as_str());
    span.set_attribute(GEN_AI_REQUEST_TEMPERATURE, req.temperature);
    span.set_attribute(GEN_AI_REQUEST_TOP_P, req.top_p);
    span.set_attribute(GEN_AI_REQUEST_MAX_TOKENS, req.max_tokens);
    span.set_attribute(GEN_AI_REQUEST_MESSAGES, to_field_value(&req.messages));
    span.set_attribute(ATTR_STREAMING, req.is_streaming());
    if let Some(tools) = &req.tools {
        span.set_attribute(ATTR_TOOLS, to_field_value(tools));
    }
    span.set_attribute(ATTR_TOOL_CHOICE, req.tool_choice.clone());
    span.set_attribute(ATTR_ARGUMENTS, to_field_value(req));
}

fn record_chat_result(span: &mut SpanRecord, completion: &ChatCompletion) {
    span.set_attribute(ATTR_RESULT, to_field_value(completion));
    span.set_attribute(GEN_AI_RESPONSE_MODEL, completion.model.clone());
    span.set_attribute(GEN_AI_RESPONSE_ID, completion.id.clone());
    let reasons = completion.finish_reasons();
    if !reasons.is_empty() {
        span.set_attribute(GEN_AI_RESPONSE_FINISH_REASONS, to_field_value(&reasons));
    }
    if let Some(usage) = completion.usage {
        span.set_attribute(GEN_AI_USAGE_INPUT_TOKENS, usage.prompt_tokens);
        span.set_attribute(GEN_AI_USAGE_OUTPUT_TOKENS, usage.completion_tokens);
        span.set_attribute(GEN_AI_USAGE_TOTAL_TOKENS, usage.total_tokens);
    }
}

#[async_trait]
impl<C: AiClient> AiClient for Instrumented<C> {
    fn system(&self) -> &str {
        self.inner.system()
    }

    async fn create_chat_completion(&self, req: ChatCompletionRequest) -> CoreResult<ChatOutput> {
        let mut span = self.open(SPAN_CHAT, "chat.completions.create", "chat");
        record_chat_request(&mut span, &req);
        let local = local_span(&span, Some(req.model.as_str()));

        let result = self
            .inner
            .create_chat_completion(req)
            .instrument(local.clone())
            .await;

        match result {
            Ok(ChatOutput::Stream(inner)) => {
                let traced: ChunkStream =
                    Box::pin(TracedStream::new(inner, span, self.exporter.clone(), local));
                Ok(ChatOutput::Stream(traced))
            }
            other => self.close(span, &local, other, |span, out| {
                if let ChatOutput::Complete(completion) = out {
                    record_chat_result(span, completion);
                }
            }),
        }
    }

    async fn create_embedding(&self, req: EmbeddingRequest) -> CoreResult<EmbeddingResponse> {
        let mut span = self.open(SPAN_EMBEDDINGS, "embeddings.create", "embeddings");
        span.set_attribute(GEN_AI_REQUEST_MODEL, req.model.as_str());
        span.set_attribute(ATTR_ARGUMENTS, to_field_value(&req));
        let local = local_span(&span, Some(req.model.as_str()));

        let result = self.inner.create_embedding(req).instrument(local.clone()).await;

        self.close(span, &local, result, |span, resp| {
            span.set_attribute(ATTR_RESULT, to_field_value(resp));
            span.set_attribute(GEN_AI_RESPONSE_MODEL, resp.model.clone());
            if let Some(usage) = &resp.usage {
                span.set_attribute(GEN_AI_USAGE_INPUT_TOKENS, usage.prompt_tokens);
                span.set_attribute(GEN_AI_USAGE_TOTAL_TOKENS, usage.total_tokens);
            }
        })
    }

    async fn generate_image(&self, req: ImageRequest) -> CoreResult<ImageResponse> {
        let mut span = self.open(SPAN_IMAGES, "images.generate", "image_generation");
        span.set_attribute(GEN_AI_REQUEST_MODEL, req.model.clone());
        span.set_attribute(ATTR_ARGUMENTS, to_field_value(&req));
        let local = local_span(&span, req.model.as_deref());

        let result = self.inner.generate_image(req).instrument(local.clone()).await;

        self.close(span, &local, result, |span, resp| {
            span.set_attribute(ATTR_RESULT, to_field_value(resp));
        })
    }
}

/// Pass-through chunk stream that exports its span when the stream ends.
///
/// Chunks are yielded as soon as they arrive; a clone of each is kept for
/// the aggregate. The span is exported exactly once: at exhaustion, at the
/// first error (which is still yielded, and ends the stream), or on drop
/// when abandoned-stream reporting is enabled.
pub struct TracedStream {
    inner: ChunkStream,
    span: Option<SpanRecord>,
    chunks: Vec<ChatCompletionChunk>,
    exporter: Exporter,
    local: tracing::Span,
}

impl TracedStream {
    fn new(inner: ChunkStream, span: SpanRecord, exporter: Exporter, local: tracing::Span) -> Self {
        Self {
            inner,
            span: Some(span),
            chunks: Vec::new(),
            exporter,
            local,
        }
    }

    fn finish(&mut self, outcome: Result<(), &dyn std::error::Error>, kind: &str) {
        let Some(mut span) = self.span.take() else {
            return;
        };
        if !self.chunks.is_empty() {
            record_chat_result(&mut span, &aggregate(&self.chunks));
        }
        span.set_attribute(ATTR_CHUNK_COUNT, self.chunks.len());
        match outcome {
            Ok(()) => span.set_ok(),
            Err(e) => span.record_error(kind, e),
        }
        span.end();
        self.local.record("status", span.status.as_str());
        self.exporter.submit_span(&span);
    }
}

impl Stream for TracedStream {
    type Item = CoreResult<ChatCompletionChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.span.is_none() {
            return Poll::Ready(None);
        }
        let local = this.local.clone();
        let _entered = local.enter();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.chunks.push(chunk.clone());
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let err: &dyn std::error::Error = &e;
                this.finish(Err(err), e.kind());
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(Ok(()), "");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TracedStream {
    fn drop(&mut self) {
        if self.span.is_none() {
            return;
        }
        if self.exporter.reports_abandoned_streams() {
            let err: &dyn std::error::Error = &Abandoned;
            self.finish(Err(err), ABANDONED);
        } else {
            tracing::debug!(
                chunks = self.chunks.len(),
                "stream dropped before completion; span not exported"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnosysError;
    use crate::model::{ChatMessage, EmbeddingInput};
    use crate::provider::testing::NullClient;
    use crate::registry::KeyRegistry;
    use crate::remap::WireRecord;
    use crate::telemetry::test_span::install_capture;
    use crate::transport::testing::{FailingTransport, RecordingTransport};
    use futures::StreamExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup(client: NullClient) -> (Instrumented<NullClient>, UnboundedReceiver<WireRecord>) {
        let (t, rx) = RecordingTransport::new();
        let exporter = Exporter::new(KeyRegistry::default(), Arc::new(t));
        (Instrumented::new(client, exporter), rx)
    }

    async fn next_record(rx: &mut UnboundedReceiver<WireRecord>) -> WireRecord {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("record within timeout")
            .expect("channel open")
    }

    async fn assert_no_record(rx: &mut UnboundedReceiver<WireRecord>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "unexpected telemetry record");
    }

    fn field<'a>(
        client: &Instrumented<NullClient>,
        wire: &'a WireRecord,
        name: &str,
    ) -> Option<&'a Value> {
        let key = client.exporter().registry().lookup(name)?;
        wire.get(&key)
    }

    fn hi() -> ChatCompletionRequest {
        let mut req = ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        req.temperature = Some(0.5);
        req
    }

    #[tokio::test]
    async fn chat_call_exports_one_span_and_returns_result_unchanged() {
        let (client, mut rx) = setup(NullClient::default());
        let direct = NullClient::default()
            .create_chat_completion(hi())
            .await
            .unwrap()
            .into_complete()
            .unwrap();
        let out = client
            .create_chat_completion(hi())
            .await
            .unwrap()
            .into_complete()
            .unwrap();
        assert_eq!(out, direct);

        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("otel_name"), Some(&json!(SPAN_CHAT)));
        assert_eq!(wire.get("otel_kind"), Some(&json!("client")));
        assert_eq!(wire.get("cvs10"), Some(&json!("null")));
        assert_eq!(wire.get("cvs11"), Some(&json!("chat")));
        assert_eq!(wire.get("cvs12"), Some(&json!("gpt-4o-mini")));
        assert_eq!(wire.get("cvs16"), Some(&json!("null-1")));
        assert_eq!(wire.get("otel_status_message"), Some(&json!("null-1")));
        assert_eq!(wire.get("cvs17"), Some(&json!(r#"["stop"]"#)));
        assert_eq!(wire.get("cvs18"), Some(&json!("ok")));
        assert_eq!(
            field(&client, &wire, GEN_AI_USAGE_TOTAL_TOKENS),
            Some(&json!(3))
        );
        assert_eq!(
            field(&client, &wire, GEN_AI_REQUEST_TEMPERATURE),
            Some(&json!(0.5))
        );
        let output = wire.get("cvs6").and_then(Value::as_str).unwrap();
        assert!(output.contains("echo: hi"), "{output}");
        assert_no_record(&mut rx).await;
    }

    #[tokio::test]
    async fn provider_error_is_recorded_and_returned_unchanged() {
        let (client, mut rx) = setup(NullClient {
            unavailable: true,
            ..Default::default()
        });
        let err = client.create_chat_completion(hi()).await.unwrap_err();
        assert!(matches!(&err, AnosysError::ProviderUnavailable { provider } if provider == "null"));

        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("cvs18"), Some(&json!("error")));
        assert_eq!(wire.get("cvs19"), Some(&json!("provider_unavailable")));
        assert_eq!(wire.get("cvs20"), Some(&json!("provider unavailable: null")));
        assert!(!wire.contains_key("cvs2"));
        assert_no_record(&mut rx).await;
    }

    #[tokio::test]
    async fn failing_collector_never_reaches_the_caller() {
        let transport = Arc::new(FailingTransport::default());
        let exporter = Exporter::new(KeyRegistry::default(), transport.clone());
        let client = Instrumented::new(NullClient::default(), exporter);
        let out = client.create_chat_completion(hi()).await.unwrap();
        assert!(out.into_complete().is_some());
        assert!(client.exporter().flush(Duration::from_secs(5)).await);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn failed_call_with_failing_collector_attempts_one_send() {
        let transport = Arc::new(FailingTransport::default());
        let exporter = Exporter::new(KeyRegistry::default(), transport.clone());
        let client = Instrumented::new(
            NullClient {
                unavailable: true,
                ..Default::default()
            },
            exporter,
        );
        let err = client.create_chat_completion(hi()).await.unwrap_err();
        assert!(matches!(&err, AnosysError::ProviderUnavailable { provider } if provider == "null"));
        assert!(client.exporter().flush(Duration::from_secs(5)).await);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn tools_reach_the_wire_as_llm_tools() {
        let (client, mut rx) = setup(NullClient::default());
        let mut req = hi();
        req.tools = Some(vec![json!({
            "type": "function",
            "function": {"name": "get_weather", "parameters": {"type": "object"}}
        })]);
        req.tool_choice = Some(json!("auto"));
        client.create_chat_completion(req).await.unwrap();

        let wire = next_record(&mut rx).await;
        let tools = wire.get("cvs4").and_then(Value::as_str).unwrap();
        assert!(tools.contains("get_weather"), "{tools}");
        assert_eq!(wire.get("cvs3"), Some(&json!("auto")));
        let input = wire.get("cvs1").and_then(Value::as_str).unwrap();
        assert!(input.contains(r#""tool_choice":"auto""#), "{input}");
    }

    #[tokio::test]
    async fn stream_forwards_chunks_and_exports_aggregate_on_exhaustion() {
        let (client, mut rx) = setup(NullClient::default());
        let direct: Vec<_> = NullClient::default()
            .create_chat_completion(hi().streaming())
            .await
            .unwrap()
            .into_stream()
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        let mut stream = client
            .create_chat_completion(hi().streaming())
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, direct[0]);
        // nothing exported mid-stream
        assert!(rx.try_recv().is_err());
        let rest: Vec<_> = stream.by_ref().map(|c| c.unwrap()).collect().await;
        assert_eq!(rest.len(), direct.len() - 1);
        assert!(stream.next().await.is_none());

        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("cvs18"), Some(&json!("ok")));
        let output = wire.get("cvs6").and_then(Value::as_str).unwrap();
        assert!(output.contains("echo: hi"), "{output}");
        assert_eq!(
            field(&client, &wire, ATTR_CHUNK_COUNT),
            Some(&json!(direct.len()))
        );
        assert_eq!(field(&client, &wire, ATTR_STREAMING), Some(&json!(true)));
        assert_eq!(
            field(&client, &wire, GEN_AI_USAGE_TOTAL_TOKENS),
            Some(&json!(3))
        );
        assert_no_record(&mut rx).await;
    }

    #[tokio::test]
    async fn stream_error_is_yielded_once_and_exported() {
        let (client, mut rx) = setup(NullClient {
            fail_stream_after: Some(1),
            ..Default::default()
        });
        let items: Vec<_> = client
            .create_chat_completion(hi().streaming())
            .await
            .unwrap()
            .into_stream()
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(AnosysError::ProviderUnavailable { .. })
        ));

        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("cvs18"), Some(&json!("error")));
        assert_eq!(wire.get("cvs19"), Some(&json!("provider_unavailable")));
        assert_eq!(field(&client, &wire, ATTR_CHUNK_COUNT), Some(&json!(1)));
    }

    #[tokio::test]
    async fn abandoned_stream_is_not_exported_by_default() {
        let (client, mut rx) = setup(NullClient::default());
        let mut stream = client
            .create_chat_completion(hi().streaming())
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);
        assert_no_record(&mut rx).await;
    }

    #[tokio::test]
    async fn abandoned_stream_is_exported_when_enabled() {
        let (t, mut rx) = RecordingTransport::new();
        let exporter = Exporter::new(KeyRegistry::default(), Arc::new(t))
            .with_abandoned_stream_reports(true);
        let client = Instrumented::new(NullClient::default(), exporter);
        let mut stream = client
            .create_chat_completion(hi().streaming())
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);

        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("cvs18"), Some(&json!("error")));
        assert_eq!(wire.get("cvs19"), Some(&json!(ABANDONED)));
        assert_eq!(
            wire.get("cvs20"),
            Some(&json!("stream abandoned before completion"))
        );
    }

    #[tokio::test]
    async fn parent_context_links_spans_into_callers_trace() {
        let parent = SpanContext::new_root();
        let (client, mut rx) = setup(NullClient::default());
        let client = client.with_parent(parent.clone());
        client.create_chat_completion(hi()).await.unwrap();
        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("otel_trace_id"), Some(&json!(parent.trace_id)));
        assert_eq!(wire.get("otel_parent_span_id"), Some(&json!(parent.span_id)));
    }

    #[tokio::test]
    async fn embedding_and_image_calls_are_traced() {
        let (client, mut rx) = setup(NullClient::default());
        let emb = client
            .create_embedding(EmbeddingRequest {
                model: "text-embedding-3-small".into(),
                input: EmbeddingInput::Many(vec!["a".into(), "b".into()]),
                dimensions: None,
                user: None,
            })
            .await
            .unwrap();
        assert_eq!(emb.data.len(), 2);
        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("otel_name"), Some(&json!(SPAN_EMBEDDINGS)));
        assert_eq!(wire.get("cvs11"), Some(&json!("embeddings")));
        assert_eq!(
            field(&client, &wire, GEN_AI_USAGE_INPUT_TOKENS),
            Some(&json!(2))
        );

        client
            .generate_image(ImageRequest {
                prompt: "a lighthouse".into(),
                model: None,
                n: Some(1),
                size: None,
                quality: None,
                response_format: None,
            })
            .await
            .unwrap();
        let wire = next_record(&mut rx).await;
        assert_eq!(wire.get("otel_name"), Some(&json!(SPAN_IMAGES)));
        assert!(!wire.contains_key("cvs12"));
        let input = wire.get("cvs1").and_then(Value::as_str).unwrap();
        assert!(input.contains("a lighthouse"));
    }

    #[tokio::test]
    async fn local_tracing_span_carries_status() {
        let (store, _guard) = install_capture();
        let (client, _rx) = setup(NullClient::default());
        client.create_chat_completion(hi()).await.unwrap();

        let spans = store.named("anosys.call");
        assert_eq!(spans.len(), 1);
        let fields = &spans[0].fields;
        assert_eq!(fields.get("method").map(String::as_str), Some(SPAN_CHAT));
        assert_eq!(fields.get("model").map(String::as_str), Some("gpt-4o-mini"));
        assert_eq!(fields.get("status").map(String::as_str), Some("ok"));
    }
}
