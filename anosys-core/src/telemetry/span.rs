use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::keys::{EVENT_EXCEPTION, EXCEPTION_MESSAGE, EXCEPTION_STACKTRACE, EXCEPTION_TYPE};

/// Trace/span identity, hex encoded like OpenTelemetry's text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
}

impl SpanContext {
    /// Fresh root context: new 32-hex trace id and 16-hex span id.
    pub fn new_root() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            trace_state: None,
        }
    }

    /// Child of `parent`: same trace, new span id.
    pub fn child_of(parent: &SpanContext) -> Self {
        Self {
            trace_id: parent.trace_id.clone(),
            span_id: new_span_id(),
            trace_state: parent.trace_state.clone(),
        }
    }
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Internal,
    Client,
}

impl SpanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Client => "client",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status_code", rename_all = "lowercase")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { description: String },
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

/// One intercepted call: identity, timing, status, attributes and events.
/// Lives only until it is converted into a field record and sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub context: SpanContext,
    pub parent_id: Option<String>,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub attributes: Map<String, Value>,
    pub events: Vec<SpanEvent>,
}

impl SpanRecord {
    /// Open a span now. With a parent, the span joins the parent's trace.
    pub fn start(name: impl Into<String>, kind: SpanKind, parent: Option<&SpanContext>) -> Self {
        let (context, parent_id) = match parent {
            Some(p) => (SpanContext::child_of(p), Some(p.span_id.clone())),
            None => (SpanContext::new_root(), None),
        };
        Self {
            name: name.into(),
            context,
            parent_id,
            kind,
            start_time: Utc::now(),
            end_time: None,
            status: SpanStatus::Unset,
            attributes: Map::new(),
            events: Vec::new(),
        }
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if !value.is_null() {
            self.attributes.insert(key.to_string(), value);
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Map<String, Value>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    /// Record an `exception` event and mark the span as failed.
    pub fn record_error<E>(&mut self, kind: &str, err: &E)
    where
        E: std::error::Error + ?Sized,
    {
        let message = err.to_string();
        let mut attrs = Map::new();
        attrs.insert(EXCEPTION_TYPE.into(), Value::String(kind.to_string()));
        attrs.insert(EXCEPTION_MESSAGE.into(), Value::String(message.clone()));
        attrs.insert(
            EXCEPTION_STACKTRACE.into(),
            Value::String(error_chain(err)),
        );
        self.add_event(EVENT_EXCEPTION, attrs);
        self.status = SpanStatus::Error {
            description: message,
        };
    }

    pub fn set_ok(&mut self) {
        self.status = SpanStatus::Ok;
    }

    /// Stamp the end time. Ending twice keeps the first end time.
    pub fn end(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// `Display` of the error followed by each `source()`, one per line.
pub fn error_chain<E>(err: &E) -> String
where
    E: std::error::Error + ?Sized,
{
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(src) = cur {
        out.push_str("\ncaused by: ");
        out.push_str(&src.to_string());
        cur = src.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnosysError;

    #[test]
    fn ids_have_otel_lengths() {
        let ctx = SpanContext::new_root();
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.trace_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn child_span_shares_trace_and_points_at_parent() {
        let parent = SpanContext::new_root();
        let span = SpanRecord::start("child", SpanKind::Client, Some(&parent));
        assert_eq!(span.context.trace_id, parent.trace_id);
        assert_ne!(span.context.span_id, parent.span_id);
        assert_eq!(span.parent_id.as_deref(), Some(parent.span_id.as_str()));
    }

    #[test]
    fn record_error_adds_exception_event_with_chain() {
        let mut span = SpanRecord::start("op", SpanKind::Client, None);
        let io = std::io::Error::other("disk gone");
        let err = AnosysError::Other(anyhow::Error::new(io).context("while saving"));
        span.record_error(err.kind(), &err);
        assert_eq!(span.status.as_str(), "error");
        let ev = &span.events[0];
        assert_eq!(ev.name, EVENT_EXCEPTION);
        assert_eq!(ev.attributes[EXCEPTION_TYPE], "other");
        assert_eq!(ev.attributes[EXCEPTION_MESSAGE], "while saving");
        let stack = ev.attributes[EXCEPTION_STACKTRACE].as_str().unwrap();
        assert!(stack.contains("caused by: disk gone"), "{stack}");
    }

    #[test]
    fn null_attributes_are_not_stored() {
        let mut span = SpanRecord::start("op", SpanKind::Internal, None);
        span.set_attribute("a", Value::Null);
        span.set_attribute("b", 3);
        assert!(span.attribute("a").is_none());
        assert_eq!(span.attribute("b"), Some(&Value::from(3)));
    }

    #[test]
    fn end_is_idempotent() {
        let mut span = SpanRecord::start("op", SpanKind::Internal, None);
        span.end();
        let first = span.end_time;
        span.end();
        assert_eq!(span.end_time, first);
        assert!(span.duration_ms().unwrap() >= 0);
    }
}
