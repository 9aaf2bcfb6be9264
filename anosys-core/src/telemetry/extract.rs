//! Span → flat field record.

use serde_json::{Map, Value};

use super::keys::*;
use super::span::SpanRecord;
use crate::coerce::{normalize_json_text, to_field_value};
use crate::remap::FieldRecord;

/// Options that change what the extractor emits besides the span itself.
#[derive(Debug, Clone)]
pub struct ExtractOptions<'a> {
    /// Value of the `source` field.
    pub source: &'a str,
    /// Attach the whole span, serialized, as `raw`.
    pub include_raw: bool,
}

impl Default for ExtractOptions<'_> {
    fn default() -> Self {
        Self {
            source: DEFAULT_SPAN_SOURCE,
            include_raw: true,
        }
    }
}

/// Derive the field record for a completed span.
///
/// Absent data is emitted as `null` so the remapper decides what to drop;
/// every name used here is either seeded in the key table or minted on first use.
pub fn extract_span_info(span: &SpanRecord, opts: &ExtractOptions<'_>) -> FieldRecord {
    let mut rec = Map::new();
    let attr = |k: &str| span.attribute(k).cloned().unwrap_or(Value::Null);

    // identity and timing
    put(&mut rec, FIELD_NAME, span.name.clone());
    put(&mut rec, FIELD_TRACE_ID, span.context.trace_id.clone());
    put(&mut rec, FIELD_SPAN_ID, span.context.span_id.clone());
    put(&mut rec, FIELD_TRACE_STATE, span.context.trace_state.clone());
    put(&mut rec, FIELD_PARENT_ID, span.parent_id.clone());
    put(&mut rec, FIELD_START_TIME, span.start_time.to_rfc3339());
    put(&mut rec, FIELD_START_TIMESTAMP, span.start_time.timestamp());
    put(&mut rec, FIELD_END_TIME, span.end_time.map(|t| t.to_rfc3339()));
    put(&mut rec, FIELD_END_TIMESTAMP, span.end_time.map(|t| t.timestamp()));
    put(&mut rec, FIELD_DURATION_MS, span.duration_ms());
    put(&mut rec, FIELD_KIND, span.kind.as_str());
    put(&mut rec, FIELD_STATUS, span.status.as_str());

    // request
    put(&mut rec, GEN_AI_SYSTEM, attr(GEN_AI_SYSTEM));
    put(&mut rec, GEN_AI_OPERATION_NAME, attr(GEN_AI_OPERATION_NAME));
    put(&mut rec, GEN_AI_REQUEST_MODEL, attr(GEN_AI_REQUEST_MODEL));
    put(&mut rec, FIELD_LLM_MODEL_NAME, attr(GEN_AI_REQUEST_MODEL));
    put(&mut rec, GEN_AI_REQUEST_TEMPERATURE, attr(GEN_AI_REQUEST_TEMPERATURE));
    put(&mut rec, GEN_AI_REQUEST_TOP_P, attr(GEN_AI_REQUEST_TOP_P));
    put(&mut rec, GEN_AI_REQUEST_MAX_TOKENS, attr(GEN_AI_REQUEST_MAX_TOKENS));
    put(&mut rec, FIELD_LLM_INPUT_MESSAGES, json_text(attr(GEN_AI_REQUEST_MESSAGES)));
    put(&mut rec, FIELD_LLM_INVOCATION_PARAMETERS, invocation_parameters(span));
    put(&mut rec, FIELD_LLM_TOOLS, json_text(attr(ATTR_TOOLS)));
    put(&mut rec, FIELD_TOOL, json_text(attr(ATTR_TOOL_CHOICE)));
    put(&mut rec, FIELD_INPUT, json_text(attr(ATTR_ARGUMENTS)));

    // response
    let result = attr(ATTR_RESULT);
    put(&mut rec, FIELD_OUTPUT, json_text(result.clone()));
    put(&mut rec, GEN_AI_RESPONSE_MODEL, attr(GEN_AI_RESPONSE_MODEL));
    put(&mut rec, GEN_AI_RESPONSE_ID, attr(GEN_AI_RESPONSE_ID));
    put(&mut rec, FIELD_RESP_ID, attr(GEN_AI_RESPONSE_ID));
    put(&mut rec, GEN_AI_RESPONSE_FINISH_REASONS, attr(GEN_AI_RESPONSE_FINISH_REASONS));
    put(&mut rec, FIELD_LLM_OUTPUT_MESSAGES, output_messages(&result));
    put(&mut rec, GEN_AI_USAGE_INPUT_TOKENS, attr(GEN_AI_USAGE_INPUT_TOKENS));
    put(&mut rec, GEN_AI_USAGE_OUTPUT_TOKENS, attr(GEN_AI_USAGE_OUTPUT_TOKENS));
    put(&mut rec, GEN_AI_USAGE_TOTAL_TOKENS, attr(GEN_AI_USAGE_TOTAL_TOKENS));
    put(&mut rec, FIELD_LLM_TOKEN_COUNT, result.get("usage").cloned());
    put(&mut rec, ATTR_STREAMING, attr(ATTR_STREAMING));
    put(&mut rec, ATTR_CHUNK_COUNT, attr(ATTR_CHUNK_COUNT));

    // failure
    if let Some(ex) = span.events.iter().rev().find(|e| e.name == EVENT_EXCEPTION) {
        let field = |k: &str| ex.attributes.get(k).cloned().unwrap_or(Value::Null);
        put(&mut rec, FIELD_ERROR_TYPE, field(EXCEPTION_TYPE));
        put(&mut rec, FIELD_ERROR_MESSAGE, field(EXCEPTION_MESSAGE));
        put(&mut rec, FIELD_ERROR_STACK, field(EXCEPTION_STACKTRACE));
    }
    if !span.events.is_empty() {
        put(&mut rec, FIELD_EVENTS, to_field_value(&span.events));
    }

    put(&mut rec, FIELD_SOURCE, opts.source);
    if opts.include_raw {
        put(&mut rec, FIELD_RAW, to_field_value(span).to_string());
    }
    rec
}

fn put(rec: &mut FieldRecord, key: &str, value: impl Into<Value>) {
    rec.insert(key.to_string(), value.into());
}

/// Composite values become normalized JSON text; strings that hold JSON are normalized too.
fn json_text(v: Value) -> Value {
    match v {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(normalize_json_text(&s)),
        other => Value::String(other.to_string()),
    }
}

fn invocation_parameters(span: &SpanRecord) -> Value {
    let mut params = Map::new();
    for key in [
        GEN_AI_REQUEST_MODEL,
        GEN_AI_REQUEST_TEMPERATURE,
        GEN_AI_REQUEST_TOP_P,
        GEN_AI_REQUEST_MAX_TOKENS,
        ATTR_STREAMING,
    ] {
        if let Some(v) = span.attribute(key) {
            let short = key.rsplit('.').next().unwrap_or(key);
            params.insert(short.to_string(), v.clone());
        }
    }
    if params.is_empty() {
        Value::Null
    } else {
        Value::String(Value::Object(params).to_string())
    }
}

/// The assistant messages of a chat result, if the result is a chat completion.
fn output_messages(result: &Value) -> Value {
    let Some(choices) = result.get("choices").and_then(Value::as_array) else {
        return Value::Null;
    };
    let messages: Vec<Value> = choices
        .iter()
        .filter_map(|c| c.get("message").cloned())
        .collect();
    if messages.is_empty() {
        Value::Null
    } else {
        Value::String(Value::Array(messages).to_string())
    }
}
