/// Span attribute keys recorded by the interceptor.
/// Keep these stable; the extractor reads spans back through them.
pub const ATTR_METHOD: &str = "llm.method";
pub const ATTR_ARGUMENTS: &str = "llm.arguments";
pub const ATTR_RESULT: &str = "llm.result";
pub const ATTR_STREAMING: &str = "llm.is_streaming";
pub const ATTR_CHUNK_COUNT: &str = "llm.stream.chunks";
pub const ATTR_TOOLS: &str = "llm.tools";
pub const ATTR_TOOL_CHOICE: &str = "llm.tool_choice";

pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";
pub const GEN_AI_REQUEST_TOP_P: &str = "gen_ai.request.top_p";
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";
pub const GEN_AI_REQUEST_MESSAGES: &str = "gen_ai.request.messages";
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const GEN_AI_RESPONSE_ID: &str = "gen_ai.response.id";
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const GEN_AI_USAGE_TOTAL_TOKENS: &str = "gen_ai.usage.total_tokens";

/// Exception event (OpenTelemetry naming).
pub const EVENT_EXCEPTION: &str = "exception";
pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";
pub const EXCEPTION_STACKTRACE: &str = "exception.stacktrace";

/// Field record names produced by the extractor and the function logger.
pub const FIELD_NAME: &str = "name";
pub const FIELD_TRACE_ID: &str = "trace_id";
pub const FIELD_SPAN_ID: &str = "span_id";
pub const FIELD_TRACE_STATE: &str = "trace_state";
pub const FIELD_PARENT_ID: &str = "parent_id";
pub const FIELD_START_TIME: &str = "start_time";
pub const FIELD_END_TIME: &str = "end_time";
pub const FIELD_START_TIMESTAMP: &str = "start_timestamp";
pub const FIELD_END_TIMESTAMP: &str = "end_timestamp";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_KIND: &str = "kind";
pub const FIELD_RESP_ID: &str = "resp_id";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_INPUT: &str = "input";
pub const FIELD_OUTPUT: &str = "output";
pub const FIELD_TOOL: &str = "tool";
pub const FIELD_LLM_TOOLS: &str = "llm_tools";
pub const FIELD_LLM_TOKEN_COUNT: &str = "llm_token_count";
pub const FIELD_LLM_OUTPUT_MESSAGES: &str = "llm_output_messages";
pub const FIELD_LLM_INPUT_MESSAGES: &str = "llm_input_messages";
pub const FIELD_LLM_MODEL_NAME: &str = "llm_model_name";
pub const FIELD_LLM_INVOCATION_PARAMETERS: &str = "llm_invocation_parameters";
pub const FIELD_FN_INPUT: &str = "fn_input";
pub const FIELD_FN_OUTPUT: &str = "fn_output";
pub const FIELD_ERROR_TYPE: &str = "error.type";
pub const FIELD_ERROR_MESSAGE: &str = "error.message";
pub const FIELD_ERROR_STACK: &str = "error.stack";
pub const FIELD_EVENTS: &str = "events";
pub const FIELD_RAW: &str = "raw";
pub const FIELD_SOURCE: &str = "source";

/// `source` value for spans produced by the interceptor when none is configured.
pub const DEFAULT_SPAN_SOURCE: &str = "openAI_Telemetry";

/// Well-known fields and the short keys the collector expects for them.
/// Changing an entry is a breaking change for every stored record.
pub const SEEDED_KEYS: &[(&str, &str)] = &[
    (FIELD_NAME, "otel_name"),
    (FIELD_TRACE_ID, "otel_trace_id"),
    (FIELD_SPAN_ID, "otel_span_id"),
    (FIELD_TRACE_STATE, "otel_trace_flags"),
    (FIELD_PARENT_ID, "otel_parent_span_id"),
    (FIELD_START_TIME, "otel_start_time"),
    (FIELD_END_TIME, "otel_end_time"),
    (FIELD_KIND, "otel_kind"),
    (FIELD_RESP_ID, "otel_status_message"),
    (FIELD_START_TIMESTAMP, "cvn1"),
    (FIELD_END_TIMESTAMP, "cvn2"),
    (FIELD_INPUT, "cvs1"),
    (FIELD_OUTPUT, "cvs2"),
    (FIELD_TOOL, "cvs3"),
    (FIELD_LLM_TOOLS, "cvs4"),
    (FIELD_LLM_TOKEN_COUNT, "cvs5"),
    (FIELD_LLM_OUTPUT_MESSAGES, "cvs6"),
    (FIELD_LLM_INPUT_MESSAGES, "cvs7"),
    (FIELD_LLM_MODEL_NAME, "cvs8"),
    (FIELD_LLM_INVOCATION_PARAMETERS, "cvs9"),
    (GEN_AI_SYSTEM, "cvs10"),
    (GEN_AI_OPERATION_NAME, "cvs11"),
    (GEN_AI_REQUEST_MODEL, "cvs12"),
    (GEN_AI_RESPONSE_MODEL, "cvs13"),
    (FIELD_FN_INPUT, "cvs14"),
    (FIELD_FN_OUTPUT, "cvs15"),
    (GEN_AI_RESPONSE_ID, "cvs16"),
    (GEN_AI_RESPONSE_FINISH_REASONS, "cvs17"),
    (FIELD_STATUS, "cvs18"),
    (FIELD_ERROR_TYPE, "cvs19"),
    (FIELD_ERROR_MESSAGE, "cvs20"),
    (FIELD_ERROR_STACK, "cvs21"),
    (FIELD_EVENTS, "cvs22"),
    (FIELD_RAW, "cvs199"),
    (FIELD_SOURCE, "cvs200"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seeded_table_has_unique_fields_and_keys() {
        let fields: HashSet<_> = SEEDED_KEYS.iter().map(|(f, _)| *f).collect();
        let keys: HashSet<_> = SEEDED_KEYS.iter().map(|(_, k)| *k).collect();
        assert_eq!(fields.len(), SEEDED_KEYS.len());
        assert_eq!(keys.len(), SEEDED_KEYS.len());
    }
}
