//! Streaming primitives and chunk aggregation.
//!
//! Contract:
//! - A provider stream yields 0..n `ChatCompletionChunk`s, each carrying
//!   index-addressed partial choices, optionally followed by a usage-only chunk.
//! - An `Err` item ends the stream; nothing is yielded after it.
//! - [`aggregate`] folds a fully received chunk sequence into the same shape a
//!   non-streamed call returns.

use std::collections::BTreeMap;

use crate::error::CoreResult;
use crate::model::{ChatCompletion, ChatCompletionChunk, ChatMessage, Choice, Role, ToolCall};

/// Boxed stream of chunks. Streaming calls return this.
pub type ChunkStream = futures::stream::BoxStream<'static, CoreResult<ChatCompletionChunk>>;

#[derive(Default)]
struct ChoiceAcc {
    role: Option<Role>,
    content: Option<String>,
    finish_reason: Option<String>,
    tool_calls: BTreeMap<u32, ToolCall>,
}

impl ChoiceAcc {
    fn into_choice(self, index: u32) -> Choice {
        Choice {
            index,
            message: ChatMessage {
                role: self.role.unwrap_or(Role::Assistant),
                content: self.content,
                name: None,
                tool_calls: self.tool_calls.into_values().collect(),
                tool_call_id: None,
            },
            finish_reason: self.finish_reason,
        }
    }
}

/// Reassemble a complete response from its chunks.
///
/// - identity (`id`, `object`, `created`, `model`) comes from the first chunk;
/// - content concatenates per choice index in arrival order;
/// - finish reason and usage: the last non-null value wins;
/// - choices come out in ascending index order.
///
/// An empty input yields `ChatCompletion::default()` (no identity set).
pub fn aggregate(chunks: &[ChatCompletionChunk]) -> ChatCompletion {
    let Some(first) = chunks.first() else {
        return ChatCompletion::default();
    };

    let mut out = ChatCompletion {
        id: first.id.clone(),
        object: first.object.clone().map(|o| strip_chunk_suffix(&o)),
        created: first.created,
        model: first.model.clone(),
        ..ChatCompletion::default()
    };
    let mut choices: BTreeMap<u32, ChoiceAcc> = BTreeMap::new();

    for chunk in chunks {
        if out.system_fingerprint.is_none() {
            out.system_fingerprint = chunk.system_fingerprint.clone();
        }
        for part in &chunk.choices {
            let acc = choices.entry(part.index).or_default();
            if acc.role.is_none() {
                acc.role = part.delta.role;
            }
            if let Some(text) = &part.delta.content {
                acc.content.get_or_insert_with(String::new).push_str(text);
            }
            for frag in &part.delta.tool_calls {
                let call = acc.tool_calls.entry(frag.index).or_default();
                if call.id.is_none() {
                    call.id = frag.id.clone();
                }
                if call.kind.is_none() {
                    call.kind = frag.kind.clone();
                }
                if let Some(f) = &frag.function {
                    if call.function.name.is_empty()
                        && let Some(name) = &f.name
                    {
                        call.function.name = name.clone();
                    }
                    if let Some(args) = &f.arguments {
                        call.function.arguments.push_str(args);
                    }
                }
            }
            if part.finish_reason.is_some() {
                acc.finish_reason = part.finish_reason.clone();
            }
        }
        if chunk.usage.is_some() {
            out.usage = chunk.usage;
        }
    }

    out.choices = choices
        .into_iter()
        .map(|(index, acc)| acc.into_choice(index))
        .collect();
    out
}

/// `chat.completion.chunk` → `chat.completion`, so the aggregate reads like a plain response.
fn strip_chunk_suffix(object: &str) -> String {
    object
        .strip_suffix(".chunk")
        .unwrap_or(object)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkChoice, ChunkDelta, FunctionCallDelta, ToolCallDelta, Usage};

    fn chunk(parts: Vec<ChunkChoice>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: Some("chatcmpl-abc".into()),
            object: Some("chat.completion.chunk".into()),
            created: Some(1_700_000_000),
            model: Some("gpt-4o-mini".into()),
            choices: parts,
            ..Default::default()
        }
    }

    fn text(index: u32, s: &str) -> ChunkChoice {
        ChunkChoice {
            index,
            delta: ChunkDelta {
                content: Some(s.into()),
                ..Default::default()
            },
            finish_reason: None,
        }
    }

    fn finish(index: u32, reason: &str) -> ChunkChoice {
        ChunkChoice {
            index,
            delta: ChunkDelta::default(),
            finish_reason: Some(reason.into()),
        }
    }

    #[test]
    fn empty_input_yields_default_aggregate() {
        let agg = aggregate(&[]);
        assert_eq!(agg, ChatCompletion::default());
        assert!(agg.id.is_none());
        assert!(agg.model.is_none());
    }

    #[test]
    fn two_choices_reassemble_in_index_order() {
        let chunks = vec![
            chunk(vec![text(1, "Hi")]),
            chunk(vec![text(0, "Hello")]),
            chunk(vec![text(0, " world")]),
            chunk(vec![finish(0, "stop")]),
        ];
        let agg = aggregate(&chunks);
        assert_eq!(agg.choices.len(), 2);
        assert_eq!(agg.choices[0].index, 0);
        assert_eq!(agg.choices[1].index, 1);
        assert_eq!(agg.choices[0].message.content.as_deref(), Some("Hello world"));
        assert_eq!(agg.choices[1].message.content.as_deref(), Some("Hi"));
        assert_eq!(agg.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(agg.choices[1].finish_reason, None);
        assert_eq!(agg.choices[0].message.role, Role::Assistant);
    }

    #[test]
    fn identity_comes_from_first_chunk() {
        let mut later = chunk(vec![text(0, "b")]);
        later.id = Some("different".into());
        later.model = Some("other-model".into());
        later.created = Some(1);
        let agg = aggregate(&[chunk(vec![text(0, "a")]), later]);
        assert_eq!(agg.id.as_deref(), Some("chatcmpl-abc"));
        assert_eq!(agg.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(agg.created, Some(1_700_000_000));
        assert_eq!(agg.object.as_deref(), Some("chat.completion"));
    }

    #[test]
    fn last_non_null_finish_reason_and_usage_win() {
        let mut first_usage = chunk(vec![finish(0, "length")]);
        first_usage.usage = Some(Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        let mut terminal = chunk(vec![]);
        terminal.usage = Some(Usage {
            prompt_tokens: 9,
            completion_tokens: 4,
            total_tokens: 13,
        });
        let agg = aggregate(&[
            chunk(vec![text(0, "x")]),
            first_usage,
            chunk(vec![finish(0, "stop")]),
            // null finish reason must not erase the earlier one
            chunk(vec![text(0, "")]),
            terminal,
        ]);
        assert_eq!(agg.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(agg.usage.map(|u| u.total_tokens), Some(13));
        assert_eq!(agg.finish_reasons(), vec!["stop".to_string()]);
    }

    #[test]
    fn role_from_first_delta_and_tool_call_fragments_concatenate() {
        let opening = ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: Some(Role::Assistant),
                content: None,
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    kind: Some("function".into()),
                    function: Some(FunctionCallDelta {
                        name: Some("get_weather".into()),
                        arguments: Some("{\"city\":".into()),
                    }),
                }],
            },
            finish_reason: None,
        };
        let rest = ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: None,
                content: None,
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    kind: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some("\"Oslo\"}".into()),
                    }),
                }],
            },
            finish_reason: Some("tool_calls".into()),
        };
        let agg = aggregate(&[chunk(vec![opening]), chunk(vec![rest])]);
        let msg = &agg.choices[0].message;
        assert_eq!(msg.content, None);
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_calls[0].function.name, "get_weather");
        assert_eq!(msg.tool_calls[0].function.arguments, "{\"city\":\"Oslo\"}");
        assert_eq!(agg.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }
}
