//! Anthropic Messages API: streaming/non-streaming chat and token counting.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::response::sse::Event as SseEvent;
use axum::response::{IntoResponse, Json, Response, Sse};
use axum_serde::Sonic;
use axum::extract::State;
use futures::{Stream, StreamExt};
use protocol::anthropic::{ContentDelta, CountTokensRequest, CountTokensResponse, MessagesRequest, MessagesResponse, ResponseBlock, StreamEvent, Usage};
use serde_json::Value;

use crate::error::ProxyError;
use crate::router::AppState;
use crate::translators::{self, AnthropicFrame};

pub async fn messages(State(state): State<AppState>, Sonic(body): Sonic<MessagesRequest>) -> Result<Response, ProxyError> {
    let wants_stream = body.stream.unwrap_or(false);
    let request = state.normaliser.normalise_anthropic(body).await?;
    let upstream = state.upstream.stream(&request).await?;
    let stream = translators::respond_anthropic(request, upstream.reader, state.state_store.clone());

    if wants_stream {
        Ok(messages_sse(stream))
    } else {
        Ok(Json(aggregate_messages(stream).await).into_response())
    }
}

/// Upstream exposes no tokenizer, so this counts characters and divides by
/// four as a rough stand-in rather than an exact BPE count.
pub async fn count_tokens(Sonic(body): Sonic<CountTokensRequest>) -> Json<CountTokensResponse> {
    let mut chars = 0usize;

    if let Some(system) = &body.system {
        chars += value_char_len(system);
    }
    for message in &body.messages {
        chars += value_char_len(&message.content);
    }
    if let Some(tools) = &body.tools {
        for tool in tools {
            chars += value_char_len(tool);
        }
    }

    Json(CountTokensResponse { input_tokens: (chars / 4).max(1) as u64 })
}

fn value_char_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

fn messages_sse(stream: impl Stream<Item = AnthropicFrame> + Send + 'static) -> Response {
    let events = stream.filter_map(|frame| async move {
        match frame {
            AnthropicFrame::Event(event) => {
                let name = event_name(&event);
                let json = sonic_rs::to_string(&event).unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"));
                Some(Ok::<_, Infallible>(SseEvent::default().event(name).data(json)))
            }
            AnthropicFrame::End => None,
        }
    });
    Sse::new(events).into_response()
}

fn event_name(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Error { .. } => "error",
    }
}

async fn aggregate_messages(stream: impl Stream<Item = AnthropicFrame>) -> MessagesResponse {
    futures::pin_mut!(stream);

    let mut id = String::new();
    let mut model = String::new();
    let mut blocks: Vec<ResponseBlock> = Vec::new();
    let mut tool_json: HashMap<u32, String> = HashMap::new();
    let mut stop_reason = None;
    let mut usage = Usage::default();

    while let Some(frame) = stream.next().await {
        let AnthropicFrame::Event(event) = frame else { continue };

        match event {
            StreamEvent::MessageStart { message } => {
                id = message.id;
                model = message.model;
            }

            StreamEvent::ContentBlockStart { index, content_block } => {
                let idx = index as usize;
                if blocks.len() <= idx {
                    blocks.resize_with(idx + 1, || ResponseBlock::Text { text: String::new() });
                }
                blocks[idx] = content_block;
            }

            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => {
                    if let Some(ResponseBlock::Text { text: existing }) = blocks.get_mut(index as usize) {
                        existing.push_str(&text);
                    }
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    tool_json.entry(index).or_default().push_str(&partial_json);
                }
            },

            StreamEvent::ContentBlockStop { index } => {
                if let Some(json) = tool_json.remove(&index) {
                    if let Some(ResponseBlock::ToolUse { input, .. }) = blocks.get_mut(index as usize) {
                        *input = serde_json::from_str(&json).unwrap_or_else(|_| serde_json::json!({}));
                    }
                }
            }

            StreamEvent::MessageDelta { delta, usage: delta_usage } => {
                stop_reason = delta.stop_reason;
                usage = delta_usage;
            }

            StreamEvent::MessageStop | StreamEvent::Error { .. } => {}
        }
    }

    MessagesResponse {
        id,
        r#type: "message",
        role: "assistant",
        model,
        content: blocks,
        stop_reason,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[test]
    fn event_name_matches_snake_case_wire_names() {
        assert_eq!(event_name(&StreamEvent::MessageStop), "message_stop");
        assert_eq!(
            event_name(&StreamEvent::ContentBlockStop { index: 0 }),
            "content_block_stop"
        );
    }

    #[tokio::test]
    async fn aggregate_messages_assembles_text_and_tool_use_blocks() {
        let message = MessagesResponse {
            id: "msg_1".to_string(),
            r#type: "message",
            role: "assistant",
            model: "claude".to_string(),
            content: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
        };

        let frames = stream::iter(vec![
            AnthropicFrame::Event(StreamEvent::MessageStart { message }),
            AnthropicFrame::Event(StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseBlock::Text { text: String::new() },
            }),
            AnthropicFrame::Event(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta { text: "hi".to_string() },
            }),
            AnthropicFrame::Event(StreamEvent::ContentBlockStop { index: 0 }),
            AnthropicFrame::Event(StreamEvent::ContentBlockStart {
                index: 1,
                content_block: ResponseBlock::ToolUse {
                    id: "tool_1".to_string(),
                    name: "lookup".to_string(),
                    input: Value::Null,
                },
            }),
            AnthropicFrame::Event(StreamEvent::ContentBlockDelta {
                index: 1,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: "{\"q\":\"rust\"}".to_string(),
                },
            }),
            AnthropicFrame::Event(StreamEvent::ContentBlockStop { index: 1 }),
            AnthropicFrame::Event(StreamEvent::MessageStop),
        ]);

        let response = aggregate_messages(frames).await;
        assert_eq!(response.id, "msg_1");
        assert_eq!(response.content.len(), 2);
        assert!(matches!(&response.content[0], ResponseBlock::Text { text } if text == "hi"));
        match &response.content[1] {
            ResponseBlock::ToolUse { input, .. } => assert_eq!(input["q"], "rust"),
            other => panic!("expected tool use block, got {other:?}"),
        }
    }
}
