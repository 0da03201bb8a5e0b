//! Upstream events -> Anthropic Messages named-event SSE stream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::Stream;
use protocol::anthropic::{ContentDelta, ErrorDetails, MessageDeltaFields, MessagesResponse, ResponseBlock, StreamEvent, Usage};
use protocol::responses::{Event, OutputItem};
use protocol::CanonicalRequest;
use state::StateStore;
use tokio::io::AsyncRead;
use upstream::SseReader;
use upstream::ToolBuffer;

use super::{web_search_tool_name, Capture};

pub enum Frame {
    Event(StreamEvent),
    /// No terminal marker of its own; `message_stop` already closes the
    /// stream in this dialect.
    End,
}

struct State<R> {
    reader: SseReader<R>,
    tools: ToolBuffer,
    store: Arc<StateStore>,
    request: CanonicalRequest,
    capture: Capture,
    pending: VecDeque<Frame>,
    response_id: Option<String>,
    next_block_index: u32,
    open_text_block: Option<u32>,
    open_tool_blocks: HashMap<String, u32>,
    message_started: bool,
    any_tool_call: bool,
    stream_ended: bool,
    succeeded: bool,
}

enum Cursor<R> {
    Running(State<R>),
    Finished,
}

/// Converts the upstream SSE stream into a lazily-polled stream of
/// `message_start`/`content_block_*`/`message_delta`/`message_stop` frames.
/// Runs on the caller's own task; never spawns a worker.
pub fn respond<R>(request: CanonicalRequest, reader: SseReader<R>, store: Arc<StateStore>) -> impl Stream<Item = Frame>
where
    R: AsyncRead + Unpin,
{
    let state = State {
        reader,
        tools: ToolBuffer::new(),
        store,
        request,
        capture: Capture::default(),
        pending: VecDeque::new(),
        response_id: None,
        next_block_index: 0,
        open_text_block: None,
        open_tool_blocks: HashMap::new(),
        message_started: false,
        any_tool_call: false,
        stream_ended: false,
        succeeded: false,
    };

    futures::stream::unfold(Cursor::Running(state), |cursor| async move {
        let mut state = match cursor {
            Cursor::Running(state) => state,
            Cursor::Finished => return None,
        };

        loop {
            if let Some(frame) = state.pending.pop_front() {
                let next = if state.stream_ended && state.pending.is_empty() {
                    if state.succeeded {
                        super::finish(&state.store, &state.request, std::mem::take(&mut state.capture)).await;
                    }
                    Cursor::Finished
                } else {
                    Cursor::Running(state)
                };
                return Some((frame, next));
            }

            if state.stream_ended {
                if state.succeeded {
                    super::finish(&state.store, &state.request, state.capture).await;
                }
                return None;
            }

            match state.reader.next_event().await {
                Ok(Some(event)) => handle_event(&mut state, event),
                Ok(None) => finish_stream(&mut state, "end_turn"),
                Err(err) => {
                    log::warn!("upstream SSE read failed: {err}");
                    finish_stream(&mut state, "end_turn");
                }
            }
        }
    })
}

fn ensure_message_started<R>(state: &mut State<R>) {
    if state.message_started {
        return;
    }
    state.message_started = true;

    let message = MessagesResponse {
        id: state.response_id.clone().unwrap_or_else(|| "msg_pending".to_string()),
        r#type: "message",
        role: "assistant",
        model: state.request.requested_model.clone(),
        content: Vec::new(),
        stop_reason: None,
        usage: Usage::default(),
    };
    state.pending.push_back(Frame::Event(StreamEvent::MessageStart { message }));
}

fn handle_event<R>(state: &mut State<R>, event: Event) {
    match event {
        Event::Created { response } => {
            state.response_id = Some(response.id.clone());
            state.capture.response_id = Some(response.id);
        }

        Event::OutputItemAdded { item } => {
            if let OutputItem::FunctionCall { id, call_id, arguments, .. } = &item {
                state.tools.record_added(id, call_id.as_deref(), arguments.as_ref());
            }
        }

        Event::OutputTextDelta { delta, .. } => {
            ensure_message_started(state);
            let index = open_text_block(state);
            state.pending.push_back(Frame::Event(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::TextDelta { text: delta },
            }));
        }

        Event::OutputTextDone { .. } => {
            close_text_block(state);
        }

        Event::ReasoningSummaryTextDelta { .. } | Event::ReasoningTextDelta { .. } | Event::ReasoningSummaryPartAdded { .. } => {
            // Anthropic's dialect has no reasoning-block representation; upstream
            // reasoning is dropped for this translator.
        }

        Event::FunctionCallArgumentsDelta { item_id, delta, call_id } => {
            state.tools.append_delta(&item_id, call_id.as_deref(), &delta);
        }

        Event::FunctionCallArgumentsDone { item_id, arguments, call_id, item } => {
            let embedded = item.as_ref().and_then(|item| match item {
                OutputItem::FunctionCall { arguments, .. } => arguments.as_ref(),
                _ => None,
            });
            state.tools.record_done(&item_id, call_id.as_deref(), arguments.as_ref(), embedded);
        }

        Event::OutputItemDone { item } => handle_output_item_done(state, item),

        Event::WebSearchCallInProgress { .. } | Event::WebSearchCallSearching { .. } | Event::WebSearchCallCompleted { .. } => {}

        Event::Completed { response } => {
            state.succeeded = true;
            close_text_block(state);
            let usage = response.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            });
            let stop_reason = if state.any_tool_call { "tool_use" } else { "end_turn" };
            finish_stream_with_usage(state, stop_reason, usage);
        }

        Event::Failed { response } => {
            state.pending.push_back(Frame::Event(StreamEvent::Error {
                error: ErrorDetails {
                    r#type: "api_error".to_string(),
                    message: response.error.message,
                },
            }));
            state.pending.push_back(Frame::End);
            state.stream_ended = true;
        }

        Event::Unknown => {}
    }
}

fn handle_output_item_done<R>(state: &mut State<R>, item: OutputItem) {
    match item {
        OutputItem::FunctionCall { id, call_id, name, arguments } => {
            let call_id = call_id.unwrap_or_else(|| id.clone());
            let name = name.unwrap_or_default();
            state.tools.record_added(&id, Some(&call_id), None);

            let from_event = arguments.as_ref().map(value_to_argument_string).filter(|s| !is_empty_argument_string(s));
            let resolved = from_event.unwrap_or_else(|| state.tools.resolve_arguments(&id, Some(&call_id)));

            emit_tool_use_block(state, call_id, name, resolved);
        }

        OutputItem::CustomToolCall { id, call_id, name, input } => {
            let call_id = call_id.unwrap_or_else(|| id.clone());
            let name = name.unwrap_or_default();
            emit_tool_use_block(state, call_id, name, input.unwrap_or_default());
        }

        OutputItem::WebSearchCall { id, .. } => {
            let call_id = state.tools.call_id_for(&id).map(str::to_string).unwrap_or(id);
            emit_tool_use_block(state, call_id, web_search_tool_name().to_string(), "{}".to_string());
        }

        OutputItem::Message { .. } | OutputItem::Unknown => {}
    }
}

fn value_to_argument_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_argument_string(s: &str) -> bool {
    matches!(s.trim(), "" | "{}" | "null" | "[]")
}

fn open_text_block<R>(state: &mut State<R>) -> u32 {
    if let Some(index) = state.open_text_block {
        return index;
    }

    let index = state.next_block_index;
    state.next_block_index += 1;
    state.open_text_block = Some(index);
    state.pending.push_back(Frame::Event(StreamEvent::ContentBlockStart {
        index,
        content_block: ResponseBlock::Text { text: String::new() },
    }));
    index
}

fn close_text_block<R>(state: &mut State<R>) {
    if let Some(index) = state.open_text_block.take() {
        state.pending.push_back(Frame::Event(StreamEvent::ContentBlockStop { index }));
    }
}

fn emit_tool_use_block<R>(state: &mut State<R>, call_id: String, name: String, arguments: String) {
    close_text_block(state);
    ensure_message_started(state);
    state.any_tool_call = true;
    state.capture.record_call(call_id.clone(), name.clone(), arguments.clone());

    let index = state.next_block_index;
    state.next_block_index += 1;
    state.open_tool_blocks.insert(call_id.clone(), index);

    state.pending.push_back(Frame::Event(StreamEvent::ContentBlockStart {
        index,
        content_block: ResponseBlock::ToolUse {
            id: call_id,
            name,
            input: serde_json::json!({}),
        },
    }));

    state.pending.push_back(Frame::Event(StreamEvent::ContentBlockDelta {
        index,
        delta: ContentDelta::InputJsonDelta { partial_json: arguments },
    }));

    state.pending.push_back(Frame::Event(StreamEvent::ContentBlockStop { index }));
}

fn finish_stream<R>(state: &mut State<R>, stop_reason: &'static str) {
    finish_stream_with_usage(state, stop_reason, None);
}

fn finish_stream_with_usage<R>(state: &mut State<R>, stop_reason: &'static str, usage: Option<Usage>) {
    close_text_block(state);
    ensure_message_started(state);

    state.pending.push_back(Frame::Event(StreamEvent::MessageDelta {
        delta: MessageDeltaFields { stop_reason: Some(stop_reason) },
        usage: usage.unwrap_or_default(),
    }));
    state.pending.push_back(Frame::Event(StreamEvent::MessageStop));
    state.pending.push_back(Frame::End);
    state.stream_ended = true;
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use futures::StreamExt;
    use protocol::canonical::{ReasoningConfig, ReasoningEffort, ReasoningSummary, ResponseFormat, ToolChoice};

    use super::*;

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            response_format: ResponseFormat::Anthropic,
            model: "gpt-5".to_string(),
            requested_model: "gpt-5".to_string(),
            stream: true,
            include_usage: false,
            input_items: Vec::new(),
            instructions: "be helpful".to_string(),
            tools: Vec::new(),
            base_tools: Vec::new(),
            had_extra_tools: false,
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            previous_response_id: None,
            conversation_id: None,
            auto_previous_response_id: false,
            reasoning: ReasoningConfig {
                effort: ReasoningEffort::Medium,
                summary: ReasoningSummary::Auto,
            },
            store_requested: false,
            store_for_upstream: false,
            include: Vec::new(),
            session_id: None,
        }
    }

    fn sse(body: &str) -> SseReader<Cursor<Vec<u8>>> {
        SseReader::new(Cursor::new(body.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn text_segment_opens_and_closes_a_content_block() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"item_1\",\"delta\":\"hi\"}\n\n",
            "data: {\"type\":\"response.output_text.done\",\"item_id\":\"item_1\",\"text\":\"hi\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store).collect().await;
        let events: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Event(e) => Some(e),
                Frame::End => None,
            })
            .collect();

        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[2], StreamEvent::ContentBlockDelta { index: 0, .. }));
        assert!(matches!(events[3], StreamEvent::ContentBlockStop { index: 0 }));
        let stop_reason = events.iter().find_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => delta.stop_reason,
            _ => None,
        });
        assert_eq!(stop_reason, Some("end_turn"));
        assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
    }

    #[tokio::test]
    async fn tool_call_sets_stop_reason_tool_use() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"function_call\",\"id\":\"item_1\",\"call_id\":\"call_1\",\"name\":\"search\",\"arguments\":\"{\\\"q\\\":1}\"}}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store).collect().await;
        let stop_reason = frames.iter().find_map(|f| match f {
            Frame::Event(StreamEvent::MessageDelta { delta, .. }) => delta.stop_reason,
            _ => None,
        });
        assert_eq!(stop_reason, Some("tool_use"));
    }

    #[tokio::test]
    async fn upstream_failure_emits_error_event() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.failed\",\"response\":{\"id\":\"resp_1\",\"error\":{\"message\":\"boom\"}}}\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store).collect().await;
        assert!(frames.iter().any(|f| matches!(f, Frame::Event(StreamEvent::Error { error }) if error.message == "boom")));
    }
}
