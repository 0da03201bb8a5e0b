//! Upstream events -> OpenAI chat-completion chunks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::Stream;
use protocol::canonical::ReasoningCompat;
use protocol::openai::{ChatCompletionChunk, ChunkChoice, Delta, DeltaToolCall, ReasoningContent, ReasoningContentPart, ToolCallFunction, UsageBlock};
use protocol::responses::{Event, OutputItem};
use protocol::CanonicalRequest;
use state::StateStore;
use tokio::io::AsyncRead;
use upstream::SseReader;
use upstream::ToolBuffer;

use super::{web_search_tool_name, Capture};

/// One unit handed back to the route handler: a chunk to serialise as an
/// SSE `data:` line, or the terminating `[DONE]` marker.
pub enum Frame {
    Chunk(ChatCompletionChunk),
    Done,
}

struct State<R> {
    reader: SseReader<R>,
    tools: ToolBuffer,
    store: Arc<StateStore>,
    request: CanonicalRequest,
    capture: Capture,
    pending: VecDeque<Frame>,
    response_id: Option<String>,
    created: i64,
    tool_index_by_call: HashMap<String, u32>,
    next_tool_index: u32,
    think_open: bool,
    finished: bool,
    commentary_items: HashSet<String>,
    stream_ended: bool,
    succeeded: bool,
    compat: ReasoningCompat,
}

enum Cursor<R> {
    Running(State<R>),
    Finished,
}

/// Converts the upstream SSE stream into a lazily-polled stream of
/// client-facing frames: each poll reads only as many upstream events as it
/// takes to produce the next frame, so nothing is buffered beyond what a
/// single upstream event can yield. Runs on the caller's own task; never
/// spawns a worker. `compat` selects how reasoning output is projected,
/// since it is a server-wide setting rather than part of the request.
pub fn respond<R>(request: CanonicalRequest, reader: SseReader<R>, store: Arc<StateStore>, compat: ReasoningCompat) -> impl Stream<Item = Frame>
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
        created: jiff::Timestamp::now().as_second(),
        tool_index_by_call: HashMap::new(),
        next_tool_index: 0,
        think_open: false,
        finished: false,
        commentary_items: HashSet::new(),
        stream_ended: false,
        succeeded: false,
        compat,
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
                Ok(None) => {
                    close_think_tag(&mut state);
                    close_stream(&mut state);
                }
                Err(err) => {
                    log::warn!("upstream SSE read failed: {err}");
                    close_think_tag(&mut state);
                    close_stream(&mut state);
                }
            }
        }
    })
}

fn handle_event<R>(state: &mut State<R>, event: Event) {
    match event {
        Event::Created { response } => {
            state.response_id = Some(response.id.clone());
            state.capture.response_id = Some(response.id);
        }

        Event::OutputItemAdded { item } => {
            if let OutputItem::Message { id, phase, .. } = &item {
                if phase.as_deref() == Some("commentary") {
                    state.commentary_items.insert(id.clone());
                }
            }
            if let OutputItem::FunctionCall { id, call_id, arguments, .. } = &item {
                state.tools.record_added(id, call_id.as_deref(), arguments.as_ref());
            }
        }

        Event::ReasoningSummaryPartAdded { .. } => {
            if state.think_open {
                emit_content(state, "\n");
            }
        }

        Event::ReasoningSummaryTextDelta { delta, .. } | Event::ReasoningTextDelta { delta, .. } => {
            emit_reasoning(state, delta);
        }

        Event::OutputTextDelta { item_id, delta } => {
            if state.commentary_items.contains(&item_id) {
                return;
            }
            close_think_tag(state);
            emit_content(state, &delta);
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

        Event::OutputTextDone { .. } => {}

        Event::Completed { response } => {
            state.succeeded = true;
            close_think_tag(state);
            if !state.finished {
                emit_finish(state, "stop");
            }
            if state.request.include_usage {
                if let Some(usage) = response.usage {
                    state.pending.push_back(Frame::Chunk(usage_chunk(state, &usage)));
                }
            }
            close_stream(state);
        }

        Event::Failed { response } => {
            close_think_tag(state);
            state.pending.push_back(Frame::Chunk(error_chunk(state, &response.error.message)));
            close_stream(state);
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
            let resolved = resolve_arguments(state, &id, &call_id, arguments.as_ref());
            emit_tool_call(state, call_id, name, resolved);
        }

        OutputItem::CustomToolCall { id, call_id, name, input } => {
            let call_id = call_id.unwrap_or_else(|| id.clone());
            let name = name.unwrap_or_default();
            emit_tool_call(state, call_id, name, input.unwrap_or_default());
        }

        OutputItem::WebSearchCall { id, .. } => {
            let call_id = state.tools.call_id_for(&id).map(str::to_string).unwrap_or(id);
            emit_tool_call(state, call_id, web_search_tool_name().to_string(), "{}".to_string());
        }

        OutputItem::Message { .. } | OutputItem::Unknown => {}
    }
}

fn resolve_arguments<R>(state: &mut State<R>, item_id: &str, call_id: &str, event_arguments: Option<&serde_json::Value>) -> String {
    let from_event = event_arguments.map(value_to_argument_string).filter(|s| !is_empty_argument_string(s));

    match from_event {
        Some(args) => args,
        None => state.tools.resolve_arguments(item_id, Some(call_id)),
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

fn emit_tool_call<R>(state: &mut State<R>, call_id: String, name: String, arguments: String) {
    state.capture.record_call(call_id.clone(), name.clone(), arguments.clone());

    let index = *state.tool_index_by_call.entry(call_id.clone()).or_insert_with(|| {
        let next = state.next_tool_index;
        state.next_tool_index += 1;
        next
    });

    let chunk = chunk(
        state,
        ChunkChoice {
            index: 0,
            delta: Delta {
                tool_calls: vec![DeltaToolCall {
                    index,
                    id: Some(call_id),
                    r#type: Some("function"),
                    function: Some(ToolCallFunction { name, arguments }),
                }],
                ..Default::default()
            },
            finish_reason: None,
        },
    );
    state.pending.push_back(Frame::Chunk(chunk));
    emit_finish(state, "tool_calls");
}

fn emit_finish<R>(state: &mut State<R>, reason: &'static str) {
    state.finished = true;
    let chunk = chunk(
        state,
        ChunkChoice {
            index: 0,
            delta: Delta::default(),
            finish_reason: Some(reason),
        },
    );
    state.pending.push_back(Frame::Chunk(chunk));
}

fn emit_content<R>(state: &mut State<R>, text: &str) {
    let chunk = chunk(
        state,
        ChunkChoice {
            index: 0,
            delta: Delta {
                content: Some(text.to_string()),
                ..Default::default()
            },
            finish_reason: None,
        },
    );
    state.pending.push_back(Frame::Chunk(chunk));
}

fn emit_reasoning<R>(state: &mut State<R>, text: String) {
    match compat_mode(state) {
        ReasoningCompat::ThinkTags => {
            let mut content = String::new();
            if !state.think_open {
                content.push_str("<think>");
                state.think_open = true;
            }
            content.push_str(&text);
            emit_content(state, &content);
        }
        ReasoningCompat::O3 => {
            let chunk = chunk(
                state,
                ChunkChoice {
                    index: 0,
                    delta: Delta {
                        reasoning_content: Some(ReasoningContent {
                            content: vec![ReasoningContentPart { r#type: "text", text }],
                        }),
                        ..Default::default()
                    },
                    finish_reason: None,
                },
            );
            state.pending.push_back(Frame::Chunk(chunk));
        }
        ReasoningCompat::Legacy => {
            let chunk = chunk(
                state,
                ChunkChoice {
                    index: 0,
                    delta: Delta {
                        reasoning: Some(text),
                        ..Default::default()
                    },
                    finish_reason: None,
                },
            );
            state.pending.push_back(Frame::Chunk(chunk));
        }
    }
}

fn close_think_tag<R>(state: &mut State<R>) {
    if state.think_open && compat_mode(state) == ReasoningCompat::ThinkTags {
        state.think_open = false;
        emit_content(state, "</think>");
    }
}

fn compat_mode<R>(state: &State<R>) -> ReasoningCompat {
    state.compat
}

fn close_stream<R>(state: &mut State<R>) {
    if !state.finished {
        emit_finish(state, "stop");
    }
    state.pending.push_back(Frame::Done);
    state.stream_ended = true;
}

fn chunk<R>(state: &State<R>, choice: ChunkChoice) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: state.response_id.clone().unwrap_or_else(|| "resp_pending".to_string()),
        object: "chat.completion.chunk",
        created: state.created,
        model: state.request.requested_model.clone(),
        choices: vec![choice],
        usage: None,
    }
}

fn usage_chunk<R>(state: &State<R>, usage: &protocol::responses::Usage) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: state.response_id.clone().unwrap_or_else(|| "resp_pending".to_string()),
        object: "chat.completion.chunk",
        created: state.created,
        model: state.request.requested_model.clone(),
        choices: Vec::new(),
        usage: Some(UsageBlock {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        }),
    }
}

fn error_chunk<R>(state: &State<R>, message: &str) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: state.response_id.clone().unwrap_or_else(|| "resp_pending".to_string()),
        object: "chat.completion.chunk",
        created: state.created,
        model: state.request.requested_model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                content: Some(format!("error: {message}")),
                ..Default::default()
            },
            finish_reason: Some("stop"),
        }],
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use protocol::canonical::{ReasoningConfig, ReasoningEffort, ReasoningSummary, ResponseFormat, ToolChoice};

    use futures::StreamExt;

    use super::*;

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            response_format: ResponseFormat::Chat,
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
    async fn plain_text_completes_with_stop_and_done() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"item_1\",\"delta\":\"hi\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store, ReasoningCompat::ThinkTags).collect().await;
        let chunks: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Chunk(c) => Some(c),
                Frame::Done => None,
            })
            .collect();

        assert!(chunks.iter().any(|c| c.choices.first().and_then(|ch| ch.delta.content.as_deref()) == Some("hi")));
        assert!(chunks.iter().any(|c| c.choices.first().and_then(|ch| ch.finish_reason) == Some("stop")));
        assert!(matches!(frames.last(), Some(Frame::Done)));
    }

    #[tokio::test]
    async fn tool_call_emits_delta_then_finish_reason() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_item.added\",\"item\":{\"type\":\"function_call\",\"id\":\"item_1\",\"call_id\":\"call_1\"}}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"item_id\":\"item_1\",\"delta\":\"{\\\"q\\\":1}\"}\n\n",
            "data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"function_call\",\"id\":\"item_1\",\"call_id\":\"call_1\",\"name\":\"search\",\"arguments\":\"\"}}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store, ReasoningCompat::ThinkTags).collect().await;
        let chunks: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Chunk(c) => Some(c),
                Frame::Done => None,
            })
            .collect();

        let tool_chunk = chunks.iter().find(|c| !c.choices.first().map(|ch| ch.delta.tool_calls.is_empty()).unwrap_or(true)).unwrap();
        let call = &tool_chunk.choices[0].delta.tool_calls[0];
        assert_eq!(call.index, 0);
        assert_eq!(call.function.as_ref().unwrap().arguments, "{\"q\":1}");

        assert!(chunks.iter().any(|c| c.choices.first().and_then(|ch| ch.finish_reason) == Some("tool_calls")));
    }

    #[tokio::test]
    async fn commentary_text_is_filtered_out() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_item.added\",\"item\":{\"type\":\"message\",\"id\":\"item_1\",\"phase\":\"commentary\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"item_1\",\"delta\":\"ignored\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store, ReasoningCompat::ThinkTags).collect().await;
        let has_ignored = frames.iter().any(|f| matches!(f, Frame::Chunk(c) if c.choices.first().and_then(|ch| ch.delta.content.as_deref()) == Some("ignored")));
        assert!(!has_ignored);
    }
}
