//! Upstream events -> Ollama-compatible NDJSON chat lines.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use protocol::canonical::ReasoningCompat;
use protocol::ollama::{ChatResponseLine, ResponseMessage};
use protocol::responses::{Event, OutputItem};
use protocol::CanonicalRequest;
use state::StateStore;
use tokio::io::AsyncRead;
use upstream::SseReader;
use upstream::ToolBuffer;

use super::Capture;

pub enum Frame {
    Line(ChatResponseLine),
}

struct State<R> {
    reader: SseReader<R>,
    tools: ToolBuffer,
    store: Arc<StateStore>,
    request: CanonicalRequest,
    capture: Capture,
    pending: VecDeque<Frame>,
    think_open: bool,
    stream_ended: bool,
    succeeded: bool,
    compat: ReasoningCompat,
}

enum Cursor<R> {
    Running(State<R>),
    Finished,
}

/// Converts the upstream SSE stream into a lazily-polled stream of NDJSON
/// lines, the final one carrying `done:true` and fake timing fields. Runs on
/// the caller's own task; never spawns a worker.
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
        think_open: false,
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
                    finish_stream(&mut state, None);
                }
                Err(err) => {
                    log::warn!("upstream SSE read failed: {err}");
                    close_think_tag(&mut state);
                    finish_stream(&mut state, None);
                }
            }
        }
    })
}

fn handle_event<R>(state: &mut State<R>, event: Event) {
    match event {
        Event::Created { response } => {
            state.capture.response_id = Some(response.id);
        }

        Event::OutputItemAdded { item } => {
            if let OutputItem::FunctionCall { id, call_id, arguments, .. } = &item {
                state.tools.record_added(id, call_id.as_deref(), arguments.as_ref());
            }
        }

        Event::ReasoningSummaryTextDelta { delta, .. } | Event::ReasoningTextDelta { delta, .. } => {
            emit_reasoning(state, delta);
        }

        Event::OutputTextDelta { delta, .. } => {
            close_think_tag(state);
            emit_content(state, delta);
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

        Event::ReasoningSummaryPartAdded { .. } => {}

        Event::Completed { .. } => {
            state.succeeded = true;
            close_think_tag(state);
            finish_stream(state, None);
        }

        Event::Failed { response } => {
            close_think_tag(state);
            finish_stream(state, Some(format!("error: {}", response.error.message)));
        }

        Event::Unknown => {}
    }
}

fn handle_output_item_done<R>(state: &mut State<R>, item: OutputItem) {
    if let OutputItem::FunctionCall { id, call_id, name, arguments } = item {
        let call_id = call_id.unwrap_or_else(|| id.clone());
        let name = name.unwrap_or_default();
        state.tools.record_added(&id, Some(&call_id), None);

        let from_event = arguments.as_ref().map(value_to_argument_string).filter(|s| !is_empty_argument_string(s));
        let resolved = from_event.unwrap_or_else(|| state.tools.resolve_arguments(&id, Some(&call_id)));

        state.capture.record_call(call_id, name, resolved);
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

fn emit_reasoning<R>(state: &mut State<R>, text: String) {
    if state.compat == ReasoningCompat::ThinkTags {
        let mut content = String::new();
        if !state.think_open {
            content.push_str("<think>");
            state.think_open = true;
        }
        content.push_str(&text);
        emit_content(state, content);
    } else {
        emit_content(state, text);
    }
}

fn close_think_tag<R>(state: &mut State<R>) {
    if state.think_open {
        state.think_open = false;
        emit_content(state, "</think>".to_string());
    }
}

fn emit_content<R>(state: &mut State<R>, content: String) {
    state.pending.push_back(Frame::Line(ChatResponseLine {
        model: state.request.requested_model.clone(),
        created_at: now_rfc3339(),
        message: ResponseMessage { role: "assistant", content },
        done: false,
        done_reason: None,
        total_duration: None,
        load_duration: None,
        prompt_eval_count: None,
        eval_count: None,
    }));
}

fn finish_stream<R>(state: &mut State<R>, error: Option<String>) {
    let content = error.unwrap_or_default();
    state.pending.push_back(Frame::Line(ChatResponseLine {
        model: state.request.requested_model.clone(),
        created_at: now_rfc3339(),
        message: ResponseMessage { role: "assistant", content },
        done: true,
        done_reason: Some("stop"),
        total_duration: Some(0),
        load_duration: Some(0),
        prompt_eval_count: Some(0),
        eval_count: Some(0),
    }));
    state.stream_ended = true;
}

fn now_rfc3339() -> String {
    jiff::Timestamp::now().to_string()
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
            response_format: ResponseFormat::Ollama,
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
    async fn final_line_sets_done_and_fake_timing_fields() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"item_1\",\"delta\":\"hi\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store, ReasoningCompat::ThinkTags).collect().await;
        let Frame::Line(last) = frames.last().unwrap();
        assert!(last.done);
        assert_eq!(last.done_reason, Some("stop"));
        assert!(last.total_duration.is_some());

        let Frame::Line(first) = &frames[0];
        assert_eq!(first.message.content, "hi");
        assert!(!first.done);
    }

    #[tokio::test]
    async fn reasoning_is_wrapped_in_think_tags() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.reasoning_text.delta\",\"item_id\":\"item_1\",\"delta\":\"thinking\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"item_2\",\"delta\":\"answer\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store, ReasoningCompat::ThinkTags).collect().await;
        let lines: Vec<_> = frames.iter().map(|Frame::Line(l)| l.message.content.clone()).collect();
        assert_eq!(lines[0], "<think>thinking");
        assert_eq!(lines[1], "</think>");
        assert_eq!(lines[2], "answer");
    }
}
