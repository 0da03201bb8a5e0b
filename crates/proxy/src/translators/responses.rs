//! Upstream events -> native Responses-style SSE, for clients that already
//! speak the upstream wire format directly.
//! Re-emits what it parsed rather than piping raw bytes, so it can still
//! tee state capture the same way the other three translators do.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use protocol::responses::{Event, OutputItem};
use protocol::CanonicalRequest;
use state::StateStore;
use tokio::io::AsyncRead;
use upstream::SseReader;
use upstream::ToolBuffer;

use super::Capture;

pub enum Frame {
    Event(Event),
    Done,
}

struct State<R> {
    reader: SseReader<R>,
    tools: ToolBuffer,
    store: Arc<StateStore>,
    request: CanonicalRequest,
    capture: Capture,
    pending: VecDeque<Frame>,
    stream_ended: bool,
    succeeded: bool,
}

enum Cursor<R> {
    Running(State<R>),
    Finished,
}

/// Forwards each parsed upstream event to the client essentially unchanged,
/// while still recording completed function calls into `Capture` so a
/// future turn's previous-response polyfill has something to resolve
/// against. Runs on the caller's own task; never spawns a worker.
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
                Ok(None) => close_stream(&mut state),
                Err(err) => {
                    log::warn!("upstream SSE read failed: {err}");
                    close_stream(&mut state);
                }
            }
        }
    })
}

fn handle_event<R>(state: &mut State<R>, event: Event) {
    match &event {
        Event::Created { response } => {
            state.capture.response_id = Some(response.id.clone());
        }

        Event::OutputItemAdded { item } => {
            if let OutputItem::FunctionCall { id, call_id, arguments, .. } = item {
                state.tools.record_added(id, call_id.as_deref(), arguments.as_ref());
            }
        }

        Event::FunctionCallArgumentsDelta { item_id, delta, call_id } => {
            state.tools.append_delta(item_id, call_id.as_deref(), delta);
        }

        Event::FunctionCallArgumentsDone { item_id, arguments, call_id, item } => {
            let embedded = item.as_ref().and_then(|item| match item {
                OutputItem::FunctionCall { arguments, .. } => arguments.as_ref(),
                _ => None,
            });
            state.tools.record_done(item_id, call_id.as_deref(), arguments.as_ref(), embedded);
        }

        Event::OutputItemDone { item } => {
            if let OutputItem::FunctionCall { id, call_id, name, arguments } = item {
                let call_id = call_id.clone().unwrap_or_else(|| id.clone());
                let name = name.clone().unwrap_or_default();
                let from_event = arguments.as_ref().map(|v| v.to_string()).filter(|s| !matches!(s.trim(), "" | "{}" | "null" | "[]"));
                let resolved = from_event.unwrap_or_else(|| state.tools.resolve_arguments(id, Some(&call_id)));
                state.capture.record_call(call_id, name, resolved);
            }
        }

        Event::Completed { .. } => {
            state.succeeded = true;
            state.pending.push_back(Frame::Event(event));
            close_stream(state);
            return;
        }

        Event::Failed { .. } => {
            state.pending.push_back(Frame::Event(event));
            close_stream(state);
            return;
        }

        _ => {}
    }

    state.pending.push_back(Frame::Event(event));
}

fn close_stream<R>(state: &mut State<R>) {
    state.pending.push_back(Frame::Done);
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
            response_format: ResponseFormat::Responses,
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
    async fn forwards_events_and_terminates_with_done() {
        let store = Arc::new(StateStore::new(10, Duration::from_secs(60)));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"item_id\":\"item_1\",\"delta\":\"hi\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let frames: Vec<Frame> = respond(request(), sse(body), store).collect().await;
        assert!(matches!(frames[0], Frame::Event(Event::Created { .. })));
        assert!(matches!(frames[1], Frame::Event(Event::OutputTextDelta { .. })));
        assert!(matches!(frames[2], Frame::Event(Event::Completed { .. })));
        assert!(matches!(frames[3], Frame::Done));
    }

    #[tokio::test]
    async fn captures_function_call_for_future_polyfill() {
        let store = Arc::clone(&Arc::new(StateStore::new(10, Duration::from_secs(60))));
        let body = concat!(
            "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"function_call\",\"id\":\"item_1\",\"call_id\":\"call_1\",\"name\":\"search\",\"arguments\":\"{\\\"q\\\":1}\"}}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: [DONE]\n\n",
        );

        let _frames: Vec<Frame> = respond(request(), sse(body), Arc::clone(&store)).collect().await;
        let snapshot = store.get_response("resp_1").await;
        assert!(snapshot.is_some());
        assert!(snapshot.unwrap().calls.contains_key("call_1"));
    }
}
