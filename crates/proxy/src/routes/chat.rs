//! OpenAI-compatible chat completions, legacy completions, native Responses
//! passthrough, and model listing.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::Event as SseEvent;
use axum::response::{IntoResponse, Json, Response, Sse};
use axum_serde::Sonic;
use futures::{Stream, StreamExt};
use protocol::canonical::{ReasoningConfig, ResponseFormat, ToolChoice};
use protocol::openai::{ChatCompletionRequest, ChatCompletionResponse, Choice, Model, ModelsResponse, ResponseMessage, ToolCall, UsageBlock};
use protocol::responses::{Event, NativeOutputItem, NativeResponse, OutputItem};
use protocol::{CanonicalRequest, InputItem};
use serde_json::Value;

use crate::error::ProxyError;
use crate::normaliser::Route;
use crate::router::AppState;
use crate::translators::{self, ChatFrame, ResponsesFrame};

pub async fn completions(State(state): State<AppState>, Sonic(body): Sonic<ChatCompletionRequest>) -> Result<Response, ProxyError> {
    dispatch(state, Route::Chat, body).await
}

pub async fn legacy_completions(State(state): State<AppState>, Sonic(body): Sonic<ChatCompletionRequest>) -> Result<Response, ProxyError> {
    dispatch(state, Route::Completions, body).await
}

/// `/v1/responses` accepts both an OpenAI-chat-shaped body and a body
/// already shaped as native Responses input. The latter takes the
/// passthrough fast path: only `model`/`store`/`instructions`/`reasoning`
/// are patched in the raw JSON map, and everything else the client sent
/// (metadata, custom tool formats, unknown fields) rides to upstream
/// untouched.
pub async fn responses(State(state): State<AppState>, Sonic(body): Sonic<Value>) -> Result<Response, ProxyError> {
    let native_items = body.get("input").and_then(|v| serde_json::from_value::<Vec<InputItem>>(v.clone()).ok());

    match (native_items, body.get("messages")) {
        (Some(items), None) => passthrough_responses(state, body, items).await,
        _ => {
            let chat_body: ChatCompletionRequest = serde_json::from_value(body).map_err(|err| ProxyError::BadRequest(err.to_string()))?;
            dispatch(state, Route::Responses, chat_body).await
        }
    }
}

/// Patches only what the proxy must control, resolves previous-response
/// and conversation context the same way the typed dialects do, then
/// forwards the rest of the client's raw JSON map straight to upstream.
async fn passthrough_responses(state: AppState, mut raw: Value, items: Vec<InputItem>) -> Result<Response, ProxyError> {
    let obj = raw.as_object_mut().ok_or_else(|| ProxyError::BadRequest("request body must be a JSON object".to_string()))?;

    let requested_model = obj.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let model = state.normaliser.effective_model(&requested_model);
    obj.insert("model".to_string(), Value::String(model.clone()));
    obj.insert("store".to_string(), Value::Bool(false));

    let stream = obj.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let reasoning_override = obj.get("reasoning").cloned();
    let (effort, summary) = state.normaliser.resolve_reasoning(&model, reasoning_override.as_ref());
    let reasoning = ReasoningConfig { effort, summary };
    obj.insert("reasoning".to_string(), serde_json::to_value(&reasoning).expect("ReasoningConfig always serialises"));

    let previous_response_id = obj.remove("previous_response_id").and_then(|v| v.as_str().map(str::to_string));
    let conversation_id = obj.remove("conversation_id").and_then(|v| v.as_str().map(str::to_string));

    let explicit_instructions = obj
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty());

    let (resolved_items, resolved_previous, auto_previous, inherited_instructions) =
        state.normaliser.resolve_context(items, previous_response_id, conversation_id.clone()).await?;

    let instructions = explicit_instructions.or(inherited_instructions).unwrap_or_else(|| config::default_system_prompt(&model).to_string());
    obj.insert("instructions".to_string(), Value::String(instructions.clone()));
    obj.insert("input".to_string(), serde_json::to_value(&resolved_items).expect("InputItem always serialises"));

    let upstream = state
        .upstream
        .stream_passthrough(raw, &instructions, protocol::canonical::first_user_message(&resolved_items))
        .await?;

    let request = CanonicalRequest {
        response_format: ResponseFormat::Responses,
        model,
        requested_model,
        stream,
        include_usage: false,
        input_items: resolved_items,
        instructions,
        tools: Vec::new(),
        base_tools: Vec::new(),
        had_extra_tools: false,
        tool_choice: ToolChoice::Auto,
        parallel_tool_calls: true,
        previous_response_id: resolved_previous,
        conversation_id,
        auto_previous_response_id: auto_previous,
        reasoning,
        store_requested: false,
        store_for_upstream: false,
        include: Vec::new(),
        session_id: None,
    };

    let model_for_aggregate = request.requested_model.clone();
    let stream_frames = translators::respond_responses(request, upstream.reader, state.state_store.clone());
    if stream {
        return Ok(responses_sse(stream_frames));
    }
    Ok(Json(aggregate_responses(stream_frames, model_for_aggregate).await).into_response())
}

async fn dispatch(state: AppState, route: Route, body: ChatCompletionRequest) -> Result<Response, ProxyError> {
    let request = state.normaliser.normalise_openai(route, body).await?;
    let wants_stream = request.stream;
    let model = request.requested_model.clone();
    let upstream = state.upstream.stream(&request).await?;

    if request.response_format == ResponseFormat::Responses {
        let stream = translators::respond_responses(request, upstream.reader, state.state_store.clone());
        if wants_stream {
            return Ok(responses_sse(stream));
        }
        return Ok(Json(aggregate_responses(stream, model).await).into_response());
    }

    let compat = state.config.reasoning_compat;
    let stream = translators::respond_chat(request, upstream.reader, state.state_store.clone(), compat);
    if wants_stream {
        return Ok(chat_sse(stream));
    }
    Ok(Json(aggregate_chat(stream).await).into_response())
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let created = jiff::Timestamp::now().as_second();
    let catalog = config::MODEL_CATALOG.iter().filter(|m| state.config.expose_reasoning_models || !m.reasoning);

    if headers.contains_key("anthropic-version") {
        let data = catalog
            .map(|m| protocol::anthropic::Model {
                id: m.id.to_string(),
                r#type: "model",
                display_name: m.id.to_string(),
            })
            .collect();
        Json(protocol::anthropic::ModelsResponse { data, has_more: false }).into_response()
    } else {
        let data = catalog
            .map(|m| Model {
                id: m.id.to_string(),
                object: "model",
                created,
                owned_by: "chatgpt-local",
            })
            .collect();
        Json(ModelsResponse { object: "list", data }).into_response()
    }
}

fn chat_sse(stream: impl Stream<Item = ChatFrame> + Send + 'static) -> Response {
    let events = stream.map(|frame| {
        let event = match frame {
            ChatFrame::Chunk(chunk) => {
                let json = sonic_rs::to_string(&chunk).unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"));
                SseEvent::default().data(json)
            }
            ChatFrame::Done => SseEvent::default().data("[DONE]"),
        };
        Ok::<_, Infallible>(event)
    });
    Sse::new(events).into_response()
}

fn responses_sse(stream: impl Stream<Item = ResponsesFrame> + Send + 'static) -> Response {
    let events = stream.map(|frame| {
        let event = match frame {
            ResponsesFrame::Event(event) => {
                let json = sonic_rs::to_string(&event).unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"));
                SseEvent::default().data(json)
            }
            ResponsesFrame::Done => SseEvent::default().data("[DONE]"),
        };
        Ok::<_, Infallible>(event)
    });
    Sse::new(events).into_response()
}

async fn aggregate_chat(stream: impl Stream<Item = ChatFrame>) -> ChatCompletionResponse {
    futures::pin_mut!(stream);

    let mut id = String::new();
    let mut created = 0i64;
    let mut model = String::new();
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;
    let mut usage: Option<UsageBlock> = None;

    while let Some(frame) = stream.next().await {
        let ChatFrame::Chunk(chunk) = frame else { continue };
        id = chunk.id;
        created = chunk.created;
        model = chunk.model;
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                content.push_str(&text);
            }
            if let Some(text) = choice.delta.reasoning {
                reasoning.push_str(&text);
            }
            for call in choice.delta.tool_calls {
                if let Some(function) = call.function {
                    tool_calls.push(ToolCall {
                        id: call.id.unwrap_or_default(),
                        r#type: call.r#type.map(str::to_string),
                        function,
                    });
                }
            }
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }
    }

    ChatCompletionResponse {
        id,
        object: "chat.completion",
        created,
        model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: if content.is_empty() { None } else { Some(content) },
                reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
                tool_calls,
            },
            finish_reason,
        }],
        usage,
    }
}

async fn aggregate_responses(stream: impl Stream<Item = ResponsesFrame>, model: String) -> NativeResponse {
    futures::pin_mut!(stream);

    let mut id = String::new();
    let mut status = "completed";
    let mut output_text = String::new();
    let mut output = Vec::new();
    let mut usage = None;

    while let Some(frame) = stream.next().await {
        let ResponsesFrame::Event(event) = frame else { continue };
        match event {
            Event::Created { response } => id = response.id,
            Event::OutputTextDelta { delta, .. } => output_text.push_str(&delta),
            Event::OutputItemDone { item } => {
                if let OutputItem::FunctionCall { id: item_id, call_id, name, arguments } = item {
                    output.push(NativeOutputItem {
                        r#type: "function_call",
                        call_id: call_id.unwrap_or(item_id),
                        name: name.unwrap_or_default(),
                        arguments: arguments.map(|v| v.to_string()).unwrap_or_default(),
                    });
                }
            }
            Event::Completed { response } => usage = response.usage,
            Event::Failed { response } => {
                status = "failed";
                output_text = response.error.message;
            }
            _ => {}
        }
    }

    NativeResponse {
        id,
        object: "response",
        model,
        status,
        output_text,
        output,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use protocol::openai::{ChatCompletionChunk, ChunkChoice, Delta};

    use super::*;

    fn chunk(content: Option<&str>, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion.chunk",
            created: 1700000000,
            model: "gpt-5".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    content: content.map(str::to_string),
                    ..Default::default()
                },
                finish_reason,
            }],
            usage: None,
        }
    }

    #[tokio::test]
    async fn aggregate_chat_concatenates_content_deltas() {
        let frames = stream::iter(vec![
            ChatFrame::Chunk(chunk(Some("Hel"), None)),
            ChatFrame::Chunk(chunk(Some("lo"), Some("stop"))),
            ChatFrame::Done,
        ]);

        let response = aggregate_chat(frames).await;
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(response.choices[0].finish_reason, Some("stop"));
    }

    #[tokio::test]
    async fn aggregate_responses_collects_output_text_and_function_calls() {
        let frames = stream::iter(vec![
            ResponsesFrame::Event(Event::Created {
                response: protocol::responses::ResponseMeta {
                    id: "resp_1".to_string(),
                    usage: None,
                },
            }),
            ResponsesFrame::Event(Event::OutputTextDelta {
                item_id: "item_1".to_string(),
                delta: "hi".to_string(),
            }),
            ResponsesFrame::Event(Event::OutputItemDone {
                item: OutputItem::FunctionCall {
                    id: "item_2".to_string(),
                    call_id: Some("call_1".to_string()),
                    name: Some("lookup".to_string()),
                    arguments: Some(serde_json::json!({"q": "rust"})),
                },
            }),
            ResponsesFrame::Done,
        ]);

        let response = aggregate_responses(frames, "gpt-5".to_string()).await;
        assert_eq!(response.id, "resp_1");
        assert_eq!(response.output_text, "hi");
        assert_eq!(response.output.len(), 1);
        assert_eq!(response.output[0].call_id, "call_1");
        assert_eq!(response.output[0].name, "lookup");
    }
}
