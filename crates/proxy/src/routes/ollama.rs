//! Ollama-compatible chat (NDJSON streaming), tag listing, model show, and
//! version endpoints.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum_serde::Sonic;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use protocol::ollama::{ChatRequest as OllamaChatRequest, ChatResponseLine, ResponseMessage, ShowDetails, ShowRequest, ShowResponse, TagModel, TagsResponse, VersionResponse};

use crate::error::ProxyError;
use crate::router::AppState;
use crate::translators::{self, OllamaFrame};

pub async fn chat(State(state): State<AppState>, Sonic(body): Sonic<OllamaChatRequest>) -> Result<Response, ProxyError> {
    let wants_stream = body.stream.unwrap_or(true);
    let request = state.normaliser.normalise_ollama(body).await?;
    let compat = state.config.reasoning_compat;
    let upstream = state.upstream.stream(&request).await?;
    let stream = translators::respond_ollama(request, upstream.reader, state.state_store.clone(), compat);

    if wants_stream {
        Ok(ndjson_response(stream))
    } else {
        Ok(Json(aggregate_chat(stream).await).into_response())
    }
}

pub async fn tags() -> Json<TagsResponse> {
    let models = config::MODEL_CATALOG
        .iter()
        .map(|m| TagModel {
            name: m.id.to_string(),
            model: m.id.to_string(),
            modified_at: jiff::Timestamp::now().to_string(),
            size: 0,
            digest: String::new(),
        })
        .collect();
    Json(TagsResponse { models })
}

pub async fn show(Sonic(body): Sonic<ShowRequest>) -> Result<Json<ShowResponse>, ProxyError> {
    let info = config::model_info(&body.model).ok_or_else(|| ProxyError::BadRequest(format!("unknown model '{}'", body.model)))?;

    Ok(Json(ShowResponse {
        modelfile: format!("FROM {}", info.id),
        parameters: String::new(),
        template: String::new(),
        details: ShowDetails {
            family: info.family.to_string(),
            parameter_size: String::new(),
        },
    }))
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse { version: env!("CARGO_PKG_VERSION") })
}

fn ndjson_response(stream: impl Stream<Item = OllamaFrame> + Send + 'static) -> Response {
    let body_stream = stream.map(|OllamaFrame::Line(line)| {
        let mut bytes = sonic_rs::to_vec(&line).unwrap_or_default();
        bytes.push(b'\n');
        Ok::<_, Infallible>(Bytes::from(bytes))
    });

    Response::builder()
        .header(axum::http::header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response())
}

async fn aggregate_chat(stream: impl Stream<Item = OllamaFrame>) -> ChatResponseLine {
    futures::pin_mut!(stream);

    let mut content = String::new();
    let mut final_line: Option<ChatResponseLine> = None;

    while let Some(OllamaFrame::Line(line)) = stream.next().await {
        if line.done {
            final_line = Some(line);
        } else {
            content.push_str(&line.message.content);
        }
    }

    let mut line = final_line.unwrap_or_else(|| ChatResponseLine {
        model: String::new(),
        created_at: String::new(),
        message: ResponseMessage { role: "assistant", content: String::new() },
        done: true,
        done_reason: Some("stop"),
        total_duration: Some(0),
        load_duration: Some(0),
        prompt_eval_count: Some(0),
        eval_count: Some(0),
    });

    if line.message.content.is_empty() {
        line.message.content = content;
    }
    line
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn line(content: &str, done: bool) -> ChatResponseLine {
        ChatResponseLine {
            model: "llama3".to_string(),
            created_at: String::new(),
            message: ResponseMessage { role: "assistant", content: content.to_string() },
            done,
            done_reason: if done { Some("stop") } else { None },
            total_duration: None,
            load_duration: None,
            prompt_eval_count: None,
            eval_count: None,
        }
    }

    #[tokio::test]
    async fn aggregate_chat_concatenates_fragments_into_final_line() {
        let frames = stream::iter(vec![
            OllamaFrame::Line(line("Hel", false)),
            OllamaFrame::Line(line("lo", false)),
            OllamaFrame::Line(line("", true)),
        ]);

        let result = aggregate_chat(frames).await;
        assert_eq!(result.message.content, "Hello");
        assert!(result.done);
        assert_eq!(result.done_reason, Some("stop"));
    }

    #[tokio::test]
    async fn aggregate_chat_preserves_error_content_on_final_line() {
        let frames = stream::iter(vec![OllamaFrame::Line(line("upstream error", true))]);

        let result = aggregate_chat(frames).await;
        assert_eq!(result.message.content, "upstream error");
    }
}
