use std::sync::Arc;
use std::time::Duration;

use auth::TokenStore;
use futures::StreamExt;
use protocol::canonical::{CanonicalRequest, ContentPart};
use protocol::responses::RequestPayload;
use secrecy::ExposeSecret;
use serde_json::Value;
use session::SessionFingerprinter;

use crate::{RateLimitSnapshot, UpstreamError, sse::SseReader};

const DEFAULT_UPSTREAM_URL: &str = "https://chatgpt.com/backend-api/codex/responses";
const ORIGINATOR: &str = "chatgpt-local";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the outbound Responses payload, performs the streaming POST, and
/// owns the one retry upstream's finickiness requires.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    fingerprinter: Arc<SessionFingerprinter>,
    rate_limit_path: std::path::PathBuf,
}

pub struct StreamedResponse {
    pub reader: SseReader<tokio_util::io::StreamReader<BoxedByteStream, bytes::Bytes>>,
}

type BoxedByteStream = std::pin::Pin<Box<dyn futures::Stream<Item = std::io::Result<bytes::Bytes>> + Send>>;

impl UpstreamClient {
    pub fn new(tokens: Arc<TokenStore>, fingerprinter: Arc<SessionFingerprinter>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5 * 60))
                .build()
                .expect("failed to build upstream HTTP client"),
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            tokens,
            fingerprinter,
            rate_limit_path: config::rate_limit_snapshot_path(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(tokens: Arc<TokenStore>, fingerprinter: Arc<SessionFingerprinter>, base_url: impl Into<String>) -> Self {
        let mut client = Self::new(tokens, fingerprinter);
        client.base_url = base_url.into();
        client
    }

    /// Streams a request to upstream, retrying once per the adaptive rules
    /// if the first attempt is rejected.
    pub async fn stream(&self, request: &CanonicalRequest) -> Result<StreamedResponse, UpstreamError> {
        let session_id = self.fingerprinter.fingerprint(&request.instructions, request.first_user_message(), request.session_id.as_deref());

        let mut payload = build_payload(request, &session_id);
        let mut value = serde_json::to_value(&payload).expect("RequestPayload always serialises");

        let response = match self.send(&value, &session_id).await {
            Ok(response) => response,
            Err(first_err) => {
                if request.had_extra_tools && matches!(&first_err, UpstreamError::Rejected { status, .. } if status.is_client_error()) {
                    log::warn!("upstream rejected additive tools, retrying with base tool set");
                    payload.tools = request.base_tools.clone();
                    value = serde_json::to_value(&payload).expect("RequestPayload always serialises");
                    self.send(&value, &session_id).await?
                } else {
                    return Err(first_err);
                }
            }
        };

        Ok(StreamedResponse { reader: reader_from_response(response) })
    }

    /// Streams a raw, already-shaped Responses payload straight to upstream,
    /// bypassing `build_payload` so unknown client-set fields survive
    /// untouched. Used by the native-Responses passthrough fast path, which
    /// patches only `model`/`store`/`instructions`/`reasoning` before
    /// calling this.
    pub async fn stream_passthrough(&self, mut payload: Value, instructions: &str, first_user_message: Option<&[ContentPart]>) -> Result<StreamedResponse, UpstreamError> {
        let session_id = self.fingerprinter.fingerprint(instructions, first_user_message, None);

        if let Some(obj) = payload.as_object_mut() {
            obj.insert("prompt_cache_key".to_string(), Value::String(session_id.clone()));
            obj.insert("stream".to_string(), Value::Bool(true));
        }

        let response = self.send(&payload, &session_id).await?;
        Ok(StreamedResponse { reader: reader_from_response(response) })
    }

    async fn send(&self, payload: &Value, session_id: &str) -> Result<reqwest::Response, UpstreamError> {
        let (access_token, account_id) = self.tokens.access_token().await?;

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(access_token.expose_secret())
            .header("chatgpt-account-id", account_id)
            .header("session_id", session_id)
            .header("originator", ORIGINATOR)
            .header("version", CLIENT_VERSION)
            .header(reqwest::header::USER_AGENT, format!("{ORIGINATOR}/{CLIENT_VERSION}"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(payload)
            .send()
            .await
            .map_err(UpstreamError::Transport)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();

            if let Some(stripped) = strip_unsupported_param(payload, &body) {
                log::warn!("upstream rejected an unsupported parameter, retrying without it");
                return Box::pin(self.send(&stripped, session_id)).await;
            }

            return Err(UpstreamError::Rejected { status, headers, body });
        }

        if let Some(snapshot) = RateLimitSnapshot::from_headers(response.headers()) {
            snapshot.persist(&self.rate_limit_path);
        }

        Ok(response)
    }
}

fn reader_from_response(response: reqwest::Response) -> SseReader<tokio_util::io::StreamReader<BoxedByteStream, bytes::Bytes>> {
    let stream = response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));
    let reader = tokio_util::io::StreamReader::new(Box::pin(stream) as BoxedByteStream);
    SseReader::new(reader)
}

/// If the error body names a parameter this payload actually sent, strip it
/// and return the adjusted payload for one retry (notably `store`).
/// Returns `None` once nothing matches, so callers don't loop.
fn strip_unsupported_param(payload: &Value, error_body: &str) -> Option<Value> {
    if error_body.contains("store") && payload.get("store").map(|v| !v.is_null()).unwrap_or(false) {
        let mut retried = payload.clone();
        retried.as_object_mut()?.remove("store");
        return Some(retried);
    }
    None
}

fn build_payload(request: &CanonicalRequest, session_id: &str) -> RequestPayload {
    RequestPayload {
        model: request.model.clone(),
        instructions: request.instructions.clone(),
        input: request.input_items.clone(),
        tools: if request.had_extra_tools { request.tools.clone() } else { request.base_tools.clone() },
        tool_choice: request.tool_choice.clone(),
        parallel_tool_calls: request.parallel_tool_calls,
        // Invariant: upstream rejects anything but `false` here,
        // regardless of what the client requested.
        store: Some(false),
        stream: true,
        prompt_cache_key: session_id.to_string(),
        include: request.include.clone(),
        reasoning: Some(request.reasoning),
    }
}
