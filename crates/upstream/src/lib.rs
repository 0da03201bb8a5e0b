//! Talks to the single upstream Responses endpoint: builds payloads, sends
//! the streaming POST, retries the specific rejections upstream names, and
//! exposes a typed event reader to the translators.

mod client;
mod rate_limit;
mod sse;
mod tool_buffer;

pub use client::{StreamedResponse, UpstreamClient};
pub use rate_limit::RateLimitSnapshot;
pub use sse::SseReader;
pub use tool_buffer::ToolBuffer;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("credentials unavailable: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("failed to reach upstream: {0}")]
    Transport(reqwest::Error),

    #[error("upstream rejected the request ({status}): {body}")]
    Rejected {
        status: reqwest::StatusCode,
        headers: http::HeaderMap,
        body: String,
    },
}
