//! Wire and canonical types shared by every layer of the proxy.
//!
//! This crate has no behaviour of its own: it is the vocabulary the
//! normaliser, upstream client, and translators all speak: a per-dialect
//! `openai`/`anthropic`/`ollama` split, plus a `canonical` module for the
//! internal request/response shape and a `responses` module for the
//! upstream SSE wire format.

pub mod anthropic;
pub mod canonical;
pub mod ollama;
pub mod openai;
pub mod responses;

pub use canonical::{
    CanonicalRequest, ContentPart, InputItem, ReasoningCompat, ReasoningConfig, ReasoningEffort, ReasoningSummary,
    ResponseFormat, Role, Tool, ToolChoice, ToolKind, first_user_message,
};

/// Errors raised while decoding a client-supplied request shape into
/// canonical types. Distinct from the HTTP-facing error type in `proxy`,
/// which knows how to render these per dialect.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid content for {role} message: {reason}")]
    InvalidContent { role: &'static str, reason: String },

    #[error("tool choice must be 'auto', 'none', 'required', or a function reference")]
    InvalidToolChoice,

    #[error("responses_tools entries must be a web_search or web_search_preview variant")]
    UnsupportedResponsesTool,

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}
