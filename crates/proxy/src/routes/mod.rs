//! Axum handlers: decode a client body, normalise it, call upstream, and
//! render the translator's frame stream back in that dialect's shape.

pub mod anthropic;
pub mod chat;
pub mod ollama;
