//! Wires the normaliser, polyfill, upstream client, and translators behind
//! an axum router exposing the OpenAI, Anthropic, and Ollama dialects.

pub mod error;
mod normaliser;
mod polyfill;
mod router;
mod routes;
mod translators;

pub use normaliser::{Normaliser, Route};
pub use router::{build_router, AppState};
