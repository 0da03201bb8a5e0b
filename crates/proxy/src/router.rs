//! Route table and cross-cutting middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::ExposeSecret;
use state::StateStore;
use tower_http::cors::CorsLayer;
use upstream::UpstreamClient;

use crate::error::ProxyError;
use crate::normaliser::Normaliser;
use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub normaliser: Arc<Normaliser>,
    pub upstream: Arc<UpstreamClient>,
    pub state_store: Arc<StateStore>,
    pub config: config::Config,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(routes::chat::completions))
        .route("/v1/completions", post(routes::chat::legacy_completions))
        .route("/v1/responses", post(routes::chat::responses))
        .route("/v1/models", get(routes::chat::list_models))
        .route("/v1/messages", post(routes::anthropic::messages))
        .route("/v1/messages/count_tokens", post(routes::anthropic::count_tokens))
        .route("/api/chat", post(routes::ollama::chat))
        .route("/api/tags", get(routes::ollama::tags))
        .route("/api/show", post(routes::ollama::show))
        .route("/api/version", get(routes::ollama::version))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "chatgpt-local proxy"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Rejects requests missing `Authorization: Bearer <token>` when an access
/// token is configured. With no token configured the header is ignored and
/// upstream auth is left entirely to stored credentials.
async fn require_bearer_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = &state.config.access_token else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected.expose_secret() => next.run(request).await,
        _ => ProxyError::Unauthorized("missing or invalid access token".to_string()).into_response(),
    }
}
