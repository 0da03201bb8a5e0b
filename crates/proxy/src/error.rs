use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors the pipeline can produce before a response dialect is known.
/// Once a stream is open, upstream failures are instead turned into the
/// dialect's own in-stream error frame by the translator.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("upstream rejected the request: {body}")]
    UpstreamRejected { status: StatusCode, headers: HeaderMap, body: String },

    #[error("upstream is unreachable: {0}")]
    BadGateway(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<upstream::UpstreamError> for ProxyError {
    fn from(err: upstream::UpstreamError) -> Self {
        match err {
            upstream::UpstreamError::Auth(auth_err) => ProxyError::Unauthorized(auth_err.to_string()),
            upstream::UpstreamError::Transport(e) => ProxyError::BadGateway(e.to_string()),
            upstream::UpstreamError::Rejected { status, headers, body } => ProxyError::UpstreamRejected { status, headers, body },
        }
    }
}

/// Response headers that describe the upstream HTTP body we no longer
/// forward verbatim (we render our own JSON envelope instead).
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection", "content-encoding"];

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::UpstreamRejected { status, .. } => *status,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ProxyError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        if matches!(self, ProxyError::Internal(_)) {
            log::error!("internal proxy error: {self}");
        }

        let status = self.status();
        let upstream_headers = match &self {
            ProxyError::UpstreamRejected { headers, .. } => Some(headers.clone()),
            _ => None,
        };
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                message: self.message(),
                r#type: error_type(&self).to_string(),
                code: status.as_u16(),
            },
        };

        let mut response = (status, Json(envelope)).into_response();
        if let Some(headers) = upstream_headers {
            for (name, value) in headers.iter() {
                if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                    continue;
                }
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
    }
}

fn error_type(err: &ProxyError) -> &'static str {
    match err {
        ProxyError::BadRequest(_) => "invalid_request_error",
        ProxyError::Unauthorized(_) => "authentication_error",
        ProxyError::UpstreamRejected { .. } => "api_error",
        ProxyError::BadGateway(_) => "api_error",
        ProxyError::Internal(_) => "internal_error",
    }
}
