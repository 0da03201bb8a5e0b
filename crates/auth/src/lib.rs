//! Persists OAuth-style credentials and keeps the upstream access token
//! fresh.
//!
//! Obtaining the very first token via a browser/PKCE flow is out of scope;
//! this crate only owns what happens to a token once it exists: reading it
//! from disk, deciding when it needs refreshing, calling the refresh
//! endpoint, and writing the result back atomically.

mod credentials;
mod jwt;
mod store;

pub use credentials::{CredentialFile, Credentials};
pub use store::TokenStore;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials found at {0}")]
    NotFound(std::path::PathBuf),

    #[error("failed to read credentials: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse credentials: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
