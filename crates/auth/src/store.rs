use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::{AuthError, CredentialFile, Credentials, Result, jwt};

/// Serialises refreshes behind a single mutex and persists the result
/// atomically.
pub struct TokenStore {
    path: PathBuf,
    refresh_url: String,
    client: reqwest::Client,
    state: Mutex<Option<CredentialFile>>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, refresh_url: impl Into<String>) -> Arc<Self> {
        let path = path.into();
        let initial = load_from_disk(&path).ok();

        Arc::new(Self {
            path,
            refresh_url: refresh_url.into(),
            client: reqwest::Client::new(),
            state: Mutex::new(initial),
        })
    }

    /// Returns a usable access token, refreshing first if the token is
    /// missing, near expiry, or stale with an undecodable `exp`.
    pub async fn access_token(&self) -> Result<(SecretString, String)> {
        let mut guard = self.state.lock().await;

        let Some(file) = guard.as_mut() else {
            return Err(AuthError::NotFound(self.path.clone()));
        };

        if needs_refresh(file) {
            match self.do_refresh(&file.tokens.refresh_token).await {
                Ok(refreshed) => {
                    file.tokens = refreshed;
                    file.last_refresh = jiff::Timestamp::now();

                    if let Err(err) = persist(&self.path, file) {
                        log::warn!("failed to persist refreshed credentials: {err}");
                    }
                }
                Err(err) => {
                    log::warn!("token refresh failed, using stale access token opportunistically: {err}");
                }
            }
        }

        Ok((file.tokens.access_token.clone(), file.tokens.account_id.clone()))
    }

    /// Persists credentials obtained out-of-band: the actual browser/PKCE
    /// dance is an external collaborator; this just records its result.
    pub async fn save(&self, tokens: Credentials) -> Result<()> {
        let file = CredentialFile {
            tokens,
            last_refresh: jiff::Timestamp::now(),
        };

        persist(&self.path, &file)?;
        *self.state.lock().await = Some(file);

        Ok(())
    }

    async fn do_refresh(&self, refresh_token: &SecretString) -> Result<Credentials> {
        #[derive(serde::Serialize)]
        struct RefreshRequest<'a> {
            grant_type: &'static str,
            refresh_token: &'a str,
        }

        #[derive(serde::Deserialize)]
        struct RefreshResponse {
            id_token: String,
            access_token: String,
            refresh_token: String,
            account_id: String,
        }

        let response = self
            .client
            .post(&self.refresh_url)
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::RefreshFailed(format!("upstream returned {}", response.status())));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("invalid refresh response: {e}")))?;

        Ok(Credentials {
            id_token: body.id_token.into(),
            access_token: body.access_token.into(),
            refresh_token: body.refresh_token.into(),
            account_id: body.account_id,
        })
    }
}

const REFRESH_MARGIN_SECS: i64 = 5 * 60;
const STALE_REFRESH_WINDOW_SECS: i64 = 55 * 60;

fn needs_refresh(file: &CredentialFile) -> bool {
    let now = jiff::Timestamp::now().as_second();

    match jwt::decode_exp(&file.tokens.access_token) {
        Some(exp) => now + REFRESH_MARGIN_SECS >= exp,
        None => now - file.last_refresh.as_second() >= STALE_REFRESH_WINDOW_SECS,
    }
}

fn load_from_disk(path: &Path) -> Result<CredentialFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn persist(path: &Path, file: &CredentialFile) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    set_permissions(dir, 0o700)?;

    let json = serde_json::to_vec_pretty(file)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write as _;
    tmp.write_all(&json)?;
    set_permissions(tmp.path(), 0o600)?;
    tmp.persist(path).map_err(|e| AuthError::Io(e.error))?;

    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let store = TokenStore::new(&path, "https://example.invalid/refresh");
        store
            .save(Credentials {
                id_token: "id".to_string().into(),
                access_token: "access".to_string().into(),
                refresh_token: "refresh".to_string().into(),
                account_id: "acct_1".to_string(),
            })
            .await
            .unwrap();

        let (token, account) = store.access_token().await.unwrap();
        assert_eq!(secrecy::ExposeSecret::expose_secret(&token), "access");
        assert_eq!(account, "acct_1");
    }

    #[tokio::test]
    async fn missing_credentials_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let store = TokenStore::new(&path, "https://example.invalid/refresh");

        let err = store.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }
}
