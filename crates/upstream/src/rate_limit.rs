//! Best-effort capture of upstream's rate-limit bookkeeping headers into the
//! on-disk snapshot the `info` command reads. Never blocks or fails a
//! request: a write error is logged and dropped.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub captured_at: jiff::Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<Window>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Window>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub used_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_in_seconds: Option<u64>,
}

impl RateLimitSnapshot {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Option<Self> {
        let primary = window_from_headers(headers, "primary");
        let secondary = window_from_headers(headers, "secondary");

        if primary.is_none() && secondary.is_none() {
            return None;
        }

        Some(Self {
            captured_at: jiff::Timestamp::now(),
            primary,
            secondary,
        })
    }

    pub fn persist(&self, path: &Path) {
        if let Err(err) = self.try_persist(path) {
            log::warn!("failed to persist rate-limit snapshot: {err}");
        }
    }

    fn try_persist(&self, path: &Path) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write as _;
        tmp.write_all(&json)?;
        tmp.persist(path).map_err(|e| e.error)?;

        Ok(())
    }

    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

fn window_from_headers(headers: &reqwest::header::HeaderMap, prefix: &str) -> Option<Window> {
    let used_percent = header_f32(headers, &format!("x-codex-{prefix}-used-percent"))?;
    let window_minutes = header_u32(headers, &format!("x-codex-{prefix}-window-minutes"));
    let resets_in_seconds = header_u64(headers, &format!("x-codex-{prefix}-reset-after-seconds"));

    Some(Window {
        used_percent,
        window_minutes,
        resets_in_seconds,
    })
}

fn header_f32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<f32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_u32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_limits.json");

        let snapshot = RateLimitSnapshot {
            captured_at: jiff::Timestamp::now(),
            primary: Some(Window {
                used_percent: 42.0,
                window_minutes: Some(60),
                resets_in_seconds: Some(120),
            }),
            secondary: None,
        };
        snapshot.persist(&path);

        let loaded = RateLimitSnapshot::load(&path).unwrap();
        assert_eq!(loaded.primary.unwrap().used_percent, 42.0);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RateLimitSnapshot::load(&dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn headers_without_usage_fields_yield_no_snapshot() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(RateLimitSnapshot::from_headers(&headers).is_none());
    }

    #[test]
    fn headers_with_window_minutes_populate_the_field() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-codex-primary-used-percent", "10".parse().unwrap());
        headers.insert("x-codex-primary-window-minutes", "300".parse().unwrap());

        let snapshot = RateLimitSnapshot::from_headers(&headers).unwrap();
        assert_eq!(snapshot.primary.unwrap().window_minutes, Some(300));
        assert!(snapshot.secondary.is_none());
    }
}
