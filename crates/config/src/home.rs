//! Resolves the directory credentials and the rate-limit snapshot live in.
//!
//! Order: `CHATGPT_LOCAL_HOME`, then `CODEX_HOME`, else
//! `~/.chatgpt-local`.

use std::path::PathBuf;

pub fn home_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CHATGPT_LOCAL_HOME") {
        return PathBuf::from(dir);
    }

    if let Ok(dir) = std::env::var("CODEX_HOME") {
        return PathBuf::from(dir);
    }

    directory_in_user_home()
}

#[cfg(unix)]
fn directory_in_user_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
    PathBuf::from(home).join(".chatgpt-local")
}

#[cfg(not(unix))]
fn directory_in_user_home() -> PathBuf {
    let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".chatgpt-local")
}

pub fn credentials_path() -> PathBuf {
    home_dir().join("auth.json")
}

pub fn rate_limit_snapshot_path() -> PathBuf {
    home_dir().join("rate_limits.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_chatgpt_local_home_over_codex_home() {
        temp_env::with_vars(
            [
                ("CHATGPT_LOCAL_HOME", Some("/tmp/a")),
                ("CODEX_HOME", Some("/tmp/b")),
            ],
            || {
                assert_eq!(home_dir(), PathBuf::from("/tmp/a"));
            },
        );
    }

    #[test]
    fn falls_back_to_codex_home() {
        temp_env::with_vars(
            [("CHATGPT_LOCAL_HOME", None::<&str>), ("CODEX_HOME", Some("/tmp/b"))],
            || {
                assert_eq!(home_dir(), PathBuf::from("/tmp/b"));
            },
        );
    }
}
