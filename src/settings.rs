use std::path::PathBuf;

use anyhow::{Context, Result};

/// Process-level options for the client core, read once at startup.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base URL of the character/settings/chat backend.
    pub backend_url: String,
    /// Directory holding the local key-value database.
    pub data_dir: PathBuf,
    pub request_timeout_ms: u64,
    pub log_filter: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".into(),
            data_dir: PathBuf::from("."),
            request_timeout_ms: 120_000,
            log_filter: None,
            log_dir: None,
        }
    }
}

impl ClientSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let request_timeout_ms = match lookup("ROMANBATH_REQUEST_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid ROMANBATH_REQUEST_TIMEOUT_MS: {}", raw))?,
            None => defaults.request_timeout_ms,
        };

        Ok(Self {
            backend_url: lookup("ROMANBATH_BACKEND_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.backend_url),
            data_dir: lookup("ROMANBATH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            request_timeout_ms,
            log_filter: lookup("ROMANBATH_LOG"),
            log_dir: lookup("ROMANBATH_LOG_DIR").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset() {
        let settings = ClientSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.backend_url, "http://127.0.0.1:8000");
        assert_eq!(settings.request_timeout_ms, 120_000);
    }

    #[test]
    fn env_values_override_defaults() {
        let env: HashMap<&str, &str> = [
            ("ROMANBATH_BACKEND_URL", "http://tavern.local:8000/"),
            ("ROMANBATH_REQUEST_TIMEOUT_MS", "5000"),
        ]
        .into_iter()
        .collect();
        let settings = ClientSettings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.backend_url, "http://tavern.local:8000");
        assert_eq!(settings.request_timeout_ms, 5000);
    }

    #[test]
    fn bad_timeout_is_reported() {
        let err = ClientSettings::from_lookup(|k| {
            (k == "ROMANBATH_REQUEST_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("ROMANBATH_REQUEST_TIMEOUT_MS"));
    }
}
