//! HTTP client for the character/settings/chat backend.
//!
//! Every POST carries the backend's CSRF session token. The token is fetched
//! lazily, cached, and refreshed once when the backend answers 403.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::serde_utils::{parse_body_to_value, truncate_for_log};
use crate::utils::{log_info, log_warn};

pub mod characters;
pub mod chats;

pub use chats::ChatSummary;

use crate::chat_manager::types::Character;

pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Remote chat files, one list per character.
#[async_trait]
pub trait ChatArchive: Send + Sync {
    async fn save_chat(&self, character_id: &str, file_name: &str, records: Vec<Value>) -> Result<(), AppError>;
    async fn load_chat(&self, character_id: &str, file_name: &str) -> Result<Vec<Value>, AppError>;
    async fn list_chats(&self, character_id: &str) -> Result<Vec<ChatSummary>, AppError>;
}

/// Server-side secret storage for provider keys.
#[async_trait]
pub trait SecretSink: Send + Sync {
    async fn write_secret(&self, key: &str, value: &str, label: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> Result<Value, AppError>;
    async fn save_settings(&self, settings: &Value) -> Result<(), AppError>;
}

pub struct BackendClient {
    base_url: String,
    http: Client,
    csrf: Mutex<Option<String>>,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: &str, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            csrf: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Seeds the token cache, e.g. from a previous session.
    pub async fn set_csrf_token(&self, token: impl Into<String>) {
        *self.csrf.lock().await = Some(token.into());
    }

    /// Forgets the cached token; the next request fetches a fresh one.
    pub async fn reset(&self) {
        *self.csrf.lock().await = None;
    }

    async fn fetch_csrf_token(&self) -> Result<String, AppError> {
        let response = self.http.get(self.url("/csrf-token")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let data: Value = response.json().await?;
        data.get("token")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::Other("CSRF response carried no token".into()))
    }

    /// Cached token, fetching it on first use. Concurrent callers wait on the
    /// same fetch instead of issuing their own.
    pub async fn csrf_token(&self) -> Result<String, AppError> {
        let mut guard = self.csrf.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch_csrf_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn refresh_csrf_token(&self) -> Result<String, AppError> {
        let mut guard = self.csrf.lock().await;
        *guard = None;
        let token = self.fetch_csrf_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn send_post(&self, path: &str, body: &Value, token: &str) -> Result<Response, AppError> {
        self.http
            .post(self.url(path))
            .header(CSRF_HEADER, token)
            .json(body)
            .send()
            .await
            .map_err(AppError::from)
    }

    /// POSTs with the session token. A 403 triggers exactly one token
    /// refresh and one retry; the retry's response is returned as-is.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Response, AppError> {
        let token = self.csrf_token().await?;
        let response = self.send_post(path, body, &token).await?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }
        log_warn("backend", format!("{} rejected session token, refreshing", path));
        let token = self.refresh_csrf_token().await?;
        self.send_post(path, body, &token).await
    }

    /// [`post`](Self::post) plus status check and JSON decoding.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, AppError> {
        let response = self.post(path, body).await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&text, 512),
            });
        }
        Ok(parse_body_to_value(&text))
    }

    pub async fn get_characters(&self) -> Result<Vec<Character>, AppError> {
        let data = self.post_json("/api/characters/all", &json!({})).await?;
        let records = data.as_array().cloned().unwrap_or_default();
        let characters: Vec<Character> = records
            .iter()
            .filter_map(characters::character_from_record)
            .collect();
        log_info("backend", format!("loaded {} characters", characters.len()));
        Ok(characters)
    }

    pub async fn list_horde_models(&self) -> Result<Vec<String>, AppError> {
        let data = self
            .post_json("/api/horde/text-models", &json!({ "force": false }))
            .await?;
        Ok(data
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| {
                        m.as_str()
                            .or_else(|| m.get("name").and_then(|n| n.as_str()))
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Models served by a text-completion server, via the backend.
    pub async fn list_text_models(&self, api_server: &str, api_type: &str) -> Result<Vec<String>, AppError> {
        let data = self
            .post_json(
                "/api/backends/text-completions/models",
                &json!({ "api_server": api_server, "api_type": api_type }),
            )
            .await?;
        Ok(model_names(&data))
    }

    /// Probes a local server for the first api type that lists models.
    pub async fn detect_api_type(&self, api_server: &str) -> Option<&'static str> {
        for api_type in ["ooba", "koboldcpp", "llamacpp"] {
            match self.list_text_models(api_server, api_type).await {
                Ok(models) if !models.is_empty() => {
                    log_info("backend", format!("{} speaks {}", api_server, api_type));
                    return Some(api_type);
                }
                Ok(_) => {}
                Err(err) => log_warn("backend", format!("{} probe failed: {}", api_type, err)),
            }
        }
        None
    }
}

fn model_names(data: &Value) -> Vec<String> {
    let list = data
        .get("result")
        .and_then(|r| r.as_array())
        .or_else(|| data.as_array())
        .or_else(|| data.get("data").and_then(|d| d.as_array()));
    list.map(|items| {
        items
            .iter()
            .filter_map(|m| {
                m.as_str()
                    .or_else(|| m.get("id").and_then(|v| v.as_str()))
                    .or_else(|| m.get("name").and_then(|v| v.as_str()))
                    .map(str::to_string)
            })
            .collect()
    })
    .unwrap_or_default()
}

#[async_trait]
impl SecretSink for BackendClient {
    async fn write_secret(&self, key: &str, value: &str, label: &str) -> Result<(), AppError> {
        self.post_json(
            "/api/secrets/write",
            &json!({ "key": key, "value": value, "label": label }),
        )
        .await?;
        log_info("backend", format!("secret {} written", key));
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for BackendClient {
    async fn load_settings(&self) -> Result<Value, AppError> {
        let data = self.post_json("/api/settings/get", &json!({})).await?;
        // The settings blob arrives as a JSON string inside the envelope.
        match data.get("settings") {
            Some(Value::String(raw)) => Ok(serde_json::from_str(raw)?),
            Some(obj @ Value::Object(_)) => Ok(obj.clone()),
            _ => Ok(json!({})),
        }
    }

    async fn save_settings(&self, settings: &Value) -> Result<(), AppError> {
        self.post_json("/api/settings/save", settings).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatArchive for BackendClient {
    async fn save_chat(&self, character_id: &str, file_name: &str, records: Vec<Value>) -> Result<(), AppError> {
        chats::save_chat(self, character_id, file_name, records).await
    }

    async fn load_chat(&self, character_id: &str, file_name: &str) -> Result<Vec<Value>, AppError> {
        chats::get_chat(self, character_id, file_name).await
    }

    async fn list_chats(&self, character_id: &str) -> Result<Vec<ChatSummary>, AppError> {
        chats::search_chats(self, character_id).await
    }
}
