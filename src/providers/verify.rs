use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use super::config::{provider_spec, resolve_base_url};
use super::util::{apply_query_key, build_headers};
use crate::serde_utils::redact_url;
use crate::utils::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Valid,
    RateLimited,
    InvalidKey,
    ApiError,
    Unreachable,
    /// No probe exists for this provider.
    Untested,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub provider_id: String,
    pub ok: bool,
    pub status: ConnectionStatus,
    pub http_status: Option<u16>,
    pub message: String,
}

impl ConnectionTestResult {
    fn new(provider_id: &str, status: ConnectionStatus, http_status: Option<u16>) -> Self {
        let (ok, message) = match status {
            ConnectionStatus::Valid => (true, "API connection verified ✓".to_string()),
            ConnectionStatus::RateLimited => (true, "API Key valid (rate limited)".to_string()),
            ConnectionStatus::InvalidKey => (false, "Invalid API Key".to_string()),
            ConnectionStatus::ApiError => (
                false,
                format!("API error: {}", http_status.unwrap_or_default()),
            ),
            ConnectionStatus::Unreachable => {
                (false, "Network error - cannot reach API".to_string())
            }
            ConnectionStatus::Untested => (true, "API Key saved (no test available)".to_string()),
        };
        Self {
            provider_id: provider_id.to_string(),
            ok,
            status,
            http_status,
            message,
        }
    }
}

pub fn classify_status(status: u16) -> ConnectionStatus {
    match status {
        200..=299 => ConnectionStatus::Valid,
        401 | 403 => ConnectionStatus::InvalidKey,
        429 => ConnectionStatus::RateLimited,
        _ => ConnectionStatus::ApiError,
    }
}

enum Probe {
    Get(String),
    /// One-token completion for providers without a model listing.
    TinyChat(String),
}

fn probe_for(provider_id: &str, base: &str) -> Option<Probe> {
    let probe = match provider_id {
        "openai" | "openrouter" | "local" | "google" => Probe::Get(format!("{}/models", base)),
        "perplexity" => Probe::TinyChat(format!("{}/chat/completions", base)),
        "koboldhorde" => Probe::Get(format!("{}/v2/find_user", base)),
        "ollama" => Probe::Get(format!("{}/api/tags", base)),
        "textgenerationwebui" => Probe::Get(format!("{}/v1/models", base)),
        "kobold" => Probe::Get(format!("{}/api/v1/model", base)),
        "llamacpp" => Probe::Get(format!("{}/health", base)),
        _ => return None,
    };
    Some(probe)
}

/// Issues one lightweight authenticated request and classifies the outcome.
/// Never fails; every outcome is a result value.
#[derive(Clone)]
pub struct ConnectionTester {
    client: Client,
}

impl ConnectionTester {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn test(
        &self,
        provider_id: &str,
        api_key: Option<&str>,
        base_url: Option<&str>,
        model: Option<&str>,
    ) -> ConnectionTestResult {
        let spec = match provider_spec(provider_id) {
            Some(spec) => spec,
            None => return ConnectionTestResult::new(provider_id, ConnectionStatus::Untested, None),
        };
        let base = resolve_base_url(spec, base_url);
        let probe = match probe_for(spec.id, &base) {
            Some(probe) => probe,
            None => return ConnectionTestResult::new(provider_id, ConnectionStatus::Untested, None),
        };

        let headers = match build_headers(spec.auth, api_key) {
            Ok(headers) => headers,
            Err(err) => {
                log_warn("connection_tester", format!("{}: {}", provider_id, err));
                return ConnectionTestResult::new(provider_id, ConnectionStatus::InvalidKey, None);
            }
        };

        let request = match &probe {
            Probe::Get(url) => {
                let url = apply_query_key(url, spec.auth, api_key);
                log_info("connection_tester", format!("GET {}", redact_url(&url)));
                self.client.get(url).headers(headers)
            }
            Probe::TinyChat(url) => {
                log_info("connection_tester", format!("POST {}", url));
                self.client.post(url).headers(headers).json(&json!({
                    "model": model
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .or(spec.default_model)
                        .unwrap_or("sonar"),
                    "messages": [{ "role": "user", "content": "Hi" }],
                    "max_tokens": 1,
                }))
            }
        };

        let result = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                ConnectionTestResult::new(provider_id, classify_status(status), Some(status))
            }
            Err(err) => {
                log_warn("connection_tester", format!("{} unreachable: {}", provider_id, err));
                ConnectionTestResult::new(provider_id, ConnectionStatus::Unreachable, None)
            }
        };
        log_info(
            "connection_tester",
            format!("{} -> {:?} {:?}", provider_id, result.status, result.http_status),
        );
        result
    }
}

impl Default for ConnectionTester {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), ConnectionStatus::Valid);
        assert_eq!(classify_status(401), ConnectionStatus::InvalidKey);
        assert_eq!(classify_status(403), ConnectionStatus::InvalidKey);
        assert_eq!(classify_status(429), ConnectionStatus::RateLimited);
        assert_eq!(classify_status(500), ConnectionStatus::ApiError);
    }

    #[test]
    fn rate_limited_counts_as_ok() {
        let r = ConnectionTestResult::new("openai", ConnectionStatus::RateLimited, Some(429));
        assert!(r.ok);
        assert_eq!(r.message, "API Key valid (rate limited)");
        let r = ConnectionTestResult::new("openai", ConnectionStatus::ApiError, Some(502));
        assert!(!r.ok);
        assert_eq!(r.message, "API error: 502");
    }

    #[tokio::test]
    async fn bearer_probe_hits_models() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/models")
            .match_header("authorization", "Bearer sk-good")
            .with_status(200)
            .with_body(r#"{"data":[{"id":"gpt-4o"}]}"#)
            .create_async()
            .await;

        let tester = ConnectionTester::new();
        let result = tester.test("openai", Some("sk-good"), Some(&server.url()), None).await;
        mock.assert_async().await;
        assert!(result.ok);
        assert_eq!(result.status, ConnectionStatus::Valid);
        assert_eq!(result.message, "API connection verified ✓");
    }

    #[tokio::test]
    async fn google_probe_uses_query_key_and_reports_invalid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/models")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "bad".into()))
            .with_status(403)
            .create_async()
            .await;

        let result = ConnectionTester::new()
            .test("google", Some("bad"), Some(&server.url()), None)
            .await;
        mock.assert_async().await;
        assert!(!result.ok);
        assert_eq!(result.status, ConnectionStatus::InvalidKey);
        assert_eq!(result.message, "Invalid API Key");
    }

    #[tokio::test]
    async fn perplexity_probe_posts_one_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"max_tokens":1,"model":"sonar-pro"}"#.into(),
            ))
            .with_status(429)
            .create_async()
            .await;

        let result = ConnectionTester::new()
            .test("perplexity", Some("pk"), Some(&server.url()), Some("sonar-pro"))
            .await;
        mock.assert_async().await;
        assert!(result.ok);
        assert_eq!(result.status, ConnectionStatus::RateLimited);
    }

    #[tokio::test]
    async fn perplexity_check_falls_back_to_default_model() {
        let mut server = mockito::Server::new_async().await;
        let default_model = provider_spec("perplexity")
            .and_then(|s| s.default_model)
            .unwrap_or("sonar");
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({ "model": default_model })))
            .with_status(200)
            .create_async()
            .await;

        let result = ConnectionTester::new()
            .test("perplexity", Some("pk"), Some(&server.url()), Some("  "))
            .await;
        mock.assert_async().await;
        assert_eq!(result.status, ConnectionStatus::Valid);
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let result = ConnectionTester::new()
            .test("local", Some("k"), Some("http://127.0.0.1:9"), None)
            .await;
        assert!(!result.ok);
        assert_eq!(result.status, ConnectionStatus::Unreachable);
        assert_eq!(result.message, "Network error - cannot reach API");
    }

    #[tokio::test]
    async fn unknown_provider_is_untested_success() {
        let result = ConnectionTester::new().test("mystery", Some("k"), None, None).await;
        assert!(result.ok);
        assert_eq!(result.status, ConnectionStatus::Untested);
        assert_eq!(result.message, "API Key saved (no test available)");
    }
}
