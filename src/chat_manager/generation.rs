use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};

use super::config::ChatConfig;
use super::job_poller::JobPoller;
use super::prompt_engine::AssembledPrompt;
use super::provider_adapter::{
    adapter_for, BuiltRequest, HttpMethod, ParsedResponse, RequestContext, RequestTarget,
};
use super::request::error_in_payload;
use crate::abort_manager::AbortSignal;
use crate::backend::BackendClient;
use crate::error::{AppError, GenerationError};
use crate::providers::config::provider_spec;
use crate::providers::util::{apply_query_key, build_headers};
use crate::serde_utils::{parse_body_to_value, redact_url, truncate_for_log};
use crate::utils::{log_info, log_warn};

/// Turns an assembled prompt into reply text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        config: &ChatConfig,
        abort: Option<AbortSignal>,
    ) -> Result<String, GenerationError>;
}

pub struct GenerationClient {
    http: Client,
    backend: Arc<BackendClient>,
    poller: JobPoller,
}

impl GenerationClient {
    pub fn new(backend: Arc<BackendClient>, timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(backend, http))
    }

    pub fn with_client(backend: Arc<BackendClient>, http: Client) -> Self {
        Self {
            http,
            backend,
            poller: JobPoller::new(),
        }
    }

    pub fn with_poller(mut self, poller: JobPoller) -> Self {
        self.poller = poller;
        self
    }

    async fn read_response(response: Response) -> Result<Value, GenerationError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::from_status(
                status.as_u16(),
                &truncate_for_log(&text, 512),
            ));
        }
        let data = parse_body_to_value(&text);
        if let Some(message) = error_in_payload(&data) {
            return Err(GenerationError::provider(format!("Backend error: {}", message)));
        }
        Ok(data)
    }

    /// Sends one built request. Backend targets ride the session token (with
    /// its single refresh on 403); direct targets carry the API key.
    async fn execute(&self, request: &BuiltRequest, api_key: Option<&str>) -> Result<Value, GenerationError> {
        let response = match &request.target {
            RequestTarget::Backend { path } => {
                let body = request.body.clone().unwrap_or_else(|| json!({}));
                self.backend.post(path, &body).await?
            }
            RequestTarget::Direct { url, auth } => {
                let headers = build_headers(*auth, api_key).map_err(GenerationError::config)?;
                let url = apply_query_key(url, *auth, api_key);
                log_info("generation", format!("direct request to {}", redact_url(&url)));
                let builder = match request.method {
                    HttpMethod::Get => self.http.get(&url),
                    HttpMethod::Post => self.http.post(&url).json(&request.body),
                };
                builder.headers(headers).send().await?
            }
        };
        Self::read_response(response).await
    }
}

#[async_trait]
impl TextGenerator for GenerationClient {
    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        config: &ChatConfig,
        abort: Option<AbortSignal>,
    ) -> Result<String, GenerationError> {
        config.validate()?;
        let spec = provider_spec(&config.main_api)
            .ok_or_else(|| GenerationError::config(format!("Unknown provider: {}", config.main_api)))?;
        let adapter = adapter_for(spec.family);
        let ctx = RequestContext {
            spec,
            config,
            prompt,
        };
        let api_key = Some(config.api_key.as_str()).filter(|k| !k.trim().is_empty());

        let request = adapter.build_request(&ctx)?;
        log_info(
            "generation",
            format!("{} via {:?} ({:?})", spec.id, config.route, spec.family),
        );
        let data = self.execute(&request, api_key).await?;

        match adapter.parse_response(&data)? {
            ParsedResponse::Text(text) => Ok(text),
            ParsedResponse::Job(job_id) => {
                let status_request = adapter.build_status_request(&ctx, &job_id).ok_or_else(|| {
                    GenerationError::provider(format!("{} cannot poll jobs", spec.id))
                })?;
                log_info("generation", format!("polling job {}", job_id));
                let status_request = &status_request;
                let this = self;
                self.poller
                    .poll(
                        &job_id,
                        move || async move {
                            match this.execute(status_request, api_key).await {
                                Ok(status) => Ok(Some(status)),
                                Err(err) if err.status.is_some() => {
                                    log_warn("generation", format!("status check: {}", err));
                                    Ok(None)
                                }
                                Err(err) => Err(err),
                            }
                        },
                        abort,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::config::ConnectionRoute;
    use crate::chat_manager::provider_adapter::test_support::{config_for, prompt};
    use crate::error::GenerationErrorKind;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> GenerationClient {
        let backend = Arc::new(BackendClient::new(&server.url(), Duration::from_secs(5)).unwrap());
        GenerationClient::new(backend, Duration::from_secs(5))
            .unwrap()
            .with_poller(JobPoller::with_interval(Duration::from_millis(10), 5))
    }

    async fn csrf(server: &mut mockito::ServerGuard, token: &str) -> mockito::Mock {
        server
            .mock("GET", "/csrf-token")
            .with_body(json!({ "token": token }).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn stale_session_token_means_exactly_two_generate_requests() {
        let mut server = mockito::Server::new_async().await;
        let _csrf = csrf(&mut server, "fresh").await;
        let rejected = server
            .mock("POST", "/api/backends/chat-completions/generate")
            .match_header("x-csrf-token", "stale")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/api/backends/chat-completions/generate")
            .match_header("x-csrf-token", "fresh")
            .with_body(r#"{"choices":[{"message":{"content":"Hello there."}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        client.backend.set_csrf_token("stale").await;
        let config = config_for("openai", ConnectionRoute::Backend);
        let text = client.generate(&prompt(), &config, None).await.unwrap();
        assert_eq!(text, "Hello there.");
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_provider_fails_before_any_request() {
        let mut server = mockito::Server::new_async().await;
        let any = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let client = client_for(&server);
        let mut config = config_for("openai", ConnectionRoute::Backend);
        config.main_api = "nope".into();
        let err = client.generate(&prompt(), &config, None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Config);
        any.assert_async().await;
    }

    #[tokio::test]
    async fn direct_bearer_rejection_is_auth() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-bad")
            .with_status(401)
            .with_body(r#"{"error":{"message":"bad key"}}"#)
            .create_async()
            .await;
        let client = client_for(&server);
        let mut config = config_for("openai", ConnectionRoute::Direct);
        config.api_url = server.url();
        config.api_key = "sk-bad".into();
        let err = client.generate(&prompt(), &config, None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Auth);
        assert_eq!(err.status, Some(401));
    }

    #[tokio::test]
    async fn rate_limit_and_payload_errors() {
        let mut server = mockito::Server::new_async().await;
        let _csrf = csrf(&mut server, "t").await;
        let _m = server
            .mock("POST", "/api/backends/chat-completions/generate")
            .with_status(429)
            .create_async()
            .await;
        let client = client_for(&server);
        let config = config_for("openrouter", ConnectionRoute::Backend);
        let err = client.generate(&prompt(), &config, None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::RateLimited);

        let _m = server
            .mock("POST", "/api/backends/text-completions/generate")
            .with_body(r#"{"error":{"message":"model not loaded"}}"#)
            .create_async()
            .await;
        let config = config_for("textgenerationwebui", ConnectionRoute::Backend);
        let err = client.generate(&prompt(), &config, None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Provider);
        assert_eq!(err.message, "Backend error: model not loaded");
    }

    #[tokio::test]
    async fn direct_text_completion_reads_response_field() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/generate")
            .with_body(r#"{"response":"A quiet night."}"#)
            .create_async()
            .await;
        let client = client_for(&server);
        let mut config = config_for("ollama", ConnectionRoute::Direct);
        config.api_url = server.url();
        config.model_name = "llama3".into();
        let text = client.generate(&prompt(), &config, None).await.unwrap();
        assert_eq!(text, "A quiet night.");
    }

    #[tokio::test]
    async fn horde_job_is_submitted_then_polled() {
        let mut server = mockito::Server::new_async().await;
        let _csrf = csrf(&mut server, "t").await;
        let _m = server
            .mock("POST", "/api/horde/generate-text")
            .with_body(r#"{"id":"job-7"}"#)
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("POST", "/api/horde/task-status")
            .match_body(Matcher::Json(json!({ "taskId": "job-7" })))
            .with_body(r#"{"done":true,"generations":[{"text":"From the horde."}]}"#)
            .expect(1)
            .create_async()
            .await;
        let client = client_for(&server);
        let config = config_for("koboldhorde", ConnectionRoute::Backend);
        let text = client.generate(&prompt(), &config, None).await.unwrap();
        assert_eq!(text, "From the horde.");
        status.assert_async().await;
    }

    #[tokio::test]
    async fn failing_status_checks_end_in_timeout() {
        let mut server = mockito::Server::new_async().await;
        let _csrf = csrf(&mut server, "t").await;
        let _m = server
            .mock("POST", "/api/horde/generate-text")
            .with_body(r#"{"id":"job-8"}"#)
            .create_async()
            .await;
        let status = server
            .mock("POST", "/api/horde/task-status")
            .with_status(500)
            .expect(5)
            .create_async()
            .await;
        let client = client_for(&server);
        let config = config_for("koboldhorde", ConnectionRoute::Backend);
        let err = client.generate(&prompt(), &config, None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Timeout);
        status.assert_async().await;
    }
}
