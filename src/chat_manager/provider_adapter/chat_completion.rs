use serde::Serialize;
use serde_json::Value;

use super::{BuiltRequest, ParsedResponse, ProtocolAdapter, RequestContext, RequestTarget};
use crate::chat_manager::config::ConnectionRoute;
use crate::chat_manager::prompt_engine::ChatTurn;
use crate::chat_manager::request::extract_text_or_empty;
use crate::error::GenerationError;
use crate::providers::config::{model_or_default, ProtocolFamily};

pub const BACKEND_CHAT_PATH: &str = "/api/backends/chat-completions/generate";

// Shared OpenAI-style request; the backend proxy adds its routing fields.
#[derive(Serialize)]
pub(crate) struct OpenAIChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) chat_completion_source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) custom_url: Option<String>,
    pub(crate) model: &'a str,
    pub(crate) messages: &'a [ChatTurn],
    pub(crate) stream: bool,
    pub(crate) temperature: f64,
    pub(crate) top_p: f64,
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_k: Option<u32>,
    pub(crate) frequency_penalty: f64,
    pub(crate) presence_penalty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) seed: Option<i64>,
}

pub struct ChatCompletionAdapter;

impl ProtocolAdapter for ChatCompletionAdapter {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::ChatCompletion
    }

    fn build_request(&self, ctx: &RequestContext<'_>) -> Result<BuiltRequest, GenerationError> {
        let config = ctx.config;
        let s = &config.sampling;
        let proxied = ctx.route() == ConnectionRoute::Backend;
        let base = ctx.base_url();

        let custom_url = if proxied && ctx.spec.backend_source == "custom" {
            if base.is_empty() {
                return Err(GenerationError::config("Custom endpoint URL is missing"));
            }
            Some(base.clone())
        } else {
            None
        };

        let body = OpenAIChatRequest {
            chat_completion_source: proxied.then_some(ctx.spec.backend_source),
            custom_url,
            model: model_or_default(ctx.spec, &config.model_name),
            messages: &ctx.prompt.turns,
            stream: false,
            temperature: s.temperature,
            top_p: s.top_p,
            max_tokens: config.effective_max_tokens(),
            top_k: (proxied && s.top_k > 0).then_some(s.top_k),
            frequency_penalty: s.frequency_penalty,
            presence_penalty: s.presence_penalty,
            stop: (!s.stop_sequences.is_empty()).then_some(s.stop_sequences.as_slice()),
            seed: (s.seed >= 0).then_some(s.seed),
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| GenerationError::config(format!("Failed to encode request: {}", e)))?;

        let target = if proxied {
            RequestTarget::Backend {
                path: BACKEND_CHAT_PATH.to_string(),
            }
        } else {
            if base.is_empty() {
                return Err(GenerationError::config(format!(
                    "{} has no endpoint URL",
                    ctx.spec.name
                )));
            }
            ctx.direct(format!("{}{}", base, ctx.spec.direct_path))
        };
        Ok(BuiltRequest::post(target, body))
    }

    fn parse_response(&self, data: &Value) -> Result<ParsedResponse, GenerationError> {
        Ok(ParsedResponse::Text(extract_text_or_empty(data)))
    }
}
