use serde_json::{json, Value};

use super::{BuiltRequest, ParsedResponse, ProtocolAdapter, RequestContext, RequestTarget};
use crate::chat_manager::config::{ChatConfig, ConnectionRoute};
use crate::chat_manager::prompt_engine::flatten_for_text;
use crate::error::GenerationError;
use crate::providers::config::{ProtocolFamily, DEFAULT_HORDE_MODEL};

pub const BACKEND_SUBMIT_PATH: &str = "/api/horde/generate-text";
pub const BACKEND_STATUS_PATH: &str = "/api/horde/task-status";

/// Crowdsourced cluster protocol: submit, get a job id, poll its status.
pub struct AsyncJobAdapter;

fn horde_models(config: &ChatConfig) -> Vec<String> {
    if config.horde.models.is_empty() {
        vec![DEFAULT_HORDE_MODEL.to_string()]
    } else {
        config.horde.models.clone()
    }
}

fn horde_params(config: &ChatConfig) -> Value {
    let s = &config.sampling;
    let mut params = json!({
        "n": 1,
        "max_length": s.max_output_tokens,
        "temperature": s.temperature,
        "top_p": s.top_p,
        "top_k": s.top_k,
        "top_a": s.top_a,
        "min_p": s.min_p,
        "typical": s.typical_p,
        "tfs": s.tfs,
        "rep_pen": s.repetition_penalty,
        "rep_pen_range": s.rep_pen_range,
    });
    if !s.stop_sequences.is_empty() {
        params["stop_sequence"] = json!(s.stop_sequences);
    }
    params
}

impl ProtocolAdapter for AsyncJobAdapter {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::AsyncJob
    }

    fn build_request(&self, ctx: &RequestContext<'_>) -> Result<BuiltRequest, GenerationError> {
        let config = ctx.config;
        let body = json!({
            "prompt": flatten_for_text(ctx.prompt, config),
            "models": horde_models(config),
            "params": horde_params(config),
            "trusted_workers": config.horde.trusted_only,
        });
        let target = match ctx.route() {
            ConnectionRoute::Backend => RequestTarget::Backend {
                path: BACKEND_SUBMIT_PATH.to_string(),
            },
            ConnectionRoute::Direct => {
                ctx.direct(format!("{}{}", ctx.base_url(), ctx.spec.direct_path))
            }
        };
        Ok(BuiltRequest::post(target, body))
    }

    fn parse_response(&self, data: &Value) -> Result<ParsedResponse, GenerationError> {
        match data.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
            Some(id) => Ok(ParsedResponse::Job(id.to_string())),
            None => Err(GenerationError::provider(
                "Horde did not return a task id",
            )),
        }
    }

    fn build_status_request(&self, ctx: &RequestContext<'_>, job_id: &str) -> Option<BuiltRequest> {
        let request = match ctx.route() {
            ConnectionRoute::Backend => BuiltRequest::post(
                RequestTarget::Backend {
                    path: BACKEND_STATUS_PATH.to_string(),
                },
                json!({ "taskId": job_id }),
            ),
            ConnectionRoute::Direct => BuiltRequest::get(ctx.direct(format!(
                "{}/v2/generate/text/status/{}",
                ctx.base_url(),
                urlencoding::encode(job_id)
            ))),
        };
        Some(request)
    }
}
