use serde_json::{json, Value};

use super::{BuiltRequest, ParsedResponse, ProtocolAdapter, RequestContext, RequestTarget};
use crate::chat_manager::config::{ChatConfig, ConnectionRoute};
use crate::chat_manager::prompt_engine::flatten_for_text;
use crate::chat_manager::request::extract_text_or_empty;
use crate::error::GenerationError;
use crate::providers::config::{ProtocolFamily, TextDialect};

pub const BACKEND_TEXT_PATH: &str = "/api/backends/text-completions/generate";

pub struct TextCompletionAdapter;

fn seed_or_none(config: &ChatConfig) -> Value {
    if config.sampling.seed >= 0 {
        json!(config.sampling.seed)
    } else {
        Value::Null
    }
}

fn backend_body(config: &ChatConfig, prompt: &str, api_type: &str, api_server: &str) -> Value {
    let s = &config.sampling;
    json!({
        "prompt": prompt,
        "api_type": api_type,
        "api_server": api_server,
        "max_new_tokens": s.max_output_tokens,
        "max_tokens": s.max_output_tokens,
        "temperature": s.temperature,
        "top_p": s.top_p,
        "top_k": s.top_k,
        "rep_pen": s.repetition_penalty,
        "repetition_penalty": s.repetition_penalty,
        "rep_pen_range": s.rep_pen_range,
        "min_p": s.min_p,
        "top_a": s.top_a,
        "typical_p": s.typical_p,
        "tfs": s.tfs,
        "presence_penalty": s.presence_penalty,
        "frequency_penalty": s.frequency_penalty,
        "stopping_strings": s.stop_sequences,
        "stop": s.stop_sequences,
        "seed": config.sampling.seed,
        "dry_multiplier": config.dry.multiplier,
        "dry_base": config.dry.base,
        "dry_allowed_length": config.dry.allowed_length,
        "dry_penalty_last_n": config.dry.penalty_last_n,
        "xtc_threshold": config.xtc.threshold,
        "xtc_probability": config.xtc.probability,
        "mirostat_mode": config.mirostat.mode,
        "mirostat_tau": config.mirostat.tau,
        "mirostat_eta": config.mirostat.eta,
        "dynamic_temperature": config.dynatemp.enabled,
        "dynatemp_low": config.dynatemp.min_temp,
        "dynatemp_high": config.dynatemp.max_temp,
        "dynatemp_exponent": config.dynatemp.exponent,
        "stream": false,
    })
}

fn direct_body(
    dialect: TextDialect,
    config: &ChatConfig,
    prompt: &str,
) -> Result<Value, GenerationError> {
    let s = &config.sampling;
    let body = match dialect {
        TextDialect::Ooba | TextDialect::LlamaCpp => json!({
            "prompt": prompt,
            "max_tokens": s.max_output_tokens,
            "temperature": s.temperature,
            "top_p": s.top_p,
            "top_k": s.top_k,
            "min_p": s.min_p,
            "top_a": s.top_a,
            "typical_p": s.typical_p,
            "tfs": s.tfs,
            "repetition_penalty": s.repetition_penalty,
            "repetition_penalty_range": s.rep_pen_range,
            "presence_penalty": s.presence_penalty,
            "frequency_penalty": s.frequency_penalty,
            "stop": s.stop_sequences,
            "seed": seed_or_none(config),
            "mirostat_mode": config.mirostat.mode,
            "mirostat_tau": config.mirostat.tau,
            "mirostat_eta": config.mirostat.eta,
            "dry_multiplier": config.dry.multiplier,
            "dry_base": config.dry.base,
            "dry_allowed_length": config.dry.allowed_length,
            "xtc_threshold": config.xtc.threshold,
            "xtc_probability": config.xtc.probability,
            "stream": false,
        }),
        TextDialect::Kobold => json!({
            "prompt": prompt,
            "max_length": s.max_output_tokens,
            "temperature": s.temperature,
            "top_p": s.top_p,
            "top_k": s.top_k,
            "min_p": s.min_p,
            "top_a": s.top_a,
            "typical": s.typical_p,
            "tfs": s.tfs,
            "rep_pen": s.repetition_penalty,
            "rep_pen_range": s.rep_pen_range,
            "stop_sequence": s.stop_sequences,
            "sampler_seed": s.seed,
            "mirostat": config.mirostat.mode,
            "mirostat_tau": config.mirostat.tau,
            "mirostat_eta": config.mirostat.eta,
            "dry_multiplier": config.dry.multiplier,
            "dry_base": config.dry.base,
            "dry_allowed_length": config.dry.allowed_length,
            "xtc_threshold": config.xtc.threshold,
            "xtc_probability": config.xtc.probability,
            "dynatemp_range": if config.dynatemp.enabled {
                (config.dynatemp.max_temp - config.dynatemp.min_temp) / 2.0
            } else {
                0.0
            },
            "dynatemp_exponent": config.dynatemp.exponent,
        }),
        TextDialect::Ollama => {
            let model = config.model_name.trim();
            if model.is_empty() {
                return Err(GenerationError::config("Ollama requires a model name"));
            }
            json!({
                "model": model,
                "prompt": prompt,
                "raw": true,
                "stream": false,
                "options": {
                    "num_predict": s.max_output_tokens,
                    "temperature": s.temperature,
                    "top_p": s.top_p,
                    "top_k": s.top_k,
                    "min_p": s.min_p,
                    "typical_p": s.typical_p,
                    "tfs_z": s.tfs,
                    "repeat_penalty": s.repetition_penalty,
                    "repeat_last_n": s.rep_pen_range,
                    "presence_penalty": s.presence_penalty,
                    "frequency_penalty": s.frequency_penalty,
                    "stop": s.stop_sequences,
                    "seed": s.seed,
                    "mirostat": config.mirostat.mode,
                    "mirostat_tau": config.mirostat.tau,
                    "mirostat_eta": config.mirostat.eta,
                },
            })
        }
    };
    Ok(body)
}

impl ProtocolAdapter for TextCompletionAdapter {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::TextCompletion
    }

    fn build_request(&self, ctx: &RequestContext<'_>) -> Result<BuiltRequest, GenerationError> {
        let prompt = flatten_for_text(ctx.prompt, ctx.config);
        let base = ctx.base_url();
        if base.is_empty() {
            return Err(GenerationError::config("Text completion requires an API URL"));
        }

        match ctx.route() {
            ConnectionRoute::Backend => Ok(BuiltRequest::post(
                RequestTarget::Backend {
                    path: BACKEND_TEXT_PATH.to_string(),
                },
                backend_body(ctx.config, &prompt, ctx.spec.backend_source, &base),
            )),
            ConnectionRoute::Direct => {
                let dialect = ctx.spec.dialect.unwrap_or(TextDialect::Ooba);
                let body = direct_body(dialect, ctx.config, &prompt)?;
                Ok(BuiltRequest::post(
                    ctx.direct(format!("{}{}", base, ctx.spec.direct_path)),
                    body,
                ))
            }
        }
    }

    fn parse_response(&self, data: &Value) -> Result<ParsedResponse, GenerationError> {
        Ok(ParsedResponse::Text(extract_text_or_empty(data)))
    }
}
