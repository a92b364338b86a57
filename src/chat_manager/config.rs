use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::types::LorebookEntry;
use crate::error::GenerationError;
use crate::providers::config::{provider_spec, ProtocolFamily};

/// How generation requests reach the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRoute {
    /// Proxied through the backend's generation routes, authenticated by its session token.
    #[default]
    Backend,
    /// Straight to the provider URL with the provider's own auth scheme.
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptOrder {
    #[default]
    Default,
    StyleFirst,
    ScenarioLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    #[default]
    Natural,
    Sexy,
    Flirty,
    Horny,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetySetting {
    #[default]
    BlockNone,
    BlockFew,
    BlockSome,
    BlockMost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HordeSettings {
    pub models: Vec<String>,
    pub adjust_context: bool,
    pub adjust_response: bool,
    pub trusted_only: bool,
}

impl Default for HordeSettings {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            adjust_context: false,
            adjust_response: true,
            trusted_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
    pub thinking_budget: u32,
    pub stop_sequences: Vec<String>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub repetition_penalty: f64,
    pub min_p: f64,
    pub top_a: f64,
    pub typical_p: f64,
    pub tfs: f64,
    pub rep_pen_range: u32,
    /// -1 lets the provider choose.
    pub seed: i64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 8192,
            thinking_budget: 4096,
            stop_sequences: Vec::new(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            repetition_penalty: 1.1,
            min_p: 0.02,
            top_a: 0.0,
            typical_p: 1.0,
            tfs: 1.0,
            rep_pen_range: 2048,
            seed: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DrySampler {
    pub multiplier: f64,
    pub base: f64,
    pub allowed_length: u32,
    pub penalty_last_n: u32,
}

impl Default for DrySampler {
    fn default() -> Self {
        Self {
            multiplier: 0.0,
            base: 1.75,
            allowed_length: 2,
            penalty_last_n: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XtcSampler {
    pub threshold: f64,
    pub probability: f64,
}

impl Default for XtcSampler {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            probability: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirostatSampler {
    /// 0 disabled, 1 or 2 for the algorithm version.
    pub mode: u8,
    pub tau: f64,
    pub eta: f64,
}

impl Default for MirostatSampler {
    fn default() -> Self {
        Self {
            mode: 0,
            tau: 5.0,
            eta: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicTemperature {
    pub enabled: bool,
    pub min_temp: f64,
    pub max_temp: f64,
    pub exponent: f64,
}

impl Default for DynamicTemperature {
    fn default() -> Self {
        Self {
            enabled: false,
            min_temp: 0.5,
            max_temp: 1.5,
            exponent: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub main_api: String,
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
    pub route: ConnectionRoute,
    pub horde: HordeSettings,
    pub sampling: SamplingParams,
    pub response_style: ResponseStyle,
    pub dry: DrySampler,
    pub xtc: XtcSampler,
    pub mirostat: MirostatSampler,
    pub dynatemp: DynamicTemperature,
    pub scenario: String,
    pub example_dialogue: String,
    pub lorebook: Vec<LorebookEntry>,
    /// When set, lorebook entries are injected only if a key matches recent messages.
    pub lorebook_keyword_gating: bool,
    pub lorebook_scan_depth: usize,
    pub user_name: String,
    pub user_description: String,
    pub system_prompt_override: String,
    pub authors_note: String,
    pub authors_note_depth: u32,
    pub prompt_order: PromptOrder,
    pub user_prefix: String,
    pub model_prefix: String,
    pub context_template: String,
    pub font_size: u32,
    pub background_blur: u32,
    pub safety_settings: SafetySetting,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            main_api: "textgenerationwebui".into(),
            api_url: "http://127.0.0.1:5000".into(),
            api_key: String::new(),
            model_name: String::new(),
            route: ConnectionRoute::Backend,
            horde: HordeSettings::default(),
            sampling: SamplingParams::default(),
            response_style: ResponseStyle::Natural,
            dry: DrySampler::default(),
            xtc: XtcSampler::default(),
            mirostat: MirostatSampler::default(),
            dynatemp: DynamicTemperature::default(),
            scenario: String::new(),
            example_dialogue: String::new(),
            lorebook: Vec::new(),
            lorebook_keyword_gating: false,
            lorebook_scan_depth: 5,
            user_name: "User".into(),
            user_description: String::new(),
            system_prompt_override: String::new(),
            authors_note: String::new(),
            authors_note_depth: 4,
            prompt_order: PromptOrder::Default,
            user_prefix: "User:".into(),
            model_prefix: "Character:".into(),
            context_template: "default".into(),
            font_size: 15,
            background_blur: 3,
            safety_settings: SafetySetting::BlockNone,
        }
    }
}

/// Fixed sampler subset written by a response style preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StylePreset {
    pub temperature: f64,
    pub top_p: f64,
    pub min_p: f64,
    pub repetition_penalty: f64,
    pub presence_penalty: f64,
    pub dry_multiplier: f64,
    pub xtc_probability: f64,
    pub xtc_threshold: f64,
    pub thinking_budget: u32,
}

pub fn style_preset(style: ResponseStyle) -> Option<StylePreset> {
    let preset = match style {
        ResponseStyle::Natural => StylePreset {
            temperature: 1.0,
            top_p: 1.0,
            min_p: 0.02,
            repetition_penalty: 1.1,
            presence_penalty: 0.0,
            dry_multiplier: 0.0,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            thinking_budget: 2048,
        },
        ResponseStyle::Sexy => StylePreset {
            temperature: 1.1,
            top_p: 0.95,
            min_p: 0.02,
            repetition_penalty: 1.1,
            presence_penalty: 0.1,
            dry_multiplier: 0.5,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            thinking_budget: 4096,
        },
        ResponseStyle::Flirty => StylePreset {
            temperature: 1.2,
            top_p: 0.95,
            min_p: 0.02,
            repetition_penalty: 1.15,
            presence_penalty: 0.15,
            dry_multiplier: 0.8,
            xtc_probability: 0.3,
            xtc_threshold: 0.1,
            thinking_budget: 6144,
        },
        ResponseStyle::Horny => StylePreset {
            temperature: 1.35,
            top_p: 1.0,
            min_p: 0.02,
            repetition_penalty: 1.15,
            presence_penalty: 0.2,
            dry_multiplier: 0.8,
            xtc_probability: 0.5,
            xtc_threshold: 0.1,
            thinking_budget: 8192,
        },
        ResponseStyle::Custom => return None,
    };
    Some(preset)
}

impl ChatConfig {
    /// Switches the style tag and overwrites its sampler subset in one step.
    /// `Custom` only changes the tag.
    pub fn apply_response_style(&mut self, style: ResponseStyle) {
        self.response_style = style;
        if let Some(p) = style_preset(style) {
            self.sampling.temperature = p.temperature;
            self.sampling.top_p = p.top_p;
            self.sampling.min_p = p.min_p;
            self.sampling.repetition_penalty = p.repetition_penalty;
            self.sampling.presence_penalty = p.presence_penalty;
            self.dry.multiplier = p.dry_multiplier;
            self.xtc.probability = p.xtc_probability;
            self.xtc.threshold = p.xtc_threshold;
            self.sampling.thinking_budget = p.thinking_budget;
        }
    }

    /// Output budget for chat-completion requests: reasoning models need room
    /// for the thinking budget plus a fixed reply floor.
    pub fn effective_max_tokens(&self) -> u32 {
        let s = &self.sampling;
        if s.thinking_budget > 0 {
            s.max_output_tokens
                .max(s.thinking_budget.saturating_add(THINKING_REPLY_FLOOR))
        } else {
            s.max_output_tokens
        }
    }

    /// Clamps numeric fields into the ranges providers accept.
    pub fn normalized(mut self) -> Self {
        let s = &mut self.sampling;
        s.temperature = s.temperature.clamp(0.0, 5.0);
        s.top_p = s.top_p.clamp(0.0, 1.0);
        s.min_p = s.min_p.clamp(0.0, 1.0);
        s.top_a = s.top_a.clamp(0.0, 1.0);
        s.typical_p = s.typical_p.clamp(0.0, 1.0);
        s.tfs = s.tfs.clamp(0.0, 1.0);
        s.presence_penalty = s.presence_penalty.clamp(-2.0, 2.0);
        s.frequency_penalty = s.frequency_penalty.clamp(-2.0, 2.0);
        s.repetition_penalty = s.repetition_penalty.clamp(1.0, 3.0);
        s.max_output_tokens = s.max_output_tokens.max(1);
        s.thinking_budget = s.thinking_budget.min(MAX_THINKING_BUDGET);
        if s.seed < -1 {
            s.seed = -1;
        }
        self.mirostat.mode = self.mirostat.mode.min(2);
        self.xtc.probability = self.xtc.probability.clamp(0.0, 1.0);
        self.xtc.threshold = self.xtc.threshold.clamp(0.0, 1.0);
        if self.dynatemp.min_temp > self.dynatemp.max_temp {
            std::mem::swap(&mut self.dynatemp.min_temp, &mut self.dynatemp.max_temp);
        }
        self.api_url = self.api_url.trim().trim_end_matches('/').to_string();
        self
    }

    /// Checks what generation needs before any request is built.
    pub fn validate(&self) -> Result<(), GenerationError> {
        let spec = provider_spec(&self.main_api).ok_or_else(|| {
            GenerationError::config(format!("Unknown provider: {}", self.main_api))
        })?;
        if spec.default_base_url.is_empty() && self.api_url.trim().is_empty() {
            return Err(GenerationError::config(format!(
                "{} requires an API URL",
                spec.name
            )));
        }
        if self.route == ConnectionRoute::Direct
            && spec.requires_key
            && self.api_key.trim().is_empty()
        {
            return Err(GenerationError::config(format!(
                "{} requires an API key",
                spec.name
            )));
        }
        if spec.family == ProtocolFamily::TextCompletion
            && self.route == ConnectionRoute::Backend
            && self.base_url().is_empty()
        {
            return Err(GenerationError::config("Text completion requires an API URL"));
        }
        Ok(())
    }

    /// Configured URL, or the provider's default when blank.
    pub fn base_url(&self) -> String {
        let trimmed = self.api_url.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        provider_spec(&self.main_api)
            .map(|s| s.default_base_url.trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// Points the config at another provider, resetting URL and key.
    pub fn select_provider(&mut self, provider_id: &str) -> Result<(), GenerationError> {
        let spec = provider_spec(provider_id)
            .ok_or_else(|| GenerationError::config(format!("Unknown provider: {}", provider_id)))?;
        self.main_api = spec.id.to_string();
        self.api_url = spec.default_base_url.to_string();
        self.api_key.clear();
        Ok(())
    }
}

pub const THINKING_REPLY_FLOOR: u32 = 2048;
pub const MAX_THINKING_BUDGET: u32 = 131_072;

fn get_f64(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(|v| v.as_f64())
}

fn get_u32(obj: &Value, key: &str) -> Option<u32> {
    obj.get(key)
        .and_then(|v| v.as_f64())
        .filter(|v| *v >= 0.0)
        .map(|v| v as u32)
}

fn get_bool(obj: &Value, key: &str) -> Option<bool> {
    obj.get(key).and_then(|v| v.as_bool())
}

fn get_string_list(obj: &Value, key: &str) -> Option<Vec<String>> {
    obj.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect()
    })
}

/// Overlays the backend's settings blob onto `config`. Fields the blob
/// does not carry keep their current value.
pub fn merge_remote_settings(config: &mut ChatConfig, remote: &Value) {
    if let Some(api) = remote.get("main_api").and_then(|v| v.as_str()) {
        if provider_spec(api).is_some() {
            config.main_api = api.to_string();
        }
    }
    let text_family = provider_spec(&config.main_api)
        .map(|spec| spec.family == ProtocolFamily::TextCompletion)
        .unwrap_or(false);
    if let Some(url) = remote
        .get("api_server_textgenerationwebui")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty() && text_family)
    {
        config.api_url = url.to_string();
    }
    if let Some(v) = get_u32(remote, "amount_gen") {
        config.sampling.max_output_tokens = v;
    }
    if let Some(v) = get_u32(remote, "maxOutputTokens") {
        config.sampling.max_output_tokens = v;
    }
    if let Some(v) = get_u32(remote, "thinkingBudget") {
        config.sampling.thinking_budget = v;
    }
    if let Some(v) = get_f64(remote, "temperature") {
        config.sampling.temperature = v;
    }
    if let Some(name) = remote.get("modelName").and_then(|v| v.as_str()) {
        config.model_name = name.to_string();
    }
    if let Some(name) = remote
        .get("username")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        config.user_name = name.to_string();
    }

    if let Some(horde) = remote.get("koboldhorde_settings").filter(|v| v.is_object()) {
        if let Some(key) = horde.get("apikey").and_then(|v| v.as_str()) {
            if config.main_api == "koboldhorde" && !key.is_empty() {
                config.api_key = key.to_string();
            }
        }
        if let Some(models) = get_string_list(horde, "models") {
            config.horde.models = models;
        }
        if let Some(v) = get_bool(horde, "auto_adjust_context_length") {
            config.horde.adjust_context = v;
        }
        if let Some(v) = get_bool(horde, "auto_adjust_response_length") {
            config.horde.adjust_response = v;
        }
        if let Some(v) = get_bool(horde, "trusted_workers_only") {
            config.horde.trusted_only = v;
        }
    }

    if let Some(tg) = remote
        .get("textgenerationwebui_settings")
        .filter(|v| v.is_object())
    {
        let s = &mut config.sampling;
        if let Some(v) = get_f64(tg, "temp") {
            s.temperature = v;
        }
        if let Some(v) = get_f64(tg, "top_p") {
            s.top_p = v;
        }
        if let Some(v) = get_u32(tg, "top_k") {
            s.top_k = v;
        }
        if let Some(v) = get_f64(tg, "rep_pen") {
            s.repetition_penalty = v;
        }
        if let Some(v) = get_f64(tg, "min_p") {
            s.min_p = v;
        }
        if let Some(v) = get_f64(tg, "top_a") {
            s.top_a = v;
        }
        if let Some(v) = get_f64(tg, "typical_p") {
            s.typical_p = v;
        }
        if let Some(v) = get_f64(tg, "tfs") {
            s.tfs = v;
        }
        if let Some(v) = get_u32(tg, "rep_pen_range") {
            s.rep_pen_range = v;
        }
        if let Some(v) = get_string_list(tg, "stopping_strings") {
            s.stop_sequences = v;
        }
    }
}

fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    }
}

/// Writes `config` back into the backend's settings blob, keeping every
/// field the client does not own.
pub fn apply_to_remote_settings(config: &ChatConfig, raw: &Value) -> Value {
    let mut root = match raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let s = &config.sampling;
    root.insert("main_api".into(), json!(config.main_api));
    if provider_spec(&config.main_api).map(|spec| spec.family) == Some(ProtocolFamily::TextCompletion) {
        root.insert("api_server_textgenerationwebui".into(), json!(config.api_url));
    }
    root.insert("amount_gen".into(), json!(s.max_output_tokens));
    root.insert("maxOutputTokens".into(), json!(s.max_output_tokens));
    root.insert("thinkingBudget".into(), json!(s.thinking_budget));
    root.insert("temperature".into(), json!(s.temperature));
    root.insert("modelName".into(), json!(config.model_name));
    root.insert("username".into(), json!(config.user_name));

    let mut horde = take_object(&mut root, "koboldhorde_settings");
    if config.main_api == "koboldhorde" {
        horde.insert("apikey".into(), json!(config.api_key));
    }
    horde.insert("models".into(), json!(config.horde.models));
    horde.insert(
        "auto_adjust_context_length".into(),
        json!(config.horde.adjust_context),
    );
    horde.insert(
        "auto_adjust_response_length".into(),
        json!(config.horde.adjust_response),
    );
    horde.insert(
        "trusted_workers_only".into(),
        json!(config.horde.trusted_only),
    );
    root.insert("koboldhorde_settings".into(), Value::Object(horde));

    let mut tg = take_object(&mut root, "textgenerationwebui_settings");
    tg.insert("temp".into(), json!(s.temperature));
    tg.insert("top_p".into(), json!(s.top_p));
    tg.insert("top_k".into(), json!(s.top_k));
    tg.insert("rep_pen".into(), json!(s.repetition_penalty));
    tg.insert("min_p".into(), json!(s.min_p));
    tg.insert("top_a".into(), json!(s.top_a));
    tg.insert("typical_p".into(), json!(s.typical_p));
    tg.insert("tfs".into(), json!(s.tfs));
    tg.insert("rep_pen_range".into(), json!(s.rep_pen_range));
    tg.insert("stopping_strings".into(), json!(s.stop_sequences));
    root.insert("textgenerationwebui_settings".into(), Value::Object(tg));
    Value::Object(root)
}
