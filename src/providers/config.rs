use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// Structured messages, OpenAI-style `chat/completions`.
    ChatCompletion,
    /// One flattened prompt string.
    TextCompletion,
    /// Submit a job, then poll for its result.
    AsyncJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum AuthScheme {
    Bearer,
    /// Key carried as a query-string parameter.
    QueryKey(&'static str),
    /// Key carried in a named header.
    Header(&'static str),
    None,
}

/// Request body shape spoken by a text-completion server on the direct route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextDialect {
    Ooba,
    Kobold,
    LlamaCpp,
    Ollama,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub family: ProtocolFamily,
    pub default_base_url: &'static str,
    pub auth: AuthScheme,
    pub requires_key: bool,
    /// Name of the backend secret mirroring this provider's key.
    pub backend_secret: Option<&'static str>,
    /// Environment variable consulted when no key is stored.
    pub env_var: Option<&'static str>,
    /// `chat_completion_source` or `api_type` understood by the backend proxy.
    pub backend_source: &'static str,
    pub default_model: Option<&'static str>,
    /// Path appended to the base URL on the direct route.
    pub direct_path: &'static str,
    pub dialect: Option<TextDialect>,
}

const FALLBACK_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_HORDE_MODEL: &str = "koboldcpp/L3-8B-Stheno-v3.2";

static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        id: "local",
        name: "Local (OpenAI compatible)",
        family: ProtocolFamily::ChatCompletion,
        default_base_url: "http://localhost:8045/v1",
        auth: AuthScheme::Bearer,
        requires_key: false,
        backend_secret: None,
        env_var: None,
        backend_source: "custom",
        default_model: None,
        direct_path: "/chat/completions",
        dialect: None,
    },
    ProviderSpec {
        id: "openai",
        name: "OpenAI",
        family: ProtocolFamily::ChatCompletion,
        default_base_url: "https://api.openai.com/v1",
        auth: AuthScheme::Bearer,
        requires_key: true,
        backend_secret: Some("api_key_openai"),
        env_var: Some("OPENAI_API_KEY"),
        backend_source: "openai",
        default_model: Some("gpt-4o"),
        direct_path: "/chat/completions",
        dialect: None,
    },
    ProviderSpec {
        id: "openrouter",
        name: "OpenRouter",
        family: ProtocolFamily::ChatCompletion,
        default_base_url: "https://openrouter.ai/api/v1",
        auth: AuthScheme::Bearer,
        requires_key: true,
        backend_secret: Some("api_key_openrouter"),
        env_var: Some("OPENROUTER_API_KEY"),
        backend_source: "openrouter",
        default_model: Some("anthropic/claude-sonnet-4"),
        direct_path: "/chat/completions",
        dialect: None,
    },
    ProviderSpec {
        id: "google",
        name: "Google AI Studio",
        family: ProtocolFamily::ChatCompletion,
        default_base_url: "https://generativelanguage.googleapis.com/v1beta",
        auth: AuthScheme::QueryKey("key"),
        requires_key: true,
        backend_secret: Some("api_key_makersuite"),
        env_var: Some("GOOGLE_API_KEY"),
        backend_source: "makersuite",
        default_model: Some("gemini-2.5-flash"),
        direct_path: "/openai/chat/completions",
        dialect: None,
    },
    ProviderSpec {
        id: "perplexity",
        name: "Perplexity",
        family: ProtocolFamily::ChatCompletion,
        default_base_url: "https://api.perplexity.ai",
        auth: AuthScheme::Bearer,
        requires_key: true,
        backend_secret: Some("api_key_perplexity"),
        env_var: Some("PERPLEXITY_API_KEY"),
        backend_source: "perplexity",
        default_model: Some("sonar"),
        direct_path: "/chat/completions",
        dialect: None,
    },
    ProviderSpec {
        id: "custom",
        name: "Custom endpoint",
        family: ProtocolFamily::ChatCompletion,
        default_base_url: "",
        auth: AuthScheme::Bearer,
        requires_key: false,
        backend_secret: None,
        env_var: None,
        backend_source: "custom",
        default_model: None,
        direct_path: "/chat/completions",
        dialect: None,
    },
    ProviderSpec {
        id: "koboldhorde",
        name: "KoboldAI Horde",
        family: ProtocolFamily::AsyncJob,
        default_base_url: "https://aihorde.net/api",
        auth: AuthScheme::Header("apikey"),
        requires_key: true,
        backend_secret: Some("api_key_horde"),
        env_var: None,
        backend_source: "horde",
        default_model: Some(DEFAULT_HORDE_MODEL),
        direct_path: "/v2/generate/text/async",
        dialect: None,
    },
    ProviderSpec {
        id: "textgenerationwebui",
        name: "Text Generation WebUI",
        family: ProtocolFamily::TextCompletion,
        default_base_url: "http://127.0.0.1:5000",
        auth: AuthScheme::None,
        requires_key: false,
        backend_secret: None,
        env_var: None,
        backend_source: "ooba",
        default_model: None,
        direct_path: "/v1/completions",
        dialect: Some(TextDialect::Ooba),
    },
    ProviderSpec {
        id: "kobold",
        name: "KoboldCpp",
        family: ProtocolFamily::TextCompletion,
        default_base_url: "http://127.0.0.1:5001",
        auth: AuthScheme::None,
        requires_key: false,
        backend_secret: None,
        env_var: None,
        backend_source: "koboldcpp",
        default_model: None,
        direct_path: "/api/v1/generate",
        dialect: Some(TextDialect::Kobold),
    },
    ProviderSpec {
        id: "llamacpp",
        name: "llama.cpp",
        family: ProtocolFamily::TextCompletion,
        default_base_url: "http://127.0.0.1:8080",
        auth: AuthScheme::None,
        requires_key: false,
        backend_secret: None,
        env_var: None,
        backend_source: "llamacpp",
        default_model: None,
        direct_path: "/v1/completions",
        dialect: Some(TextDialect::LlamaCpp),
    },
    ProviderSpec {
        id: "ollama",
        name: "Ollama",
        family: ProtocolFamily::TextCompletion,
        default_base_url: "http://127.0.0.1:11434",
        auth: AuthScheme::None,
        requires_key: false,
        backend_secret: None,
        env_var: None,
        backend_source: "ollama",
        default_model: None,
        direct_path: "/api/generate",
        dialect: Some(TextDialect::Ollama),
    },
];

pub fn all_providers() -> &'static [ProviderSpec] {
    PROVIDERS
}

pub fn provider_spec(provider_id: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.id == provider_id)
}

pub fn resolve_base_url(spec: &ProviderSpec, custom_base_url: Option<&str>) -> String {
    if let Some(custom) = custom_base_url {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return trimmed.trim_end_matches('/').to_string();
        }
    }
    spec.default_base_url.trim_end_matches('/').to_string()
}

/// Model to request when the user left the name blank.
pub fn model_or_default<'a>(spec: &'a ProviderSpec, configured: &'a str) -> &'a str {
    let trimmed = configured.trim();
    if !trimmed.is_empty() {
        trimmed
    } else {
        spec.default_model.unwrap_or(FALLBACK_CHAT_MODEL)
    }
}

pub fn build_endpoint_url(spec: &ProviderSpec, custom_base_url: Option<&str>) -> String {
    format!("{}{}", resolve_base_url(spec, custom_base_url), spec.direct_path)
}
