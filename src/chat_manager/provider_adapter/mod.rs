use serde_json::Value;

use super::config::{ChatConfig, ConnectionRoute};
use super::prompt_engine::AssembledPrompt;
use crate::error::GenerationError;
use crate::providers::config::{AuthScheme, ProtocolFamily, ProviderSpec};

mod async_job;
mod chat_completion;
mod text_completion;

pub use async_job::AsyncJobAdapter;
pub use chat_completion::ChatCompletionAdapter;
pub use text_completion::TextCompletionAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestTarget {
    /// Path on the backend; authenticated by its session token.
    Backend { path: String },
    /// Absolute provider URL; authenticated by the API key.
    Direct { url: String, auth: AuthScheme },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub method: HttpMethod,
    pub target: RequestTarget,
    pub body: Option<Value>,
}

impl BuiltRequest {
    pub fn post(target: RequestTarget, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            target,
            body: Some(body),
        }
    }

    pub fn get(target: RequestTarget) -> Self {
        Self {
            method: HttpMethod::Get,
            target,
            body: None,
        }
    }

    pub fn uses_session_token(&self) -> bool {
        matches!(self.target, RequestTarget::Backend { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Text(String),
    /// Accepted job id; the result arrives through polling.
    Job(String),
}

/// Everything an adapter needs to shape one request.
pub struct RequestContext<'a> {
    pub spec: &'static ProviderSpec,
    pub config: &'a ChatConfig,
    pub prompt: &'a AssembledPrompt,
}

impl<'a> RequestContext<'a> {
    pub fn route(&self) -> ConnectionRoute {
        self.config.route
    }

    pub fn base_url(&self) -> String {
        self.config.base_url()
    }

    pub fn direct(&self, url: String) -> RequestTarget {
        RequestTarget::Direct {
            url,
            auth: self.spec.auth,
        }
    }
}

pub trait ProtocolAdapter: Send + Sync {
    fn family(&self) -> ProtocolFamily;

    fn build_request(&self, ctx: &RequestContext<'_>) -> Result<BuiltRequest, GenerationError>;

    fn parse_response(&self, data: &Value) -> Result<ParsedResponse, GenerationError>;

    /// Status request for a submitted job. Only async-job protocols have one.
    fn build_status_request(&self, _ctx: &RequestContext<'_>, _job_id: &str) -> Option<BuiltRequest> {
        None
    }
}

pub fn adapter_for(family: ProtocolFamily) -> Box<dyn ProtocolAdapter> {
    match family {
        ProtocolFamily::ChatCompletion => Box::new(ChatCompletionAdapter),
        ProtocolFamily::TextCompletion => Box::new(TextCompletionAdapter),
        ProtocolFamily::AsyncJob => Box::new(AsyncJobAdapter),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::chat_manager::prompt_engine::{ChatTurn, TurnRole};

    pub fn prompt() -> AssembledPrompt {
        AssembledPrompt {
            system_instruction: "SYS".into(),
            turns: vec![
                ChatTurn {
                    role: TurnRole::System,
                    content: "You are Alice.".into(),
                },
                ChatTurn {
                    role: TurnRole::User,
                    content: "Hi".into(),
                },
            ],
        }
    }

    pub fn config_for(provider: &str, route: ConnectionRoute) -> ChatConfig {
        let mut config = ChatConfig::default();
        config.select_provider(provider).unwrap();
        config.route = route;
        config
    }
}
