use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum AppError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
    Db(rusqlite::Error),
    /// The backend answered with a non-success status.
    Status { status: u16, body: String },
    Other(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Http(e) => write!(f, "{}", e),
            AppError::Json(e) => write!(f, "{}", e),
            AppError::Io(e) => write!(f, "{}", e),
            AppError::Db(e) => write!(f, "{}", e),
            AppError::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            AppError::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for AppError {}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError::Http(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::Json(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Other(value)
    }
}

impl From<&str> for AppError {
    fn from(value: &str) -> Self {
        AppError::Other(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Unknown provider or a required setting is missing. Never retried.
    Config,
    /// Credentials or session token were rejected.
    Auth,
    RateLimited,
    /// The request never produced a response.
    Network,
    /// The async job poller ran out of attempts.
    Timeout,
    /// The async job reported itself faulted or impossible.
    Failed,
    Cancelled,
    /// Non-success response or an error payload from the provider.
    Provider,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::Config => "config",
            GenerationErrorKind::Auth => "auth",
            GenerationErrorKind::RateLimited => "rate_limited",
            GenerationErrorKind::Network => "network",
            GenerationErrorKind::Timeout => "timeout",
            GenerationErrorKind::Failed => "failed",
            GenerationErrorKind::Cancelled => "cancelled",
            GenerationErrorKind::Provider => "provider",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Config, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Provider, message)
    }

    /// Maps an HTTP status to the taxonomy. Only meaningful for non-success codes.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => GenerationErrorKind::Auth,
            429 => GenerationErrorKind::RateLimited,
            _ => GenerationErrorKind::Provider,
        };
        Self::new(kind, format!("Generation failed: {} {}", status, body.trim())).with_status(status)
    }
}

impl Display for GenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{}:{}] {}", self.kind.as_str(), status, self.message),
            None => write!(f, "[{}] {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<reqwest::Error> for GenerationError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() || value.is_connect() || value.is_request() {
            GenerationError::new(GenerationErrorKind::Network, value.to_string())
        } else {
            GenerationError::provider(value.to_string())
        }
    }
}

impl From<AppError> for GenerationError {
    fn from(value: AppError) -> Self {
        match value {
            AppError::Http(e) => GenerationError::from(e),
            AppError::Status { status, body } => GenerationError::from_status(status, &body),
            other => GenerationError::provider(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    EmptyInput,
    /// A generation is already pending for this transcript.
    Busy,
    NoCharacter,
    Config(String),
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::EmptyInput => write!(f, "message is empty"),
            ChatError::Busy => write!(f, "a response is already being generated"),
            ChatError::NoCharacter => write!(f, "no character selected"),
            ChatError::Config(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for ChatError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(GenerationError::from_status(401, "").kind, GenerationErrorKind::Auth);
        assert_eq!(GenerationError::from_status(403, "").kind, GenerationErrorKind::Auth);
        assert_eq!(
            GenerationError::from_status(429, "slow down").kind,
            GenerationErrorKind::RateLimited
        );
        let err = GenerationError::from_status(500, "boom");
        assert_eq!(err.kind, GenerationErrorKind::Provider);
        assert_eq!(err.status, Some(500));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn app_status_error_converts_to_generation_error() {
        let err: GenerationError = AppError::Status {
            status: 429,
            body: "busy".into(),
        }
        .into();
        assert_eq!(err.kind, GenerationErrorKind::RateLimited);
    }
}
