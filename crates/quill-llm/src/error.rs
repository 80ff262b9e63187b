#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed for {provider}")]
    Auth { provider: &'static str },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("context length exceeded")]
    ContextLength,

    #[error("server error (status {status})")]
    Server { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("all providers failed: {summary}")]
    AllProvidersFailed { summary: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// Failure taxonomy driving the fallback decision. Everything except
/// authentication and request-shape errors is worth trying on another
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    RateLimit,
    AuthError,
    NetworkError,
    ServerError,
    ContextLength,
    InvalidRequest,
    Timeout,
    Unknown,
}

impl FailureKind {
    #[must_use]
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::AuthError | Self::InvalidRequest)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::AuthError => "auth_error",
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::ContextLength => "context_length",
            Self::InvalidRequest => "invalid_request",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl LlmError {
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::RateLimited => FailureKind::RateLimit,
            Self::Auth { .. } => FailureKind::AuthError,
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::ContextLength => FailureKind::ContextLength,
            Self::Server { .. } => FailureKind::ServerError,
            Self::Timeout => FailureKind::Timeout,
            Self::Http(e) => {
                if e.is_timeout() {
                    FailureKind::Timeout
                } else if e.is_connect() || e.is_request() {
                    FailureKind::NetworkError
                } else {
                    FailureKind::Unknown
                }
            }
            Self::Json(_) | Self::EmptyResponse { .. } => FailureKind::ServerError,
            Self::AllProvidersFailed { .. } | Self::Other(_) => FailureKind::Unknown,
        }
    }
}
