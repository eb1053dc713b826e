use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failure of a single round trip to the debug adapter.
///
/// The model converts these into degraded-but-valid local state (empty children,
/// "not available" values, error scopes) instead of propagating them. Only
/// [`SessionError::Cancelled`] is treated specially: it is never surfaced to users.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("request was cancelled")]
    Cancelled,
    #[error("debug adapter does not support `{0}`")]
    Unsupported(&'static str),
    #[error("debug session is not active")]
    NotActive,
    #[error("{0}")]
    Adapter(String),
    #[error("invalid response from debug adapter: {0}")]
    InvalidResponse(String),
}

impl SessionError {
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read debug model config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep only the parser message; the default `Display` embeds a snippet of the input.
        ConfigError::Toml(err.message().to_string())
    }
}
