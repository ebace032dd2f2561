use thiserror::Error;

pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[derive(Debug, Error, Clone)]
pub enum RealtimeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("api error: status {status}")]
    Api { status: u16 },
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(e: reqwest::Error) -> Self {
        RealtimeError::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::Transport(e.to_string())
    }
}

impl RealtimeError {
    /// Returns whether this error is worth retrying (connection-level failures)
    pub fn is_retryable(&self) -> bool {
        match self {
            RealtimeError::Transport(_) | RealtimeError::Http(_) => true,
            RealtimeError::Api { status } => *status >= 500,
            _ => false,
        }
    }
}
