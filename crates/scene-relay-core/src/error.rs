use thiserror::Error;

#[derive(Debug, Error)]
pub enum SceneRelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid session code: {0}")]
    InvalidCode(String),

    #[error("No free session code after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SceneRelayError>;
