use scene_relay_core::error::SceneRelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Peer context disconnected")]
    Disconnected,

    #[error("Unexpected message: {0}")]
    Unexpected(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error(transparent)]
    Core(#[from] SceneRelayError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
