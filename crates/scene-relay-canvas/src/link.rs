//! Cross-context message channel.
//!
//! Stands in for the browser's window messaging: each side posts encoded
//! envelopes into an unbounded queue and the other side drains it in arrival
//! order.

use scene_relay_core::protocol::Envelope;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

/// Sending half of a context link.
#[derive(Debug, Clone)]
pub struct Port {
    tx: mpsc::UnboundedSender<String>,
}

impl Port {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Encode and post an envelope to the other context.
    pub fn post(&self, envelope: &Envelope) -> Result<()> {
        let raw = envelope.encode()?;
        self.tx.send(raw).map_err(|_| BridgeError::Disconnected)
    }
}

/// The display host's end: posts down to the frame, receives from it.
pub struct HostEnd {
    pub to_frame: Port,
    pub from_frame: mpsc::UnboundedReceiver<String>,
}

/// The frame's end: posts up to the host, receives from it.
pub struct FrameEnd {
    pub to_host: Port,
    pub from_host: mpsc::UnboundedReceiver<String>,
}

/// Create a connected host/frame pair.
pub fn link() -> (HostEnd, FrameEnd) {
    let (down_tx, down_rx) = mpsc::unbounded_channel();
    let (up_tx, up_rx) = mpsc::unbounded_channel();
    (
        HostEnd {
            to_frame: Port::new(down_tx),
            from_frame: up_rx,
        },
        FrameEnd {
            to_host: Port::new(up_tx),
            from_host: down_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scene_relay_core::protocol::{MessageName, MessageType};

    #[tokio::test]
    async fn test_link_carries_encoded_envelopes() {
        let (host, mut frame) = link();
        host.to_frame.post(&Envelope::status("OK")).unwrap();
        let raw = frame.from_host.recv().await.unwrap();
        let env = Envelope::decode(&raw).unwrap();
        assert_eq!(env.kind, MessageType::SendTextQuery);
        assert_eq!(env.name, Some(MessageName::Status));
        assert_eq!(env.parameter_str(), Some("OK"));
    }

    #[tokio::test]
    async fn test_post_after_close_is_disconnected() {
        let (host, frame) = link();
        drop(frame);
        let err = host.to_frame.post(&Envelope::height(1)).unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected));
    }
}
