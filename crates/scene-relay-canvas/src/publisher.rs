//! Editor side: claim a session code and publish scenes to it.

use std::sync::Arc;

use scene_relay_core::config::CanvasConfig;
use scene_relay_core::error::SceneRelayError;
use scene_relay_core::session::{RecordPatch, SessionCode, SessionStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// The three editor buffers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneSource {
    pub html: String,
    pub css: String,
    pub js: String,
}

/// Compose the single document a display loads into its frame.
///
/// `desktop` marks the local editor preview, where the polyfill answers
/// capability calls itself instead of asking a host.
pub fn compose_document(desktop: bool, polyfill_src: &str, scene: &SceneSource) -> String {
    format!(
        "<!DOCTYPE html>
<html>
  <head>
    <script type='text/javascript'>window.desktop = {desktop};</script>
    <script src='{polyfill_src}'></script>
    <style type='text/css'>{css}</style>
  </head>
  <body>
    {html}
    <script type='text/javascript'>
      {js}
    </script>
  </body>
</html>",
        css = scene.css,
        html = scene.html,
        js = scene.js,
    )
}

/// Result of claiming a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The record is now marked linked.
    Linked(SessionCode),
    /// The reserved testing code: preview only, nothing stored.
    Local,
}

/// Writes editor output into session records.
pub struct EditorPublisher {
    store: Arc<dyn SessionStore>,
    polyfill_src: String,
    default_code: String,
}

impl EditorPublisher {
    pub fn new(store: Arc<dyn SessionStore>, config: &CanvasConfig) -> Self {
        Self {
            store,
            polyfill_src: config.polyfill_src.clone(),
            default_code: config.default_code.clone(),
        }
    }

    /// Validate a typed-in code. `None` means the reserved testing code.
    async fn resolve(&self, raw: &str) -> Result<Option<SessionCode>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SceneRelayError::InvalidCode(String::new()).into());
        }
        if raw == self.default_code {
            return Ok(None);
        }
        let code = SessionCode::parse(raw)?;
        if self.store.get(&code).await?.is_none() {
            debug!(code = %code, "No record for code");
            return Err(SceneRelayError::InvalidCode(code.to_string()).into());
        }
        Ok(Some(code))
    }

    /// Claim a code the display is showing.
    pub async fn link(&self, raw_code: &str) -> Result<LinkOutcome> {
        let Some(code) = self.resolve(raw_code).await? else {
            return Ok(LinkOutcome::Local);
        };
        if !self.store.set(&code, RecordPatch::linked()).await? {
            return Err(SceneRelayError::InvalidCode(code.to_string()).into());
        }
        info!(code = %code, "Editor linked");
        Ok(LinkOutcome::Linked(code))
    }

    /// Publish a scene. Returns the desktop preview document; the stored
    /// document is the non-preview variant and replaces any earlier one.
    pub async fn publish(&self, raw_code: &str, scene: &SceneSource) -> Result<String> {
        let preview = compose_document(true, &self.polyfill_src, scene);
        let Some(code) = self.resolve(raw_code).await? else {
            return Ok(preview);
        };
        let document = compose_document(false, &self.polyfill_src, scene);
        if !self.store.set(&code, RecordPatch::html(document)).await? {
            return Err(SceneRelayError::InvalidCode(code.to_string()).into());
        }
        info!(code = %code, bytes = preview.len(), "Scene published");
        Ok(preview)
    }
}
