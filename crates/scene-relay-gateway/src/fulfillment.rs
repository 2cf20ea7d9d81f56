//! Welcome and fallback intent handlers.

use std::sync::Arc;

use chrono::Utc;
use scene_relay_canvas::SceneUpdate;
use scene_relay_core::config::{AllocatorConfig, CanvasConfig};
use scene_relay_core::pairing::CodeAllocator;
use scene_relay_core::session::SessionStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

/// Surface capability required to render the canvas.
pub const INTERACTIVE_CANVAS: &str = "actions.capability.INTERACTIVE_CANVAS";

pub const NOT_SUPPORTED: &str = "Interactive Canvas is not supported on this device.";

pub const APOLOGY: &str = "Oops! Something went wrong. Please try again later.";

/// What a handler answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationResponse {
    /// Keep the conversation open and push data to the canvas. A `url`
    /// (re)loads the canvas page; without one the data goes to the open page.
    Ask {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        data: Value,
    },
    /// End the conversation.
    Close { message: String },
}

/// One turn of the assistant conversation, as seen by a handler.
pub trait Conversation: Send {
    /// The raw user input that triggered the intent.
    fn query(&self) -> &str;

    fn has_capability(&self, capability: &str) -> bool;

    fn ask_with_canvas_payload(&mut self, url: Option<String>, data: Value);

    fn close_with_message(&mut self, message: &str);
}

/// Intent handlers bound to a session store.
pub struct Fulfillment {
    allocator: CodeAllocator,
    hosting_base_url: String,
}

impl Fulfillment {
    pub fn new(
        store: Arc<dyn SessionStore>,
        allocator: &AllocatorConfig,
        canvas: &CanvasConfig,
    ) -> scene_relay_core::error::Result<Self> {
        Ok(Self {
            allocator: CodeAllocator::from_config(store, allocator)?,
            hosting_base_url: canvas.hosting_base_url.clone(),
        })
    }

    /// Canvas page URL, cache-busted per request.
    fn canvas_url(&self) -> String {
        format!(
            "{}canvas.html?{}",
            self.hosting_base_url,
            Utc::now().timestamp_millis()
        )
    }

    /// Welcome intent: allocate a code and open the canvas page seeded with it.
    pub async fn welcome(&self, conv: &mut dyn Conversation) {
        let has_canvas = conv.has_capability(INTERACTIVE_CANVAS);

        match self.allocator.allocate().await {
            Ok(code) => {
                if has_canvas {
                    info!(code = %code, "Opening canvas");
                    let data = SceneUpdate::welcome(code.as_str(), conv.query()).to_value();
                    conv.ask_with_canvas_payload(Some(self.canvas_url()), data);
                } else {
                    conv.close_with_message(NOT_SUPPORTED);
                }
            }
            Err(e) => {
                error!(%e, "Session code allocation failed");
                conv.close_with_message(APOLOGY);
            }
        }
    }

    /// Fallback intent: hand the user's words to the open scene.
    pub fn fallback(&self, conv: &mut dyn Conversation) {
        if conv.has_capability(INTERACTIVE_CANVAS) {
            let data = SceneUpdate::fallback(conv.query()).to_value();
            conv.ask_with_canvas_payload(None, data);
        } else {
            conv.close_with_message(NOT_SUPPORTED);
        }
    }
}

/// Intent names accepted by the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Welcome,
    Fallback,
}

/// Webhook request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub intent: Intent,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A conversation turn reconstructed from a webhook request.
#[derive(Debug)]
pub struct WebhookConversation {
    request: FulfillmentRequest,
    response: Option<ConversationResponse>,
}

impl WebhookConversation {
    pub fn new(request: FulfillmentRequest) -> Self {
        Self {
            request,
            response: None,
        }
    }

    pub fn into_response(self) -> Option<ConversationResponse> {
        self.response
    }
}

impl Conversation for WebhookConversation {
    fn query(&self) -> &str {
        &self.request.query
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.request.capabilities.iter().any(|c| c == capability)
    }

    fn ask_with_canvas_payload(&mut self, url: Option<String>, data: Value) {
        self.response = Some(ConversationResponse::Ask { url, data });
    }

    fn close_with_message(&mut self, message: &str) {
        self.response = Some(ConversationResponse::Close {
            message: message.to_string(),
        });
    }
}
