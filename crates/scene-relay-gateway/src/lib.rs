//! Conversation fulfillment and the HTTP gateway that exposes it.
//!
//! The assistant framework calls the welcome and fallback handlers. Welcome
//! allocates a session code and asks the display to open the canvas page;
//! fallback relays the user's words into the already-open scene.

pub mod fulfillment;
pub mod server;
pub mod state;

pub use fulfillment::{Conversation, ConversationResponse, Fulfillment};
pub use server::{build_router, start_gateway};
pub use state::GatewayState;
