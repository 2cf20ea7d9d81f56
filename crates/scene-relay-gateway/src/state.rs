//! Gateway shared state.

use std::sync::Arc;

use scene_relay_core::config::Config;
use scene_relay_core::error::Result;
use scene_relay_core::session::SessionStore;

use crate::fulfillment::Fulfillment;

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn SessionStore>,
    pub fulfillment: Fulfillment,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, store: Arc<dyn SessionStore>) -> Result<Self> {
        let fulfillment = Fulfillment::new(store.clone(), &config.allocator(), &config.canvas())?;
        Ok(Self {
            config,
            store,
            fulfillment,
        })
    }
}
