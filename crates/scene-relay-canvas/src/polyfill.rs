//! Frame side of the bridge.
//!
//! Scene scripts are written against the display's capability API. Inside a
//! content frame that API is not available, so [`CanvasPolyfill`] provides the
//! same shape and proxies every call through the host. Each call kind has a
//! single pending slot: a second call before the first is answered replaces
//! the pending resolver and the first call never completes.

use std::sync::{Arc, OnceLock};

use scene_relay_core::protocol::{Envelope, MessageName, MessageType, STATUS_READY};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, trace};

use crate::error::{BridgeError, Result};
use crate::link::Port;

type UpdateFn = Box<dyn Fn(Value) + Send + Sync>;
type MarkFn = Box<dyn Fn(String) + Send + Sync>;

/// Callbacks a scene registers with `ready`. Either may be left unset.
#[derive(Default)]
pub struct SceneCallbacks {
    on_update: Option<UpdateFn>,
    on_tts_mark: Option<MarkFn>,
}

impl SceneCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_tts_mark(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_tts_mark = Some(Box::new(f));
        self
    }
}

#[derive(Default)]
struct PolyfillState {
    callbacks: Option<Arc<SceneCallbacks>>,
    header_height_px: Option<i64>,
    pending_height: Option<oneshot::Sender<i64>>,
    /// Status that arrived while no query was outstanding. Consumed once.
    early_status: Option<String>,
    pending_status: Option<oneshot::Sender<String>>,
    /// Upward queries still owed a reply, superseded ones included.
    outstanding_queries: u32,
}

/// The capability API as seen by a scene inside the frame.
pub struct CanvasPolyfill {
    to_host: Port,
    /// Local editor preview: no host behind the frame.
    desktop: bool,
    state: Mutex<PolyfillState>,
}

impl CanvasPolyfill {
    pub fn new(to_host: Port, desktop: bool) -> Self {
        info!(desktop, "Canvas polyfill created");
        Self {
            to_host,
            desktop,
            state: Mutex::new(PolyfillState::default()),
        }
    }

    pub fn is_desktop(&self) -> bool {
        self.desktop
    }

    /// Register scene callbacks and announce the frame to the host.
    pub async fn ready(&self, callbacks: SceneCallbacks) -> Result<()> {
        debug!("Canvas polyfill ready");
        self.state.lock().await.callbacks = Some(Arc::new(callbacks));
        self.to_host.post(&Envelope::method(MessageName::Ready, None))
    }

    /// Inject a text query through the host and wait for its status.
    pub async fn send_text_query(&self, query: &str) -> Result<String> {
        if self.desktop {
            debug!("Respond with READY for editor preview");
            return Ok(STATUS_READY.to_string());
        }

        let rx = {
            let mut state = self.state.lock().await;
            if let Some(status) = state.early_status.take() {
                return Ok(status);
            }
            let (tx, rx) = oneshot::channel();
            if state.pending_status.replace(tx).is_some() {
                debug!("Replacing pending sendTextQuery resolver");
            }
            state.outstanding_queries += 1;
            rx
        };

        let posted = self.to_host.post(&Envelope::method(
            MessageName::SendTextQuery,
            Some(Value::String(query.to_string())),
        ));
        if let Err(e) = posted {
            let mut state = self.state.lock().await;
            state.outstanding_queries = state.outstanding_queries.saturating_sub(1);
            return Err(e);
        }
        Ok(wait_for_reply(rx).await)
    }

    /// Header overlay height, fetched once from the host and then cached.
    pub async fn get_header_height_px(&self) -> Result<i64> {
        if self.desktop {
            debug!("Header height is 0 for editor preview");
            return Ok(0);
        }

        let rx = {
            let mut state = self.state.lock().await;
            if let Some(px) = state.header_height_px {
                return Ok(px);
            }
            let (tx, rx) = oneshot::channel();
            state.pending_height = Some(tx);
            rx
        };

        self.to_host
            .post(&Envelope::method(MessageName::GetHeaderHeightPx, None))?;
        Ok(wait_for_reply(rx).await)
    }

    /// Forward a console line to the host's log.
    pub fn log(&self, level: &str, messages: Value) -> Result<()> {
        self.to_host.post(&Envelope::log(level, messages))
    }

    /// Handle one message posted by the host.
    pub async fn handle_message(&self, raw: &str) -> Result<()> {
        let envelope = Envelope::decode(raw)?;
        match envelope.kind {
            MessageType::Callback => self.dispatch_callback(envelope).await,
            MessageType::GetHeaderHeightPx => {
                let px = envelope.parameter_int().ok_or_else(|| {
                    BridgeError::Unexpected(format!("bad height {:?}", envelope.parameter))
                })?;
                let mut state = self.state.lock().await;
                state.header_height_px = Some(px);
                if let Some(tx) = state.pending_height.take() {
                    let _ = tx.send(px);
                }
                Ok(())
            }
            MessageType::SendTextQuery => {
                let status = match envelope.parameter {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let mut state = self.state.lock().await;
                if state.outstanding_queries == 0 {
                    state.early_status = Some(status);
                    return Ok(());
                }
                state.outstanding_queries -= 1;
                match state.pending_status.take() {
                    Some(tx) => {
                        let _ = tx.send(status);
                    }
                    // Reply to a query whose caller already got an answer.
                    None => debug!(%status, "Dropping surplus sendTextQuery reply"),
                }
                Ok(())
            }
            other => {
                debug!(kind = ?other, "Ignoring upward message type");
                Ok(())
            }
        }
    }

    async fn dispatch_callback(&self, envelope: Envelope) -> Result<()> {
        let Some(callbacks) = self.state.lock().await.callbacks.clone() else {
            debug!("Callback before ready, dropping");
            return Ok(());
        };
        let parameter = envelope.parameter.unwrap_or(Value::Null);
        match envelope.name {
            Some(MessageName::OnUpdate) => {
                if let Some(f) = &callbacks.on_update {
                    f(parameter);
                }
            }
            Some(MessageName::OnTtsMark) => {
                if let Some(f) = &callbacks.on_tts_mark {
                    let mark = match parameter {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    f(mark);
                }
            }
            other => debug!(name = ?other, "No such scene callback"),
        }
        Ok(())
    }

    /// Drain downward messages until the host goes away.
    pub async fn run(self: Arc<Self>, mut from_host: mpsc::UnboundedReceiver<String>) {
        while let Some(raw) = from_host.recv().await {
            trace!(message = %raw, "canvasPolyfill message");
            if let Err(e) = self.handle_message(&raw).await {
                error!(%e, "Failed to handle host message");
            }
        }
        debug!("Host disconnected");
    }
}

/// A reply that never comes leaves the call pending forever; there is no
/// cancellation. A replaced resolver lands here too.
async fn wait_for_reply<T>(rx: oneshot::Receiver<T>) -> T {
    match rx.await {
        Ok(value) => value,
        Err(_) => std::future::pending().await,
    }
}

/// A content frame's global scope. The polyfill is installed at most once,
/// however many times the frame's document is evaluated.
#[derive(Default)]
pub struct FrameContext {
    polyfill: OnceLock<Arc<CanvasPolyfill>>,
}

impl FrameContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the polyfill and start its listener. Re-entry returns the
    /// existing instance and drops the passed link.
    pub fn install(
        &self,
        to_host: Port,
        from_host: mpsc::UnboundedReceiver<String>,
        desktop: bool,
    ) -> Arc<CanvasPolyfill> {
        let mut fresh = false;
        let polyfill = self
            .polyfill
            .get_or_init(|| {
                fresh = true;
                Arc::new(CanvasPolyfill::new(to_host, desktop))
            })
            .clone();
        if fresh {
            tokio::spawn(polyfill.clone().run(from_host));
        } else {
            info!("Canvas polyfill already installed");
        }
        polyfill
    }

    pub fn polyfill(&self) -> Option<Arc<CanvasPolyfill>> {
        self.polyfill.get().cloned()
    }
}
