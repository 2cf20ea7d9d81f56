//! Display host side of the bridge.
//!
//! The host owns the real capabilities. It answers the frame's upward
//! `method` calls with them, forwards scene callbacks down, keeps the frame's
//! document in sync with the session record, and runs the heartbeat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scene_relay_core::config::CanvasConfig;
use scene_relay_core::protocol::{Envelope, MessageName, MessageType, STATUS_BLOCKED};
use scene_relay_core::session::{RecordWatch, SessionCode, SessionStore};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::heartbeat::{spawn_heartbeat, MarkSuppression, HEARTBEAT_QUERY};
use crate::link::Port;
use crate::presentation::{FramePresentation, FrameSurface};
use crate::protocol::{SceneState, SceneUpdate};

/// The platform services the display exposes to scenes.
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    /// Inject a text query into the conversation. Resolves with a status.
    async fn send_text_query(&self, query: &str) -> Result<String>;

    /// Height of the display's header overlay in pixels.
    async fn get_header_height_px(&self) -> Result<i64>;
}

/// Lifecycle of the current content frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// A document was (re)injected; its polyfill has not said `ready` yet.
    #[default]
    WaitingForReady,
    /// The polyfill announced itself.
    Bound,
}

/// Per-frame bridge state.
#[derive(Default)]
struct BridgeSession {
    phase: FramePhase,
    header_height_px: Option<i64>,
    suppression: MarkSuppression,
    code: Option<SessionCode>,
    subscription: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

struct HostInner {
    frame_id: Uuid,
    store: Arc<dyn SessionStore>,
    capabilities: Arc<dyn CapabilityHost>,
    surface: Arc<dyn FrameSurface>,
    to_frame: Port,
    default_code: String,
    heartbeat_interval: Duration,
    session: Mutex<BridgeSession>,
}

/// Host end of the bridge for one content frame. Cheap to clone.
#[derive(Clone)]
pub struct CanvasHost {
    inner: Arc<HostInner>,
}

impl CanvasHost {
    pub fn new(
        store: Arc<dyn SessionStore>,
        capabilities: Arc<dyn CapabilityHost>,
        surface: Arc<dyn FrameSurface>,
        to_frame: Port,
        config: &CanvasConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                frame_id: Uuid::new_v4(),
                store,
                capabilities,
                surface,
                to_frame,
                default_code: config.default_code.clone(),
                heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
                session: Mutex::new(BridgeSession::default()),
            }),
        }
    }

    pub fn frame_id(&self) -> Uuid {
        self.inner.frame_id
    }

    pub async fn phase(&self) -> FramePhase {
        self.inner.session.lock().await.phase
    }

    pub async fn header_height_px(&self) -> Option<i64> {
        self.inner.session.lock().await.header_height_px
    }

    /// The code whose record is currently bound to the frame.
    pub async fn bound_code(&self) -> Option<SessionCode> {
        self.inner.session.lock().await.code.clone()
    }

    /// Resolve the header height in the background and cache it.
    ///
    /// Nothing is pushed to the frame when it arrives; the frame picks it up
    /// on its next `ready` or `getHeaderHeightPx`.
    pub fn start(&self) -> JoinHandle<()> {
        let host = self.clone();
        tokio::spawn(async move {
            match host.inner.capabilities.get_header_height_px().await {
                Ok(px) => {
                    host.inner.session.lock().await.header_height_px = Some(px);
                    debug!(frame_id = %host.frame_id(), px, "Header height resolved");
                }
                Err(e) => warn!(frame_id = %host.frame_id(), %e, "Header height unavailable"),
            }
        })
    }

    /// Drain upward messages until the frame goes away.
    pub async fn run(self, mut from_frame: mpsc::UnboundedReceiver<String>) {
        info!(frame_id = %self.frame_id(), "Canvas host listening");
        while let Some(raw) = from_frame.recv().await {
            trace!(frame_id = %self.frame_id(), message = %raw, "canvas message");
            if let Err(e) = self.handle_message(&raw).await {
                error!(frame_id = %self.frame_id(), %e, "Failed to handle frame message");
            }
        }
        self.shutdown().await;
        debug!(frame_id = %self.frame_id(), "Frame disconnected");
    }

    /// Stop the record subscription and heartbeat.
    pub async fn shutdown(&self) {
        let mut session = self.inner.session.lock().await;
        if let Some(task) = session.subscription.take() {
            task.abort();
        }
        if let Some(task) = session.heartbeat.take() {
            task.abort();
        }
    }

    /// Handle one message posted by the frame.
    pub async fn handle_message(&self, raw: &str) -> Result<()> {
        let envelope = Envelope::decode(raw)?;
        match envelope.kind {
            MessageType::Log => {
                forward_log(&envelope);
                Ok(())
            }
            MessageType::Method => match envelope.name {
                Some(MessageName::Ready) => self.on_frame_ready().await,
                Some(MessageName::SendTextQuery) => self.on_send_text_query(&envelope),
                Some(MessageName::GetHeaderHeightPx) => self.push_cached_height().await,
                other => Err(BridgeError::Unexpected(format!("method {other:?}"))),
            },
            // Replies and callbacks travel downward only.
            other => {
                debug!(frame_id = %self.frame_id(), kind = ?other, "Ignoring non-method message");
                Ok(())
            }
        }
    }

    async fn on_frame_ready(&self) -> Result<()> {
        {
            let mut session = self.inner.session.lock().await;
            session.phase = FramePhase::Bound;
            if session.heartbeat.is_none() {
                session.heartbeat =
                    Some(spawn_heartbeat(self.clone(), self.inner.heartbeat_interval));
            }
        }
        info!(frame_id = %self.frame_id(), "Frame bound");
        self.push_cached_height().await
    }

    async fn push_cached_height(&self) -> Result<()> {
        let cached = self.inner.session.lock().await.header_height_px;
        match cached {
            Some(px) => self.inner.to_frame.post(&Envelope::height(px)),
            None => {
                debug!(frame_id = %self.frame_id(), "Header height not known yet");
                Ok(())
            }
        }
    }

    fn on_send_text_query(&self, envelope: &Envelope) -> Result<()> {
        let query = envelope
            .parameter_str()
            .ok_or_else(|| BridgeError::Unexpected("sendTextQuery without text".into()))?
            .to_string();

        let host = self.clone();
        tokio::spawn(async move {
            match host.inner.capabilities.send_text_query(&query).await {
                Ok(status) => {
                    if let Err(e) = host.inner.to_frame.post(&Envelope::status(status)) {
                        warn!(frame_id = %host.frame_id(), %e, "Could not deliver query status");
                    }
                }
                Err(e) => warn!(frame_id = %host.frame_id(), %e, "Text query failed"),
            }
        });
        Ok(())
    }

    /// Host callback: the conversation pushed new scene state.
    pub async fn on_update(&self, state: Value) -> Result<()> {
        let update = serde_json::from_value::<SceneUpdate>(state.clone()).ok();

        if let Some(SceneUpdate {
            scene_state: SceneState::Welcome,
            code,
            ..
        }) = update
        {
            let code = code.ok_or_else(|| BridgeError::Unexpected("WELCOME without code".into()))?;
            let code = SessionCode::parse(&code)?;
            return self.load_frame(code).await;
        }

        // FALLBACK, or anything unrecognized, goes to the scene.
        let raw = state.get("raw").and_then(Value::as_str);
        if raw == Some(HEARTBEAT_QUERY) {
            debug!(frame_id = %self.frame_id(), "Dropping heartbeat echo");
            return Ok(());
        }
        self.inner
            .to_frame
            .post(&Envelope::callback(MessageName::OnUpdate, state))
    }

    /// Host callback: a TTS mark was reached.
    pub async fn on_tts_mark(&self, mark: &str) -> Result<()> {
        if self.inner.session.lock().await.suppression.consume(mark) {
            debug!(frame_id = %self.frame_id(), mark, "Suppressed heartbeat mark");
            return Ok(());
        }
        self.inner
            .to_frame
            .post(&Envelope::callback(MessageName::OnTtsMark, Value::from(mark)))
    }

    /// One heartbeat: a blank query, then arm suppression unless blocked.
    pub async fn heartbeat_tick(&self) {
        match self.inner.capabilities.send_text_query(HEARTBEAT_QUERY).await {
            Ok(status) if status != STATUS_BLOCKED => {
                self.inner.session.lock().await.suppression.arm();
            }
            Ok(status) => debug!(frame_id = %self.frame_id(), %status, "Heartbeat blocked"),
            Err(e) => warn!(frame_id = %self.frame_id(), %e, "Heartbeat query failed"),
        }
    }

    /// Bind the frame to `code` and follow its record.
    ///
    /// The previous binding is only replaced once the new subscription is
    /// open; on error the frame keeps showing and following the old code.
    pub async fn load_frame(&self, code: SessionCode) -> Result<()> {
        if code.as_str() == self.inner.default_code {
            self.rebind(code.clone(), None).await;
            info!(frame_id = %self.frame_id(), code = %code, "Default code, not subscribing");
            return Ok(());
        }

        let records = self.inner.store.subscribe(&code).await?;
        self.rebind(code.clone(), Some(records)).await;
        info!(frame_id = %self.frame_id(), code = %code, "Following session record");
        Ok(())
    }

    /// Swap the bound code and its follower under one lock.
    async fn rebind(&self, code: SessionCode, records: Option<RecordWatch>) {
        let mut session = self.inner.session.lock().await;
        if let Some(previous) = session.subscription.take() {
            previous.abort();
        }
        self.inner.surface.show_code(&code);
        session.code = Some(code);
        session.subscription = records.map(|records| self.follow(records));
    }

    fn follow(&self, mut records: RecordWatch) -> JoinHandle<()> {
        let host = self.clone();
        tokio::spawn(async move {
            loop {
                let latest = records.borrow_and_update().clone();
                host.apply_snapshot(FramePresentation::for_record(latest.as_ref()))
                    .await;
                if records.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn apply_snapshot(&self, presentation: FramePresentation) {
        // A new (or cleared) document means a new polyfill instance.
        self.inner.session.lock().await.phase = FramePhase::WaitingForReady;
        debug!(
            frame_id = %self.frame_id(),
            visible = presentation.is_visible(),
            "Applying record snapshot"
        );
        self.inner.surface.present(&presentation);
    }
}

fn forward_log(envelope: &Envelope) {
    let messages = envelope
        .messages
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    match envelope.level.as_deref() {
        Some("error") => error!(target: "scene", "{messages}"),
        Some("warn") => warn!(target: "scene", "{messages}"),
        Some("debug") => debug!(target: "scene", "{messages}"),
        _ => info!(target: "scene", "{messages}"),
    }
}
