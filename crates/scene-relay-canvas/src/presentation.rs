//! What the display shows for a given session record.

use scene_relay_core::session::{SessionCode, SessionRecord};
use tokio::sync::watch;

/// Frame presentation derived from the latest record state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FramePresentation {
    /// A scene is published: inject it and show the frame.
    Scene { html: String },
    /// An editor claimed the code but has not published yet.
    Linked { html: Option<String> },
    /// Nothing to show: clear injected content and hide the frame.
    #[default]
    Hidden,
}

impl FramePresentation {
    /// Evaluate a snapshot from scratch. No diffing against earlier state.
    pub fn for_record(record: Option<&SessionRecord>) -> Self {
        let Some(record) = record else {
            return Self::Hidden;
        };
        if let Some(html) = record.published_html() {
            Self::Scene {
                html: html.to_string(),
            }
        } else if record.is_linked() {
            Self::Linked {
                html: record.html.clone(),
            }
        } else {
            Self::Hidden
        }
    }

    /// The document to inject into the frame, if any.
    pub fn document(&self) -> Option<&str> {
        match self {
            Self::Scene { html } => Some(html),
            Self::Linked { html } => html.as_deref(),
            Self::Hidden => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Scene { .. })
    }
}

/// The display chrome around the content frame.
pub trait FrameSurface: Send + Sync {
    /// Show the session code the user should type into the editor.
    fn show_code(&self, code: &SessionCode);

    /// Apply a frame presentation.
    fn present(&self, presentation: &FramePresentation);
}

/// Snapshot of what a [`DisplaySurface`] currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceView {
    pub code: Option<SessionCode>,
    pub presentation: FramePresentation,
    /// Number of documents injected so far.
    pub loads: u64,
}

/// Surface that publishes its state on a watch channel.
pub struct DisplaySurface {
    tx: watch::Sender<SurfaceView>,
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface {
    pub fn new() -> Self {
        Self {
            tx: watch::channel(SurfaceView::default()).0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SurfaceView> {
        self.tx.subscribe()
    }

    pub fn view(&self) -> SurfaceView {
        self.tx.borrow().clone()
    }
}

impl FrameSurface for DisplaySurface {
    fn show_code(&self, code: &SessionCode) {
        self.tx.send_modify(|view| view.code = Some(code.clone()));
    }

    fn present(&self, presentation: &FramePresentation) {
        self.tx.send_modify(|view| {
            if presentation.document().is_some() {
                view.loads += 1;
            }
            view.presentation = presentation.clone();
        });
    }
}
