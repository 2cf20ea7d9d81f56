//! Canvas bridge: drives a published scene inside a display's content frame.
//!
//! The display host holds the real capabilities (text queries, header
//! height). The scene runs inside a frame and talks to the host through a
//! polyfill that mirrors the host's API. Both sides exchange JSON envelopes
//! over a [`link`] and never share memory.

pub mod error;
pub mod heartbeat;
pub mod host;
pub mod link;
pub mod polyfill;
pub mod presentation;
pub mod protocol;
pub mod publisher;

pub use error::{BridgeError, Result};
pub use host::{CanvasHost, CapabilityHost};
pub use link::{link, FrameEnd, HostEnd, Port};
pub use polyfill::{CanvasPolyfill, FrameContext, SceneCallbacks};
pub use presentation::{DisplaySurface, FramePresentation, FrameSurface};
pub use protocol::{SceneState, SceneUpdate};
pub use publisher::{EditorPublisher, SceneSource};
