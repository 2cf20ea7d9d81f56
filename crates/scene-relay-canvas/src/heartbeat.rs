//! Keep-alive heartbeat for the display host session.
//!
//! The host session idles out unless something is said. Every interval the
//! host sends a single-space text query. The host answers it like any other
//! query and emits a START/END TTS mark pair, which must not reach the scene.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::host::CanvasHost;
use crate::protocol::{MARK_END, MARK_START};

/// The synthetic query. Distinguishable from anything a user can say.
pub const HEARTBEAT_QUERY: &str = " ";

/// One-shot suppression flags for the marks a heartbeat produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkSuppression {
    ignore_start: bool,
    ignore_end: bool,
}

impl MarkSuppression {
    /// Expect one START and one END from the heartbeat. Re-arming an already
    /// armed flag leaves a single pending suppression.
    pub fn arm(&mut self) {
        self.ignore_start = true;
        self.ignore_end = true;
    }

    /// Consume a pending suppression for `mark`. Returns `true` if the mark
    /// should be dropped.
    pub fn consume(&mut self, mark: &str) -> bool {
        if mark == MARK_START && self.ignore_start {
            self.ignore_start = false;
            return true;
        }
        if mark == MARK_END && self.ignore_end {
            self.ignore_end = false;
            return true;
        }
        false
    }

    pub fn is_armed(&self) -> bool {
        self.ignore_start || self.ignore_end
    }
}

/// Spawn the heartbeat loop. The first tick fires one `period` after start.
///
/// A zero period, or one too large for the clock, yields a task that exits
/// without ticking.
pub fn spawn_heartbeat(host: CanvasHost, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(period).filter(|_| !period.is_zero())
        else {
            warn!(frame_id = %host.frame_id(), ?period, "Heartbeat disabled, unusable period");
            return;
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!(frame_id = %host.frame_id(), "Heartbeat tick");
            host.heartbeat_tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use scene_relay_core::config::CanvasConfig;
    use scene_relay_core::session_store::MemorySessionStore;

    use crate::host::CapabilityHost;
    use crate::link::link;
    use crate::presentation::DisplaySurface;

    struct Silent;

    #[async_trait::async_trait]
    impl CapabilityHost for Silent {
        async fn send_text_query(&self, _query: &str) -> crate::Result<String> {
            Ok("OK".to_string())
        }

        async fn get_header_height_px(&self) -> crate::Result<i64> {
            Ok(0)
        }
    }

    fn host() -> CanvasHost {
        let (host_end, _frame_end) = link();
        CanvasHost::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(Silent),
            Arc::new(DisplaySurface::new()),
            host_end.to_frame,
            &CanvasConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_unusable_periods_end_quietly() {
        spawn_heartbeat(host(), Duration::MAX).await.unwrap();
        spawn_heartbeat(host(), Duration::ZERO).await.unwrap();
    }

    #[test]
    fn test_each_flag_consumed_once() {
        let mut s = MarkSuppression::default();
        assert!(!s.consume(MARK_START));

        s.arm();
        assert!(s.consume(MARK_START));
        assert!(!s.consume(MARK_START));
        assert!(s.is_armed());
        assert!(s.consume(MARK_END));
        assert!(!s.consume(MARK_END));
        assert!(!s.is_armed());
    }

    #[test]
    fn test_rearm_does_not_stack() {
        let mut s = MarkSuppression::default();
        s.arm();
        s.arm();
        assert!(s.consume(MARK_START));
        assert!(!s.consume(MARK_START));
    }

    #[test]
    fn test_other_marks_pass() {
        let mut s = MarkSuppression::default();
        s.arm();
        assert!(!s.consume("WORD"));
        assert!(s.is_armed());
    }
}
