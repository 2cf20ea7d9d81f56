//! Session code allocation: pairs a display session with an editor.
//!
//! When a display starts, it is handed a short numeric code backed by a
//! session record. The user types the code into the editor to claim it.
//! Codes are recycled lazily: a record older than the staleness threshold is
//! reused the next time its code is drawn. There is no expiry sweep.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AllocatorConfig;
use crate::error::{Result, SceneRelayError};
use crate::session::{SessionCode, SessionRecord, SessionStore};

/// Default number of draws before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Records untouched for longer than this may be reused.
pub fn default_stale_after() -> chrono::Duration {
    chrono::Duration::milliseconds(86_400_000)
}

/// Draws and reserves session codes.
pub struct CodeAllocator {
    store: Arc<dyn SessionStore>,
    max_attempts: u32,
    stale_after: chrono::Duration,
}

impl CodeAllocator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stale_after: default_stale_after(),
        }
    }

    pub fn from_config(store: Arc<dyn SessionStore>, config: &AllocatorConfig) -> Result<Self> {
        let stale_after = chrono::Duration::try_hours(config.stale_after_hours).ok_or_else(|| {
            SceneRelayError::Config(format!(
                "allocator.stale_after_hours {} is out of range",
                config.stale_after_hours
            ))
        })?;
        Ok(Self {
            store,
            max_attempts: config.max_attempts,
            stale_after,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Allocate a code: create a fresh record or reclaim a stale one.
    ///
    /// Fresh occupants are never returned. Losing a create or refresh race to
    /// another allocator counts as a collision and triggers another draw.
    pub async fn allocate(&self) -> Result<SessionCode> {
        for attempt in 1..=self.max_attempts {
            let code = SessionCode::random(&mut rand::rng());
            let now = self.store.now();

            match self.store.get(&code).await? {
                None => {
                    if self.store.create(SessionRecord::new(code.clone(), now)).await? {
                        info!(code = %code, attempt, "Allocated session code");
                        return Ok(code);
                    }
                    debug!(code = %code, "Lost creation race, drawing again");
                }
                Some(record) if record.is_stale(now, self.stale_after) => {
                    if self.store.touch(&code, record.timestamp, now).await? {
                        info!(code = %code, attempt, "Reclaimed stale session code");
                        return Ok(code);
                    }
                    debug!(code = %code, "Lost refresh race, drawing again");
                }
                Some(_) => {
                    debug!(code = %code, "Session code in use, drawing again");
                }
            }
        }

        Err(SceneRelayError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{RecordPatch, RecordWatch};
    use crate::session_store::MemorySessionStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn all_codes() -> impl Iterator<Item = SessionCode> {
        (0..10_000).map(|n| SessionCode::parse(&format!("{n:04}")).unwrap())
    }

    /// Fill every code with `age`-old records except `skip`.
    async fn fill(store: &MemorySessionStore, age: chrono::Duration, skip: Option<&str>) {
        let ts = Utc::now() - age;
        for code in all_codes() {
            if Some(code.as_str()) == skip {
                continue;
            }
            store.put(SessionRecord::new(code, ts)).await;
        }
    }

    #[tokio::test]
    async fn test_allocate_on_empty_store() {
        let store = Arc::new(MemorySessionStore::new());
        let allocator = CodeAllocator::new(store.clone());

        let code = allocator.allocate().await.unwrap();
        assert_eq!(code.as_str().len(), 4);
        assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));

        let record = store.get(&code).await.unwrap().unwrap();
        assert!(record.html.is_none());
        assert!(record.linked.is_none());
    }

    #[tokio::test]
    async fn test_never_returns_fresh_occupant() {
        let store = Arc::new(MemorySessionStore::new());
        fill(&store, chrono::Duration::hours(1), Some("0427")).await;
        let allocator = CodeAllocator::new(store.clone()).with_max_attempts(1_000_000);

        let code = allocator.allocate().await.unwrap();
        assert_eq!(code.as_str(), "0427");
    }

    #[tokio::test]
    async fn test_reuses_stale_code_with_refreshed_timestamp() {
        let store = Arc::new(MemorySessionStore::new());
        fill(&store, chrono::Duration::hours(1), Some("9001")).await;
        let stale_ts = Utc::now() - chrono::Duration::hours(25);
        let mut stale = SessionRecord::new(SessionCode::parse("9001").unwrap(), stale_ts);
        stale.linked = Some(true);
        store.put(stale).await;

        let before = Utc::now();
        let allocator = CodeAllocator::new(store.clone()).with_max_attempts(1_000_000);
        let code = allocator.allocate().await.unwrap();
        assert_eq!(code.as_str(), "9001");

        let record = store.get(&code).await.unwrap().unwrap();
        assert!(record.timestamp >= before);
        // Only the timestamp is refreshed.
        assert!(record.is_linked());
    }

    #[tokio::test]
    async fn test_exhaustion_is_an_error() {
        let store = Arc::new(MemorySessionStore::new());
        fill(&store, chrono::Duration::hours(1), None).await;
        let allocator = CodeAllocator::new(store).with_max_attempts(50);

        let err = allocator.allocate().await.unwrap_err();
        assert!(matches!(
            err,
            SceneRelayError::AllocationExhausted { attempts: 50 }
        ));
    }

    #[tokio::test]
    async fn test_config_threshold() {
        let store = Arc::new(MemorySessionStore::new());
        fill(&store, chrono::Duration::hours(3), None).await;
        let config = AllocatorConfig {
            max_attempts: 10,
            stale_after_hours: 2,
        };
        let allocator = CodeAllocator::from_config(store, &config).unwrap();
        assert!(allocator.allocate().await.is_ok());
    }

    #[test]
    fn test_config_threshold_out_of_range() {
        let config = AllocatorConfig {
            max_attempts: 10,
            stale_after_hours: i64::MAX,
        };
        let result = CodeAllocator::from_config(Arc::new(MemorySessionStore::new()), &config);
        assert!(matches!(result, Err(SceneRelayError::Config(_))));
    }

    /// Store whose create always loses the race, as if another allocator
    /// inserted the code between our read and our write.
    struct RacingStore;

    #[async_trait]
    impl SessionStore for RacingStore {
        async fn get(&self, _code: &SessionCode) -> Result<Option<SessionRecord>> {
            Ok(None)
        }
        async fn create(&self, _record: SessionRecord) -> Result<bool> {
            Ok(false)
        }
        async fn touch(
            &self,
            _code: &SessionCode,
            _expected: DateTime<Utc>,
            _now: DateTime<Utc>,
        ) -> Result<bool> {
            Ok(false)
        }
        async fn set(&self, _code: &SessionCode, _patch: RecordPatch) -> Result<bool> {
            Ok(false)
        }
        async fn subscribe(&self, _code: &SessionCode) -> Result<RecordWatch> {
            Ok(tokio::sync::watch::channel(None).1)
        }
    }

    #[tokio::test]
    async fn test_lost_race_is_a_collision() {
        let allocator = CodeAllocator::new(Arc::new(RacingStore)).with_max_attempts(3);
        assert!(matches!(
            allocator.allocate().await,
            Err(SceneRelayError::AllocationExhausted { attempts: 3 })
        ));
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn get(&self, _code: &SessionCode) -> Result<Option<SessionRecord>> {
            Err(SceneRelayError::Store("unavailable".into()))
        }
        async fn create(&self, _record: SessionRecord) -> Result<bool> {
            unreachable!()
        }
        async fn touch(
            &self,
            _code: &SessionCode,
            _expected: DateTime<Utc>,
            _now: DateTime<Utc>,
        ) -> Result<bool> {
            unreachable!()
        }
        async fn set(&self, _code: &SessionCode, _patch: RecordPatch) -> Result<bool> {
            unreachable!()
        }
        async fn subscribe(&self, _code: &SessionCode) -> Result<RecordWatch> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let allocator = CodeAllocator::new(Arc::new(BrokenStore));
        assert!(matches!(
            allocator.allocate().await,
            Err(SceneRelayError::Store(_))
        ));
    }
}
