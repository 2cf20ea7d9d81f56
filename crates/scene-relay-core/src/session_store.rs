//! Session record stores.
//!
//! - [`MemorySessionStore`] keeps records in process.
//! - [`JsonSessionStore`] persists every record in one JSON file and can watch
//!   that file so a display process sees writes made by an editor process.
//!
//! Both hand out `tokio::sync::watch` receivers for subscriptions, which gives
//! "latest write wins" delivery for free.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SceneRelayError};
use crate::session::{RecordPatch, RecordWatch, SessionCode, SessionRecord, SessionStore};

type RecordMap = BTreeMap<SessionCode, SessionRecord>;

/// Per-code watch senders shared by a store and its file watcher.
#[derive(Default)]
struct Watchers {
    senders: Mutex<HashMap<SessionCode, watch::Sender<Option<SessionRecord>>>>,
}

impl Watchers {
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionCode, watch::Sender<Option<SessionRecord>>>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, code: &SessionCode, current: Option<SessionRecord>) -> RecordWatch {
        let mut senders = self.lock();
        match senders.get(code) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current);
                senders.insert(code.clone(), tx);
                rx
            }
        }
    }

    /// Publish a write. Fires even when nothing changed.
    fn publish(&self, code: &SessionCode, record: Option<SessionRecord>) {
        let mut senders = self.lock();
        if let Some(tx) = senders.get(code) {
            if tx.receiver_count() == 0 {
                senders.remove(code);
                return;
            }
            tx.send_replace(record);
        }
    }

    /// Publish externally observed state, only where it differs.
    fn refresh_from(&self, records: &RecordMap) {
        let mut senders = self.lock();
        senders.retain(|_, tx| tx.receiver_count() > 0);
        for (code, tx) in senders.iter() {
            let latest = records.get(code).cloned();
            let changed = tx.send_if_modified(|current| {
                if *current != latest {
                    *current = latest;
                    true
                } else {
                    false
                }
            });
            if changed {
                debug!(code = %code, "Record changed on disk");
            }
        }
    }
}

// --- In-memory store ---

/// Process-local store.
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<SessionCode, SessionRecord>>,
    watchers: Watchers,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record unconditionally.
    pub async fn put(&self, record: SessionRecord) {
        let code = record.code.clone();
        self.records.write().await.insert(code.clone(), record.clone());
        self.watchers.publish(&code, Some(record));
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, code: &SessionCode) -> Result<Option<SessionRecord>> {
        Ok(self.records.read().await.get(code).cloned())
    }

    async fn create(&self, record: SessionRecord) -> Result<bool> {
        let code = record.code.clone();
        let mut records = self.records.write().await;
        if records.contains_key(&code) {
            return Ok(false);
        }
        records.insert(code.clone(), record.clone());
        drop(records);
        self.watchers.publish(&code, Some(record));
        Ok(true)
    }

    async fn touch(
        &self,
        code: &SessionCode,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(code) else {
            return Ok(false);
        };
        if record.timestamp != expected {
            return Ok(false);
        }
        record.timestamp = now;
        let updated = record.clone();
        drop(records);
        self.watchers.publish(code, Some(updated));
        Ok(true)
    }

    async fn set(&self, code: &SessionCode, patch: RecordPatch) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(code) else {
            return Ok(false);
        };
        record.apply(patch);
        let updated = record.clone();
        drop(records);
        self.watchers.publish(code, Some(updated));
        Ok(true)
    }

    async fn subscribe(&self, code: &SessionCode) -> Result<RecordWatch> {
        let current = self.records.read().await.get(code).cloned();
        Ok(self.watchers.subscribe(code, current))
    }
}

// --- JSON file store ---

/// File-backed store.
///
/// Layout: `<path>` holds a JSON object mapping each code to its record.
/// Writes go to `<path>.tmp` and are renamed into place.
pub struct JsonSessionStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: tokio::sync::Mutex<()>,
    watchers: Arc<Watchers>,
    _watcher: Option<RecommendedWatcher>,
}

impl JsonSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
            watchers: Arc::new(Watchers::default()),
            _watcher: None,
        }
    }

    /// Default store location: `~/.scene_relay/codes.json`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("codes.json")
    }

    /// Open the store and watch its file for writes made by other processes.
    pub fn open_watched(path: PathBuf) -> Result<Self> {
        let mut store = Self::new(path);
        store._watcher = Some(store.start_watcher()?);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start_watcher(&self) -> Result<RecommendedWatcher> {
        let watchers = self.watchers.clone();
        let path = self.path.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            return;
                        }
                        let ours = event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                        if !ours {
                            return;
                        }
                        match read_records_sync(&path) {
                            Ok(records) => watchers.refresh_from(&records),
                            // A half-written file shows up here; the rename that follows fires again.
                            Err(e) => warn!(%e, "Could not re-read session records"),
                        }
                    }
                    Err(e) => error!(%e, "Session record watch error"),
                }
            })?;

        let watch_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&watch_dir)?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        info!(path = %self.path.display(), "Session record watcher started");
        Ok(watcher)
    }

    async fn load_all(&self) -> Result<RecordMap> {
        if !self.path.exists() {
            return Ok(RecordMap::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(RecordMap::new());
        }
        serde_json::from_str(&data)
            .map_err(|e| SceneRelayError::Store(format!("corrupt record file: {e}")))
    }

    async fn save_all(&self, records: &RecordMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(records)?;
        // Atomic write: write to temp then rename
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Load, mutate one record, save, and notify subscribers.
    async fn modify<F>(&self, code: &SessionCode, f: F) -> Result<bool>
    where
        F: FnOnce(&mut RecordMap) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load_all().await?;
        if !f(&mut records) {
            return Ok(false);
        }
        self.save_all(&records).await?;
        debug!(code = %code, "Saved session record");
        self.watchers.publish(code, records.get(code).cloned());
        Ok(true)
    }

    /// All records, ordered by code.
    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.load_all().await?.into_values().collect())
    }
}

fn read_records_sync(path: &Path) -> Result<RecordMap> {
    if !path.exists() {
        return Ok(RecordMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(RecordMap::new());
    }
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn get(&self, code: &SessionCode) -> Result<Option<SessionRecord>> {
        Ok(self.load_all().await?.remove(code))
    }

    async fn create(&self, record: SessionRecord) -> Result<bool> {
        let code = record.code.clone();
        self.modify(&code, move |records| {
            if records.contains_key(&record.code) {
                return false;
            }
            records.insert(record.code.clone(), record);
            true
        })
        .await
    }

    async fn touch(
        &self,
        code: &SessionCode,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.modify(code, |records| match records.get_mut(code) {
            Some(record) if record.timestamp == expected => {
                record.timestamp = now;
                true
            }
            _ => false,
        })
        .await
    }

    async fn set(&self, code: &SessionCode, patch: RecordPatch) -> Result<bool> {
        self.modify(code, move |records| match records.get_mut(code) {
            Some(record) => {
                record.apply(patch);
                true
            }
            None => false,
        })
        .await
    }

    async fn subscribe(&self, code: &SessionCode) -> Result<RecordWatch> {
        let current = self.load_all().await?.remove(code);
        Ok(self.watchers.subscribe(code, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> SessionCode {
        SessionCode::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_memory_create_if_absent() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        assert!(store.create(SessionRecord::new(code("1234"), now)).await.unwrap());
        assert!(!store.create(SessionRecord::new(code("1234"), now)).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_touch_is_conditional() {
        let store = MemorySessionStore::new();
        let then = Utc::now() - chrono::Duration::hours(30);
        let now = Utc::now();
        store.put(SessionRecord::new(code("0007"), then)).await;

        assert!(!store.touch(&code("0007"), now, now).await.unwrap());
        assert!(store.touch(&code("0007"), then, now).await.unwrap());
        assert!(!store.touch(&code("0007"), then, now).await.unwrap());
        assert!(!store.touch(&code("9999"), then, now).await.unwrap());

        let record = store.get(&code("0007")).await.unwrap().unwrap();
        assert_eq!(record.timestamp, now);
    }

    #[tokio::test]
    async fn test_memory_set_absent_returns_false() {
        let store = MemorySessionStore::new();
        assert!(!store.set(&code("4321"), RecordPatch::linked()).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_subscribe_sees_latest() {
        let store = MemorySessionStore::new();
        let mut rx = store.subscribe(&code("2468")).await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        store.create(SessionRecord::new(code("2468"), Utc::now())).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        store.set(&code("2468"), RecordPatch::html("<p>hi</p>")).await.unwrap();
        rx.changed().await.unwrap();
        let record = rx.borrow_and_update().clone().unwrap();
        assert_eq!(record.published_html(), Some("<p>hi</p>"));
    }

    #[tokio::test]
    async fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().join("codes.json"));

        assert!(store.get(&code("0001")).await.unwrap().is_none());
        assert!(store.create(SessionRecord::new(code("0001"), Utc::now())).await.unwrap());
        assert!(!store.create(SessionRecord::new(code("0001"), Utc::now())).await.unwrap());
        assert!(store.set(&code("0001"), RecordPatch::linked()).await.unwrap());

        // A second handle on the same file sees the write.
        let other = JsonSessionStore::new(dir.path().join("codes.json"));
        let record = other.get(&code("0001")).await.unwrap().unwrap();
        assert!(record.is_linked());
        assert_eq!(other.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonSessionStore::new(path);
        let err = store.get(&code("0001")).await.unwrap_err();
        assert!(matches!(err, SceneRelayError::Store(_)));
    }

    #[tokio::test]
    async fn test_json_store_notifies_local_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().join("codes.json"));
        store.create(SessionRecord::new(code("3030"), Utc::now())).await.unwrap();

        let mut rx = store.subscribe(&code("3030")).await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        store.set(&code("3030"), RecordPatch::html("<b>x</b>")).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().and_then(|r| r.published_html().map(str::to_owned)),
            Some("<b>x</b>".to_string())
        );
    }

    #[tokio::test]
    async fn test_json_store_sees_other_process_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.json");
        let display = JsonSessionStore::open_watched(path.clone()).unwrap();
        let editor = JsonSessionStore::new(path);

        editor.create(SessionRecord::new(code("8080"), Utc::now())).await.unwrap();
        let mut rx = display.subscribe(&code("8080")).await.unwrap();
        rx.borrow_and_update();

        editor.set(&code("8080"), RecordPatch::linked()).await.unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(10),
            rx.wait_for(|r| r.as_ref().is_some_and(|r| r.is_linked())),
        )
        .await
        .expect("watcher never reported the external write")
        .unwrap();
    }
}
