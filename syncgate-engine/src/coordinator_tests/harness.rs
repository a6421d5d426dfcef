use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;

use syncgate_core::{
    AccessError, AccessMode, CoordinatedAccess, IndexFeed, IndexQuery, IndexSnapshot, IndexUpdate,
    MetadataIndex, RawEntry, SubscriptionGuard,
};

use crate::config::EngineConfig;

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        idle_interval: Duration::from_secs(30),
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        backoff_jitter: false,
    }
}

pub(crate) fn file_entry(path: &str, status: &str) -> RawEntry {
    json!({ "path": path, "is_dir": false, "download_status": status })
}

pub(crate) fn dir_entry(path: &str) -> RawEntry {
    json!({ "path": path, "is_dir": true })
}

pub(crate) fn progress_entry(path: &str, status: &str, progress: f64) -> RawEntry {
    json!({
        "path": path,
        "is_dir": false,
        "download_status": status,
        "is_downloading": true,
        "download_progress": progress,
    })
}

pub(crate) fn upload_flags_entry(path: &str, uploading: bool, uploaded: bool) -> RawEntry {
    json!({ "path": path, "is_dir": false, "is_uploading": uploading, "is_uploaded": uploaded })
}

pub(crate) fn upload_progress_entry(path: &str, progress: f64) -> RawEntry {
    json!({
        "path": path,
        "is_dir": false,
        "is_uploading": true,
        "is_uploaded": false,
        "upload_progress": progress,
    })
}

struct SubEntry {
    id: u64,
    query: IndexQuery,
    tx: UnboundedSender<IndexUpdate>,
}

#[derive(Default)]
struct IndexState {
    entries: BTreeMap<String, RawEntry>,
    extras: Vec<RawEntry>,
    subs: Vec<SubEntry>,
    suppress_initial: bool,
}

impl IndexState {
    fn snapshot_for(&self, query: &IndexQuery) -> IndexSnapshot {
        let mut entries: Vec<RawEntry> = self
            .entries
            .iter()
            .filter(|(path, _)| query.matches(path))
            .map(|(_, raw)| raw.clone())
            .collect();
        entries.extend(self.extras.iter().cloned());
        IndexSnapshot { entries }
    }

    fn notify(&self, path: Option<&str>) {
        for sub in &self.subs {
            if path.is_none_or(|p| sub.query.matches(p)) {
                let _ = sub
                    .tx
                    .send(IndexUpdate::Changed(self.snapshot_for(&sub.query)));
            }
        }
    }
}

#[derive(Default)]
struct IndexInner {
    state: Mutex<IndexState>,
    next_id: AtomicU64,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

/// In-memory metadata index the tests script directly. Counts every query
/// started and stopped so subscription symmetry is checkable.
#[derive(Clone, Default)]
pub(crate) struct ScriptedIndex {
    inner: Arc<IndexInner>,
}

impl ScriptedIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn as_index(&self) -> Arc<dyn MetadataIndex> {
        Arc::new(self.clone())
    }

    pub(crate) fn put(&self, entry: RawEntry) {
        let path = entry["path"].as_str().expect("scripted entry path").to_string();
        let state = &mut *self.inner.state.lock().unwrap();
        state.entries.insert(path.clone(), entry);
        state.notify(Some(&path));
    }

    pub(crate) fn put_invalid(&self, entry: RawEntry) {
        let state = &mut *self.inner.state.lock().unwrap();
        state.extras.push(entry);
        state.notify(None);
    }

    /// Re-deliver the current state to matching subscribers, as a backend
    /// that repeats notifications would.
    pub(crate) fn notify_path(&self, path: &str) {
        self.inner.state.lock().unwrap().notify(Some(path));
    }

    /// Make future subscriptions withhold their gather-complete signal.
    pub(crate) fn suppress_initial(&self) {
        self.inner.state.lock().unwrap().suppress_initial = true;
    }

    pub(crate) fn started(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.started() - self.stopped()
    }
}

#[async_trait]
impl MetadataIndex for ScriptedIndex {
    async fn snapshot(&self, query: &IndexQuery) -> Result<IndexSnapshot, AccessError> {
        Ok(self.inner.state.lock().unwrap().snapshot_for(query))
    }

    async fn subscribe(
        &self,
        query: &IndexQuery,
    ) -> Result<(IndexFeed, SubscriptionGuard), AccessError> {
        let (tx, feed) = IndexFeed::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let state = &mut *self.inner.state.lock().unwrap();
            if !state.suppress_initial {
                let _ = tx.send(IndexUpdate::GatherComplete(state.snapshot_for(query)));
            }
            state.subs.push(SubEntry {
                id,
                query: query.clone(),
                tx,
            });
        }
        self.inner.started.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let guard = SubscriptionGuard::new(move || {
            inner.state.lock().unwrap().subs.retain(|sub| sub.id != id);
            inner.stopped.fetch_add(1, Ordering::SeqCst);
        });
        Ok((feed, guard))
    }
}

#[derive(Default)]
struct AccessInner {
    open_results: Mutex<HashMap<String, VecDeque<Result<(), AccessError>>>>,
    fetch_results: Mutex<VecDeque<Result<(), AccessError>>>,
    store_results: Mutex<VecDeque<Result<(), AccessError>>>,
    structural_results: Mutex<VecDeque<Result<(), AccessError>>>,
    open_gate: Mutex<Option<Arc<Semaphore>>>,
    hang_stores: AtomicBool,
    opens: AtomicUsize,
    fetches: AtomicUsize,
    stores: AtomicUsize,
    open_modes: Mutex<Vec<(String, AccessMode)>>,
    removed: Mutex<Vec<String>>,
    moved: Mutex<Vec<(String, String)>>,
    copied: Mutex<Vec<(String, String)>>,
}

/// Scripted coordinated-access primitive. Every call succeeds unless a result
/// was queued for it.
#[derive(Clone, Default)]
pub(crate) struct FakeAccess {
    inner: Arc<AccessInner>,
}

impl FakeAccess {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn as_access(&self) -> Arc<dyn CoordinatedAccess> {
        Arc::new(self.clone())
    }

    pub(crate) fn script_open(&self, path: &str, result: Result<(), AccessError>) {
        self.inner
            .open_results
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    pub(crate) fn script_fetch(&self, result: Result<(), AccessError>) {
        self.inner.fetch_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn script_store(&self, result: Result<(), AccessError>) {
        self.inner.store_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn script_structural(&self, result: Result<(), AccessError>) {
        self.inner
            .structural_results
            .lock()
            .unwrap()
            .push_back(result);
    }

    /// Hold every open until `release_open` grants a permit.
    pub(crate) fn gate_opens(&self) {
        *self.inner.open_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release_open(&self) {
        if let Some(gate) = self.inner.open_gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    /// Make every store attempt hang forever.
    pub(crate) fn hang_stores(&self) {
        self.inner.hang_stores.store(true, Ordering::SeqCst);
    }

    pub(crate) fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn stores(&self) -> usize {
        self.inner.stores.load(Ordering::SeqCst)
    }

    pub(crate) fn open_modes(&self) -> Vec<(String, AccessMode)> {
        self.inner.open_modes.lock().unwrap().clone()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.inner.removed.lock().unwrap().clone()
    }

    pub(crate) fn moved(&self) -> Vec<(String, String)> {
        self.inner.moved.lock().unwrap().clone()
    }

    pub(crate) fn copied(&self) -> Vec<(String, String)> {
        self.inner.copied.lock().unwrap().clone()
    }

    fn pop_structural(&self) -> Result<(), AccessError> {
        self.inner
            .structural_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl CoordinatedAccess for FakeAccess {
    async fn open(&self, path: &str, mode: AccessMode) -> Result<(), AccessError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        self.inner
            .open_modes
            .lock()
            .unwrap()
            .push((path.to_string(), mode));
        let gate = self.inner.open_gate.lock().unwrap().clone();
        if let Some(gate) = gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        self.inner
            .open_results
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }

    async fn request_fetch(&self, _path: &str) -> Result<(), AccessError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .fetch_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn store(&self, _source: &Path, _dest: &str) -> Result<(), AccessError> {
        self.inner.stores.fetch_add(1, Ordering::SeqCst);
        if self.inner.hang_stores.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner
            .store_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn remove_item(&self, path: &str) -> Result<(), AccessError> {
        self.inner.removed.lock().unwrap().push(path.to_string());
        self.pop_structural()
    }

    async fn move_item(&self, from: &str, to: &str) -> Result<(), AccessError> {
        self.inner
            .moved
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
        self.pop_structural()
    }

    async fn copy_item(&self, from: &str, to: &str) -> Result<(), AccessError> {
        self.inner
            .copied
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
        self.pop_structural()
    }
}
