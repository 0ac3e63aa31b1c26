use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::site_limits::error::{LimitError, Result};
use crate::site_limits::state::{Secret, TrackedSite};

/// Top-level keys of the state store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKey {
    Secrets,
    BlockedSites,
    TempUnlocks,
    LastReset,
    UnlockAttempts,
}

impl StateKey {
    pub const ALL: [StateKey; 5] = [
        StateKey::Secrets,
        StateKey::BlockedSites,
        StateKey::TempUnlocks,
        StateKey::LastReset,
        StateKey::UnlockAttempts,
    ];

    /// Key name as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Secrets => "secrets",
            StateKey::BlockedSites => "blockedSites",
            StateKey::TempUnlocks => "tempUnlocks",
            StateKey::LastReset => "lastReset",
            StateKey::UnlockAttempts => "unlockAttempts",
        }
    }
}

/// Partial view of the store: `Some` for every key requested or written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateValues {
    pub secrets: Option<BTreeMap<String, Secret>>,
    pub blocked_sites: Option<BTreeMap<String, TrackedSite>>,
    pub temp_unlocks: Option<BTreeMap<String, i64>>,
    pub last_reset: Option<i64>,
    pub unlock_attempts: Option<Vec<i64>>,
}

/// The whole persisted document
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub secrets: BTreeMap<String, Secret>,

    #[serde(default)]
    pub blocked_sites: BTreeMap<String, TrackedSite>,

    /// domain -> unlock expiry (epoch milliseconds)
    #[serde(default)]
    pub temp_unlocks: BTreeMap<String, i64>,

    /// Local midnight of the last daily reset (epoch milliseconds)
    #[serde(default)]
    pub last_reset: i64,

    /// Recent code submissions (epoch milliseconds), oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlock_attempts: Vec<i64>,
}

impl StateDocument {
    /// Copy out the requested keys
    pub fn project(&self, keys: &[StateKey]) -> StateValues {
        let mut values = StateValues::default();
        for key in keys {
            match key {
                StateKey::Secrets => values.secrets = Some(self.secrets.clone()),
                StateKey::BlockedSites => values.blocked_sites = Some(self.blocked_sites.clone()),
                StateKey::TempUnlocks => values.temp_unlocks = Some(self.temp_unlocks.clone()),
                StateKey::LastReset => values.last_reset = Some(self.last_reset),
                StateKey::UnlockAttempts => {
                    values.unlock_attempts = Some(self.unlock_attempts.clone())
                }
            }
        }
        values
    }

    /// Overwrite every key present in `values`
    pub fn apply(&mut self, values: StateValues) {
        if let Some(secrets) = values.secrets {
            self.secrets = secrets;
        }
        if let Some(sites) = values.blocked_sites {
            self.blocked_sites = sites;
        }
        if let Some(unlocks) = values.temp_unlocks {
            self.temp_unlocks = unlocks;
        }
        if let Some(last_reset) = values.last_reset {
            self.last_reset = last_reset;
        }
        if let Some(attempts) = values.unlock_attempts {
            self.unlock_attempts = attempts;
        }
    }
}

/// Durable key-value store capability
///
/// Every component reads and writes through this trait; [`SharedStore`]
/// layers single-writer access on top of it.
pub trait StateStore: Send {
    /// Read the given keys; absent keys come back as empty defaults
    fn get(&self, keys: &[StateKey]) -> Result<StateValues>;

    /// Write every key present in `values`, leaving the others untouched
    fn set(&mut self, values: StateValues) -> Result<()>;

    /// Run one read-modify-write unit, excluding other handles on the same
    /// backing storage for its duration
    fn transaction<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R>
    where
        Self: Sized,
    {
        op(self)
    }
}

/// In-process store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: StateDocument,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: StateDocument) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &StateDocument {
        &self.document
    }
}

impl StateStore for MemoryStore {
    fn get(&self, keys: &[StateKey]) -> Result<StateValues> {
        Ok(self.document.project(keys))
    }

    fn set(&mut self, values: StateValues) -> Result<()> {
        self.document.apply(values);
        Ok(())
    }
}

/// Store backed by a single JSON file
///
/// Nothing is cached: every `get` re-reads the file and every `set` rewrites
/// it atomically. Transactions and writes hold an exclusive lock on a
/// sibling `.lock` file, so several processes can share one state file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    in_transaction: bool,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            in_transaction: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file guarding writers of `path`
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn lock(&self) -> Result<File> {
        crate::platform::common::lock_exclusive(&self.lock_path())
            .map_err(|e| LimitError::StoreUnavailable(format!("{:#}", e)))
    }

    /// Load the document, treating a missing file as an empty store
    pub fn load(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            LimitError::StoreUnavailable(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if content.trim().is_empty() {
            return Ok(StateDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            LimitError::StoreUnavailable(format!(
                "failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, document: &StateDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| LimitError::StoreUnavailable(format!("failed to serialize state: {}", e)))?;

        crate::platform::common::atomic_write(&self.path, content.as_bytes())
            .map_err(|e| LimitError::StoreUnavailable(format!("{:#}", e)))
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, keys: &[StateKey]) -> Result<StateValues> {
        Ok(self.load()?.project(keys))
    }

    fn set(&mut self, values: StateValues) -> Result<()> {
        self.transaction(|store| {
            let mut document = store.load()?;
            document.apply(values);
            store.save(&document)
        })
    }

    fn transaction<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.in_transaction {
            return op(self);
        }

        let _lock = self.lock()?;
        self.in_transaction = true;
        let result = op(self);
        self.in_transaction = false;
        result
    }
}

/// Single-writer handle shared by the tracker and the message handlers
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: StateStore> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run one read-modify-write unit with exclusive access to the store
    ///
    /// Units never interleave within a process, and the store's transaction
    /// keeps them atomic against other processes.
    pub async fn with<R>(&self, op: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        let mut store = self.inner.lock().await;
        store.transaction(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_site(limit: u32, used: u32) -> TrackedSite {
        TrackedSite {
            daily_limit: limit,
            used_today: used,
            authorized_secret_ids: Default::default(),
        }
    }

    #[test]
    fn test_get_returns_only_requested_keys() {
        let store = MemoryStore::new();
        let values = store.get(&[StateKey::BlockedSites, StateKey::LastReset]).unwrap();

        assert_eq!(values.blocked_sites, Some(BTreeMap::new()));
        assert_eq!(values.last_reset, Some(0));
        assert!(values.secrets.is_none());
        assert!(values.temp_unlocks.is_none());
    }

    #[test]
    fn test_set_leaves_other_keys_untouched() {
        let mut store = MemoryStore::new();
        let mut sites = BTreeMap::new();
        sites.insert("example.com".to_string(), make_site(3, 1));

        store
            .set(StateValues {
                blocked_sites: Some(sites),
                last_reset: Some(42),
                ..Default::default()
            })
            .unwrap();

        store
            .set(StateValues {
                last_reset: Some(43),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.document().last_reset, 43);
        assert_eq!(store.document().blocked_sites["example.com"].used_today, 1);
    }

    #[test]
    fn test_state_key_names() {
        let names: Vec<_> = StateKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["secrets", "blockedSites", "tempUnlocks", "lastReset", "unlockAttempts"]
        );
    }

    #[test]
    fn test_json_file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        let values = store.get(&StateKey::ALL).unwrap();
        assert_eq!(values.blocked_sites, Some(BTreeMap::new()));
        assert_eq!(values.last_reset, Some(0));
    }

    #[test]
    fn test_json_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut sites = BTreeMap::new();
        sites.insert("example.com".to_string(), make_site(3, 2));
        let mut unlocks = BTreeMap::new();
        unlocks.insert("example.com".to_string(), 1_700_000_000_000);

        let mut store = JsonFileStore::new(&path);
        store
            .set(StateValues {
                blocked_sites: Some(sites),
                temp_unlocks: Some(unlocks),
                ..Default::default()
            })
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        let document = reopened.load().unwrap();
        assert_eq!(document.blocked_sites["example.com"].used_today, 2);
        assert_eq!(document.temp_unlocks["example.com"], 1_700_000_000_000);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"blockedSites\""));
        assert!(raw.contains("\"tempUnlocks\""));
    }

    #[test]
    fn test_json_file_store_corrupt_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get(&[StateKey::Secrets]),
            Err(LimitError::StoreUnavailable(_))
        ));

        // A failed read must not clobber the file
        assert!(store.set(StateValues { last_reset: Some(1), ..Default::default() }).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_shared_store_serializes_read_modify_write() {
        let shared = SharedStore::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                shared
                    .with(|store| {
                        let current = store.get(&[StateKey::LastReset])?.last_reset.unwrap_or(0);
                        store.set(StateValues {
                            last_reset: Some(current + 1),
                            ..Default::default()
                        })
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let total = shared
            .with(|store| Ok(store.get(&[StateKey::LastReset])?.last_reset))
            .await
            .unwrap();
        assert_eq!(total, Some(50));
    }

    #[test]
    fn test_lock_path_sits_next_to_state() {
        let store = JsonFileStore::new("/var/lib/site-limits/state.json");
        assert_eq!(
            store.lock_path(),
            PathBuf::from("/var/lib/site-limits/state.json.lock")
        );
    }

    #[test]
    fn test_unlock_attempts_omitted_when_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = JsonFileStore::new(&path);

        store.set(StateValues { last_reset: Some(1), ..Default::default() }).unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("unlockAttempts"));

        store
            .set(StateValues {
                unlock_attempts: Some(vec![1_000, 2_000]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.load().unwrap().unlock_attempts, vec![1_000, 2_000]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_stores_sharing_a_path_never_lose_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        // Separate handles stand in for separate processes
        let mut handles = Vec::new();
        for _ in 0..2 {
            let shared = SharedStore::new(JsonFileStore::new(&path));
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    shared
                        .with(|store| {
                            let current = store.get(&[StateKey::LastReset])?.last_reset.unwrap_or(0);
                            store.set(StateValues {
                                last_reset: Some(current + 1),
                                ..Default::default()
                            })
                        })
                        .await?;
                }
                Ok::<(), LimitError>(())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let store = JsonFileStore::new(&path);
        assert_eq!(store.load().unwrap().last_reset, 200);
    }
}
