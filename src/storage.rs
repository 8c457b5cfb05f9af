use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, instrument, warn};

const CHECK_KEY: &str = "__storage_test__";

/// Typical browser local storage allowance.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Local storage is not available")]
    Unavailable,

    #[error("Failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode stored value: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Storage quota exceeded: {needed} bytes needed, {remaining} bytes remaining")]
    QuotaExceeded { needed: usize, remaining: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Synchronous string key/value store with the semantics of browser local
/// storage. Implementations may fail on any call.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
    fn entries(&self) -> Result<Vec<(String, String)>, StorageError>;
    fn quota(&self) -> usize;
}

fn used_bytes<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> usize {
    entries.map(|(key, value)| key.len() + value.len()).sum()
}

fn check_quota(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    quota: usize,
) -> Result<(), StorageError> {
    let used = used_bytes(entries.iter().filter(|(k, _)| k.as_str() != key));
    let needed = key.len() + value.len();
    let remaining = quota.saturating_sub(used);
    if needed > remaining {
        return Err(StorageError::QuotaExceeded { needed, remaining });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, String>,
    unavailable: bool,
    fail_writes: bool,
}

/// In-memory store. Clones share the same entries, so a test can keep a
/// handle for failure injection after passing the store on.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    quota: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            quota,
        }
    }

    /// Makes every call fail as if storage were disabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Makes writes and removals fail while reads keep working.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))?;
        if inner.unavailable {
            return Err(StorageError::Unavailable);
        }
        Ok(inner)
    }

    fn lock_for_write(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        let inner = self.lock()?;
        if inner.fail_writes {
            return Err(StorageError::Backend("write rejected".to_string()));
        }
        Ok(inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.lock_for_write()?;
        check_quota(&inner.entries, key, value, self.quota)?;
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock_for_write()?.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.lock_for_write()?.entries.clear();
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn quota(&self) -> usize {
        self.quota
    }
}

/// Keeps every entry in a single JSON object on disk. Each write goes to a
/// synced temporary file in the same directory that is then renamed over the
/// target. A file that fails to decode reads as an error but is replaced by
/// the next write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    quota: usize,
    // serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, quota: usize) -> Self {
        Self {
            path: path.into(),
            quota,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.lock
            .lock()
            .map_err(|_| StorageError::Backend("file store lock poisoned".to_string()))
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(StorageError::Decode),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Like `read_all`, but a file that no longer decodes is treated as empty
    /// so the next write replaces it instead of failing forever.
    fn read_for_write(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match self.read_all() {
            Err(StorageError::Decode(e)) => {
                warn!(path = %self.path.display(), error = %e, "Discarding undecodable store file");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(entries).map_err(StorageError::Encode)?;
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let temp = tempfile::NamedTempFile::new_in(parent)?;
        let mut file = temp.as_file();
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        temp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.guard()?;
        Ok(self.read_all()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        let mut entries = self.read_for_write()?;
        check_quota(&entries, key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        let mut entries = self.read_for_write()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        self.write_all(&BTreeMap::new())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        let _guard = self.guard()?;
        Ok(self.read_all()?.into_iter().collect())
    }

    fn quota(&self) -> usize {
        self.quota
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    pub available: bool,
    pub used: usize,
    pub remaining: usize,
    pub total: usize,
}

/// JSON codec and availability checks over a [`KeyValueStore`]. No call
/// panics; every failure comes back as a [`StorageError`].
#[derive(Clone)]
pub struct StorageAdapter {
    store: Arc<dyn KeyValueStore>,
}

impl StorageAdapter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Checks the store with a throwaway write, read and delete. Not cached:
    /// a store can stop accepting writes at any time.
    ///
    /// The check entry counts against the quota, so a store with less than
    /// `2 * CHECK_KEY.len()` bytes left reports itself unavailable and every
    /// adapter call fails, including removals that would free space.
    #[instrument(skip(self), level = "debug")]
    pub fn is_available(&self) -> bool {
        let check = self
            .store
            .set_item(CHECK_KEY, CHECK_KEY)
            .and_then(|()| self.store.get_item(CHECK_KEY))
            .and_then(|_| self.store.remove_item(CHECK_KEY));
        match check {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Storage availability check failed");
                false
            }
        }
    }

    /// `Ok(None)` when the key is absent.
    #[instrument(skip(self), fields(storage.operation = "GET"))]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.ensure_available()?;
        let Some(raw) = self.store.get_item(key)? else {
            debug!("Key not present");
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(error = %e, "Stored value failed to decode");
                Err(StorageError::Decode(e))
            }
        }
    }

    #[instrument(skip(self, value), fields(storage.operation = "SET", bytes))]
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.ensure_available()?;
        let serialized = serde_json::to_string(value).map_err(StorageError::Encode)?;
        tracing::Span::current().record("bytes", serialized.len());
        match self.store.set_item(key, &serialized) {
            Ok(()) => {
                debug!("Value stored");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to write to storage");
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(storage.operation = "REMOVE"))]
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        self.store.remove_item(key)
    }

    #[instrument(skip(self), fields(storage.operation = "CLEAR"))]
    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.ensure_available()?;
        self.store.clear()?;
        info!("Storage cleared");
        Ok(())
    }

    pub fn stats(&self) -> StorageStats {
        if !self.is_available() {
            return StorageStats::default();
        }
        let total = self.store.quota();
        match self.store.entries() {
            Ok(entries) => {
                let used = used_bytes(entries.iter().map(|(k, v)| (k, v)));
                StorageStats {
                    available: true,
                    used,
                    remaining: total.saturating_sub(used),
                    total,
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to enumerate storage entries");
                StorageStats {
                    available: true,
                    ..StorageStats::default()
                }
            }
        }
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
        done: bool,
    }

    fn adapter(store: &MemoryStore) -> StorageAdapter {
        StorageAdapter::new(Arc::new(store.clone()))
    }

    #[test]
    fn absent_key_is_not_an_error() {
        let store = MemoryStore::new();
        let got: Option<Vec<Entry>> = adapter(&store).get("missing").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn set_then_get() {
        let store = MemoryStore::new();
        let storage = adapter(&store);
        let value = vec![Entry {
            name: "a".into(),
            done: true,
        }];

        storage.set("k", &value).unwrap();
        assert_eq!(storage.get::<Vec<Entry>>("k").unwrap(), Some(value));
        assert_eq!(
            store.get_item("k").unwrap().as_deref(),
            Some(r#"[{"name":"a","done":true}]"#)
        );
    }

    #[test]
    fn malformed_json_is_a_decode_failure() {
        let store = MemoryStore::new();
        store.set_item("k", "[{not json").unwrap();
        let err = adapter(&store).get::<Vec<Entry>>("k").unwrap_err();
        assert!(matches!(err, StorageError::Decode(_)));
    }

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        let storage = adapter(&store);
        store.set_unavailable(true);

        assert!(!storage.is_available());
        assert!(matches!(
            storage.get::<Vec<Entry>>("k"),
            Err(StorageError::Unavailable)
        ));
        assert!(matches!(storage.set("k", &1), Err(StorageError::Unavailable)));
        assert!(matches!(storage.remove("k"), Err(StorageError::Unavailable)));
        assert!(matches!(storage.clear_all(), Err(StorageError::Unavailable)));
        assert_eq!(storage.stats(), StorageStats::default());
    }

    #[test]
    fn availability_is_rechecked_each_call() {
        let store = MemoryStore::new();
        let storage = adapter(&store);
        assert!(storage.is_available());

        store.set_fail_writes(true);
        assert!(!storage.is_available());

        store.set_fail_writes(false);
        assert!(storage.is_available());
        assert!(store.get_item(CHECK_KEY).unwrap().is_none());
    }

    #[test]
    fn writes_past_the_quota_fail() {
        let store = MemoryStore::with_quota(64);
        let storage = adapter(&store);

        storage.set("k", &"x".repeat(20)).unwrap();
        let err = storage.set("k", &"x".repeat(80)).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(storage.get::<String>("k").unwrap(), Some("x".repeat(20)));
    }

    #[test]
    fn stats_sum_keys_and_values() {
        let store = MemoryStore::with_quota(1000);
        let storage = adapter(&store);
        storage.set("ab", &"cd").unwrap();

        // "ab" + "\"cd\""
        assert_eq!(
            storage.stats(),
            StorageStats {
                available: true,
                used: 6,
                remaining: 994,
                total: 1000,
            }
        );
    }

    #[test]
    fn remove_and_clear() {
        let store = MemoryStore::new();
        let storage = adapter(&store);
        storage.set("a", &1).unwrap();
        storage.set("b", &2).unwrap();

        storage.remove("a").unwrap();
        assert_eq!(storage.get::<i32>("a").unwrap(), None);
        assert_eq!(storage.get::<i32>("b").unwrap(), Some(2));

        storage.clear_all().unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("todos.json");

        let first = StorageAdapter::new(Arc::new(FileStore::new(&path, DEFAULT_QUOTA_BYTES)));
        first.set("k", &vec![1, 2, 3]).unwrap();

        let second = StorageAdapter::new(Arc::new(FileStore::new(&path, DEFAULT_QUOTA_BYTES)));
        assert_eq!(second.get::<Vec<i32>>("k").unwrap(), Some(vec![1, 2, 3]));
        assert!(second.is_available());
        assert_eq!(second.get::<Vec<i32>>(CHECK_KEY).unwrap(), None);

        second.clear_all().unwrap();
        assert_eq!(first.get::<Vec<i32>>("k").unwrap(), None);
    }

    #[test]
    fn corrupt_file_surfaces_as_decode_error_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todos.json");
        fs::write(&path, "not json at all").unwrap();

        let store = FileStore::new(&path, DEFAULT_QUOTA_BYTES);
        assert!(matches!(store.get_item("k"), Err(StorageError::Decode(_))));
        assert!(matches!(store.entries(), Err(StorageError::Decode(_))));
    }

    #[test]
    fn corrupt_file_is_replaced_by_the_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todos.json");
        fs::write(&path, "{ truncated").unwrap();

        let storage = StorageAdapter::new(Arc::new(FileStore::new(&path, DEFAULT_QUOTA_BYTES)));
        assert!(storage.is_available());
        assert_eq!(storage.get::<Vec<i32>>("k").unwrap(), None);

        storage.set("k", &vec![7]).unwrap();
        assert_eq!(storage.get::<Vec<i32>>("k").unwrap(), Some(vec![7]));

        let on_disk: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.get("k").map(String::as_str), Some("[7]"));
    }

    #[test]
    fn file_writes_leave_no_temporary_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todos.json");
        let store = FileStore::new(&path, DEFAULT_QUOTA_BYTES);

        for n in 0..5 {
            store.set_item("k", &n.to_string()).unwrap();
        }
        store.remove_item("k").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("todos.json")]);
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn file_store_writes_from_several_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todos.json");
        let store = Arc::new(FileStore::new(&path, DEFAULT_QUOTA_BYTES));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || store.set_item(&format!("k{n}"), "v"))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(store.entries().unwrap().len(), 4);
    }

    #[test]
    fn nearly_full_store_reports_unavailable() {
        // "k" + "\"…\"" leaves 20 bytes, less than the 32-byte check entry
        let store = MemoryStore::with_quota(64);
        store.set_item("k", &format!("\"{}\"", "x".repeat(41))).unwrap();
        let storage = adapter(&store);

        assert!(!storage.is_available());
        assert!(matches!(storage.remove("k"), Err(StorageError::Unavailable)));
        assert!(store.get_item("k").unwrap().is_some());

        // freeing space outside the adapter makes it usable again
        store.remove_item("k").unwrap();
        assert!(storage.is_available());
    }
}
