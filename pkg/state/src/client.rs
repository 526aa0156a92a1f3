use chrono::Utc;
use pkg_constants::state::EVENT_LOG_CAPACITY;
use pkg_types::Object;
use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::watch::{EventLog, EventType};

/// Persistent state store backed by SlateDB.
///
/// Objects are JSON under `/registry/...` keys. Every typed write is a
/// compare-and-put on `metadata.resourceVersion`, serialized by an internal
/// write lock, and is followed by a watch event.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    pub event_log: EventLog,
    write_lock: Arc<Mutex<()>>,
}

/// Result of a delete request that honours finalizers.
#[derive(Debug)]
pub enum DeleteOutcome<T> {
    /// Removed from the store.
    Deleted(T),
    /// Finalizers pending; `deletionTimestamp` is set.
    Marked(T),
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        Self::open(object_store).await
    }

    /// State store over an in-memory object store. Used by tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::open(Arc::new(InMemory::new())).await
    }

    async fn open(object_store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    // ─── Raw access ─────────────────────────────────────────────────

    async fn put_raw(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("SlateDB put failed: {}", e)))
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("SlateDB get failed: {}", e))),
        }
    }

    async fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("SlateDB delete failed: {}", e)))
    }

    /// List all key-value pairs whose keys start with `prefix`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB scan_prefix failed: {}", e)))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    // ─── Typed access ───────────────────────────────────────────────

    pub async fn get_object<T: Object>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Decode every object under `prefix`, in key order.
    pub async fn list_objects<T: Object>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.list_prefix(prefix)
            .await?
            .into_iter()
            .map(|(key, bytes)| decode(&key, &bytes))
            .collect()
    }

    /// Store a new object. Assigns a uid when empty and starts the
    /// resourceVersion at 1.
    pub async fn create<T: Object>(&self, mut obj: T) -> Result<T, StoreError> {
        let key = obj.key();
        let _guard = self.write_lock.lock().await;
        if self.get(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists(key));
        }
        let meta = obj.meta_mut();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        meta.resource_version = 1;
        self.write(&key, &obj).await?;
        debug!("Created {} {}", T::KIND, key);
        Ok(obj)
    }

    /// Compare-and-put. Fails with `Conflict` when the stored
    /// resourceVersion differs from `obj`'s. An object that is being deleted
    /// and carries no finalizers is removed instead of written.
    pub async fn update<T: Object>(&self, mut obj: T) -> Result<T, StoreError> {
        let key = obj.key();
        let _guard = self.write_lock.lock().await;
        let current: T = match self.get(&key).await? {
            Some(bytes) => decode(&key, &bytes)?,
            None => return Err(StoreError::NotFound(key)),
        };
        let actual = current.meta().resource_version;
        let expected = obj.meta().resource_version;
        if actual != expected {
            return Err(StoreError::Conflict {
                key,
                expected,
                actual,
            });
        }
        obj.meta_mut().resource_version = actual + 1;

        if obj.meta().is_deleting() && obj.meta().finalizers.is_empty() {
            self.remove_locked(&key, &obj).await?;
            return Ok(obj);
        }
        self.write(&key, &obj).await?;
        Ok(obj)
    }

    /// Read-modify-write loop. `mutate` returns false when there is nothing
    /// to write. Conflicts re-read and retry up to `retries` times.
    /// Returns `None` if the object does not exist.
    pub async fn update_with_retry<T, F>(
        &self,
        key: &str,
        retries: u32,
        mut mutate: F,
    ) -> Result<Option<T>, StoreError>
    where
        T: Object,
        F: FnMut(&mut T) -> bool,
    {
        let mut last_err = None;
        for attempt in 0..retries.max(1) {
            let Some(mut obj) = self.get_object::<T>(key).await? else {
                return Ok(None);
            };
            if !mutate(&mut obj) {
                return Ok(Some(obj));
            }
            match self.update(obj).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(e) if e.is_conflict() => {
                    debug!("Conflict updating {} (attempt {}): {}", key, attempt + 1, e);
                    last_err = Some(e);
                }
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Backend(format!("no attempt made on {}", key))))
    }

    /// Delete honouring finalizers: an object with finalizers only gets a
    /// `deletionTimestamp`.
    pub async fn request_delete<T: Object>(&self, key: &str) -> Result<DeleteOutcome<T>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut obj: T = match self.get(key).await? {
            Some(bytes) => decode(key, &bytes)?,
            None => return Err(StoreError::NotFound(key.to_string())),
        };
        if obj.meta().finalizers.is_empty() {
            self.remove_locked(key, &obj).await?;
            return Ok(DeleteOutcome::Deleted(obj));
        }
        if !obj.meta().is_deleting() {
            let meta = obj.meta_mut();
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version += 1;
            self.write(key, &obj).await?;
        }
        Ok(DeleteOutcome::Marked(obj))
    }

    /// Remove an object unconditionally. Returns the removed object.
    pub async fn delete_object<T: Object>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };
        let obj: T = decode(key, &bytes)?;
        self.remove_locked(key, &obj).await?;
        Ok(Some(obj))
    }

    async fn write<T: Object>(&self, key: &str, obj: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(obj).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        let bytes = serde_json::to_vec(&value).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.put_raw(key, &bytes).await?;
        self.event_log
            .emit(EventType::Put, key.to_string(), Some(value))
            .await;
        Ok(())
    }

    async fn remove_locked<T: Object>(&self, key: &str, obj: &T) -> Result<(), StoreError> {
        self.delete_raw(key).await?;
        let value = serde_json::to_value(obj).ok();
        self.event_log
            .emit(EventType::Delete, key.to_string(), value)
            .await;
        debug!("Deleted {} {}", T::KIND, key);
        Ok(())
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}

fn decode<T: Object>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}
