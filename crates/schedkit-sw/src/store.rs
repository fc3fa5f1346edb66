//! Shared cache store.
//!
//! [`SharedCaches`] is the one piece of state shared by every concurrent
//! fetch. Buckets live in memory behind a `RwLock`; when a [`CacheDir`] is
//! attached each modified bucket is also written to disk, one JSON file per
//! bucket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheEntry, CacheStorage, RequestKey};
use crate::ServiceWorkerError;

#[derive(Serialize, Deserialize)]
struct BucketFile {
    name: String,
    entries: Vec<CacheEntry>,
}

// ==================== Cache Dir ====================

/// On-disk bucket directory.
#[derive(Debug)]
pub struct CacheDir {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Percent-encoded, so distinct bucket names never share a file.
    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", urlencoding::encode(name)))
    }

    /// Serializes writers so the file on disk never goes back in time.
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Read every bucket file.
    pub async fn load(&self) -> Result<CacheStorage, ServiceWorkerError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut storage = CacheStorage::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match Self::read_bucket(&path).await {
                Ok(cache) => {
                    debug!(bucket = %cache.name(), entries = cache.len(), "Loaded bucket");
                    storage.insert(cache);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable bucket file");
                }
            }
        }

        info!(root = %self.root.display(), buckets = storage.keys().len(), "Cache dir loaded");
        Ok(storage)
    }

    async fn read_bucket(path: &Path) -> Result<Cache, ServiceWorkerError> {
        let raw = tokio::fs::read(path).await?;
        let file: BucketFile = serde_json::from_slice(&raw)?;

        let mut cache = Cache::new(&file.name);
        for entry in file.entries {
            cache.put(entry)?;
        }
        Ok(cache)
    }

    /// Write one bucket: temp file, then rename over the old file.
    async fn write_bucket(&self, cache: &Cache) -> Result<(), ServiceWorkerError> {
        let file = BucketFile {
            name: cache.name().to_string(),
            entries: cache.entries().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&file)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.bucket_path(cache.name());
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        match tokio::fs::remove_file(self.bucket_path(name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

// ==================== Shared Caches ====================

/// Bucket storage shared by every worker of an origin.
#[derive(Debug, Clone)]
pub struct SharedCaches {
    storage: Arc<RwLock<CacheStorage>>,
    dir: Option<Arc<CacheDir>>,
}

impl SharedCaches {
    /// Memory-only storage.
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(RwLock::new(CacheStorage::new())),
            dir: None,
        }
    }

    /// Storage mirrored to `dir`, starting from whatever is already there.
    pub async fn persistent(dir: CacheDir) -> Result<Self, ServiceWorkerError> {
        let storage = dir.load().await?;
        Ok(Self {
            storage: Arc::new(RwLock::new(storage)),
            dir: Some(Arc::new(dir)),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    /// Read access to every bucket.
    pub async fn read(&self) -> RwLockReadGuard<'_, CacheStorage> {
        self.storage.read().await
    }

    /// Bucket names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.storage
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Look up `key` in one bucket.
    pub async fn match_key(&self, bucket: &str, key: &RequestKey) -> Option<CacheEntry> {
        self.storage
            .read()
            .await
            .get(bucket)
            .and_then(|cache| cache.get(key))
            .cloned()
    }

    /// Upsert one entry, creating the bucket if absent.
    pub async fn put(&self, bucket: &str, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        self.put_all(bucket, vec![entry]).await
    }

    /// Upsert a batch of entries. Nothing becomes visible unless the whole
    /// batch, and its disk write if any, succeeds.
    pub async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<CacheEntry>,
    ) -> Result<(), ServiceWorkerError> {
        let write_err = |reason: String| ServiceWorkerError::CacheWrite {
            bucket: bucket.to_string(),
            reason,
        };

        let Some(dir) = &self.dir else {
            let mut storage = self.storage.write().await;
            let mut staged = storage
                .get(bucket)
                .cloned()
                .unwrap_or_else(|| Cache::new(bucket));
            for entry in entries {
                staged.put(entry).map_err(|e| write_err(e.to_string()))?;
            }
            storage.insert(staged);
            return Ok(());
        };

        // Every mutator holds the dir lock, so the bucket cannot change
        // between this snapshot and the insert below.
        let _guard = dir.lock().await;
        let mut staged = self
            .storage
            .read()
            .await
            .get(bucket)
            .cloned()
            .unwrap_or_else(|| Cache::new(bucket));
        for entry in entries {
            staged.put(entry).map_err(|e| write_err(e.to_string()))?;
        }

        dir.write_bucket(&staged)
            .await
            .map_err(|e| write_err(e.to_string()))?;

        self.storage.write().await.insert(staged);
        Ok(())
    }

    /// Delete a bucket from memory and disk.
    pub async fn delete(&self, bucket: &str) -> Result<bool, ServiceWorkerError> {
        let _guard = match &self.dir {
            Some(dir) => Some(dir.lock().await),
            None => None,
        };

        let removed = self.storage.write().await.delete(bucket);
        let removed_file = match &self.dir {
            Some(dir) => dir.delete_bucket(bucket).await?,
            None => false,
        };
        Ok(removed || removed_file)
    }
}
