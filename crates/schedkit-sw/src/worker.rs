//! The offline cache worker.
//!
//! Network first, cache fallback. Successful GET responses are written to
//! the current bucket in the background; the page never waits on a cache
//! write and never sees one fail.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use schedkit_net::{Fetcher, Request, Response};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, RequestKey};
use crate::config::{NonOkPolicy, WorkerConfig};
use crate::store::SharedCaches;
use crate::ServiceWorkerError;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

/// Response handed back to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn cache(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// One version of the offline cache worker.
pub struct OfflineCacheWorker {
    id: WorkerId,
    cache_name: String,
    manifest: Vec<Url>,
    non_ok_policy: NonOkPolicy,
    fetcher: Arc<dyn Fetcher>,
    caches: SharedCaches,
    writes: TaskTracker,
    retired: Arc<AtomicBool>,
}

impl OfflineCacheWorker {
    /// Create a worker for bucket `cache_name` prefetching `manifest`.
    pub fn new(
        cache_name: impl Into<String>,
        manifest: Vec<Url>,
        fetcher: Arc<dyn Fetcher>,
        caches: SharedCaches,
    ) -> Self {
        Self {
            id: WorkerId::new(),
            cache_name: cache_name.into(),
            manifest,
            non_ok_policy: NonOkPolicy::default(),
            fetcher,
            caches,
            writes: TaskTracker::new(),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a worker from a validated config.
    pub fn from_config(
        config: &WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        caches: SharedCaches,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        Ok(Self::new(
            config.cache_name.clone(),
            config.resolved_manifest()?,
            fetcher,
            caches,
        )
        .with_non_ok_policy(config.non_ok_policy))
    }

    pub fn with_non_ok_policy(mut self, policy: NonOkPolicy) -> Self {
        self.non_ok_policy = policy;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    pub fn caches(&self) -> &SharedCaches {
        &self.caches
    }

    // ==================== Install ====================

    /// Prefetch the manifest into the current bucket.
    ///
    /// All or nothing: every URL must fetch with a 2xx status before any
    /// entry is stored.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        info!(
            worker = %self.id,
            cache = %self.cache_name,
            entries = self.manifest.len(),
            "Installing"
        );

        let entries =
            try_join_all(self.manifest.iter().map(|url| self.prefetch(url))).await?;
        self.caches.put_all(&self.cache_name, entries).await?;

        info!(worker = %self.id, cache = %self.cache_name, "Install complete");
        Ok(())
    }

    async fn prefetch(&self, url: &Url) -> Result<CacheEntry, ServiceWorkerError> {
        let request = Request::get(url.clone());
        let key = RequestKey::for_request(&request);

        let response = self.fetcher.fetch(request).await.map_err(|e| {
            ServiceWorkerError::InstallManifestFetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallManifestFetch {
                url: url.to_string(),
                reason: format!("status {}", response.status),
            });
        }

        debug!(worker = %self.id, url = %url, bytes = response.body.len(), "Prefetched");
        Ok(CacheEntry::from_response(&key, &response))
    }

    // ==================== Fetch ====================

    /// Handle one page request: network first, then the current bucket.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchResponse, ServiceWorkerError> {
        let key = RequestKey::for_request(&request);

        match self.fetcher.fetch(request).await {
            Ok(response) if response.ok() || self.non_ok_policy != NonOkPolicy::FallbackToCache => {
                debug!(worker = %self.id, %key, status = %response.status, "Served from network");
                self.cache_in_background(&key, &response);
                Ok(FetchResponse::network(response))
            }
            Ok(response) => {
                debug!(worker = %self.id, %key, status = %response.status, "Non-OK response, trying cache");
                match self.lookup(&key).await? {
                    Some(cached) => Ok(FetchResponse::cache(cached)),
                    None => Ok(FetchResponse::network(response)),
                }
            }
            Err(err) => {
                warn!(worker = %self.id, %key, error = %err, "Network failed, falling back to cache");
                let reason = match self.lookup(&key).await {
                    Ok(Some(cached)) => return Ok(FetchResponse::cache(cached)),
                    Ok(None) => err.to_string(),
                    Err(unusable) => {
                        warn!(worker = %self.id, %key, error = %unusable, "Cached entry unusable");
                        format!("{err}; cached entry unusable: {unusable}")
                    }
                };
                Err(ServiceWorkerError::CacheMiss {
                    method: key.method,
                    url: key.url,
                    reason,
                })
            }
        }
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<Response>, ServiceWorkerError> {
        match self.caches.match_key(&self.cache_name, key).await {
            Some(entry) => Ok(Some(entry.to_response()?)),
            None => Ok(None),
        }
    }

    /// Store a duplicate of `response` without delaying the caller.
    fn cache_in_background(&self, key: &RequestKey, response: &Response) {
        if !key.is_get() || self.is_retired() {
            return;
        }
        if !response.ok() && self.non_ok_policy != NonOkPolicy::PassThroughAndCache {
            debug!(worker = %self.id, %key, status = %response.status, "Not caching non-OK response");
            return;
        }

        let entry = CacheEntry::from_response(key, response);
        let caches = self.caches.clone();
        let bucket = self.cache_name.clone();
        let retired = Arc::clone(&self.retired);

        self.writes.spawn(async move {
            // Retired while queued: the bucket may already be evicted.
            if retired.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = caches.put(&bucket, entry).await {
                warn!(bucket = %bucket, error = %err, "Cache write dropped");
            }
        });
    }

    /// Wait for every background cache write spawned so far.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Stop caching and wait for writes already in flight. Fetches are
    /// still answered, but nothing they return is stored.
    pub async fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.flush().await;
        debug!(worker = %self.id, cache = %self.cache_name, "Retired");
    }

    /// Undo [`retire`](Self::retire) when the replacement failed to activate.
    pub(crate) fn reinstate(&self) {
        self.retired.store(false, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    // ==================== Activate ====================

    /// Delete every bucket whose name is not the current one.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .await
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        for name in &stale {
            self.caches.delete(name).await?;
            info!(worker = %self.id, cache = %name, "Deleted stale cache");
        }

        info!(worker = %self.id, cache = %self.cache_name, evicted = stale.len(), "Activated");
        Ok(stale)
    }
}

impl fmt::Debug for OfflineCacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCacheWorker")
            .field("id", &self.id)
            .field("cache_name", &self.cache_name)
            .field("manifest", &self.manifest)
            .field("non_ok_policy", &self.non_ok_policy)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}
