//! # Schedkit Service Worker
//!
//! Offline cache worker for the Livestream Schedule web app.
//!
//! ## Features
//!
//! - **Install**: prefetch the manifest into the current cache bucket, all or nothing
//! - **Fetch**: network first, cache fallback, GET-only background caching
//! - **Activate**: evict every bucket whose name is not the current version
//! - **Lifecycle**: installing, waiting, activating, active, redundant
//! - **Install prompt**: explicit owner for a deferred "add to home screen" prompt
//!
//! ## Architecture
//!
//! ```text
//! Registration (scope)
//!     ├── installing (OfflineCacheWorker)
//!     ├── waiting    (OfflineCacheWorker)
//!     └── active     (OfflineCacheWorker)
//!             ├── Fetcher (network)
//!             └── SharedCaches
//!                     ├── CacheStorage (memory)
//!                     │       └── Cache "livestream-schedule-v2"
//!                     │               └── RequestKey → CacheEntry
//!                     └── CacheDir (disk, optional)
//! ```

use schedkit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod install_prompt;
pub mod lifecycle;
pub mod manifest;
pub mod store;
pub mod worker;

pub use cache::{Cache, CacheEntry, CachedHeader, CacheError, CacheStorage, RequestKey};
pub use config::{NonOkPolicy, WorkerConfig};
pub use install_prompt::{DeferredPrompt, InstallChoice, InstallPromptController};
pub use lifecycle::{LifecycleEvent, Registration, WorkerState};
pub use manifest::{PrefetchManifest, CACHE_NAME};
pub use store::{CacheDir, SharedCaches};
pub use worker::{FetchResponse, OfflineCacheWorker, ResponseSource, WorkerId};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    /// A manifest URL could not be fetched during install.
    #[error("Install failed, could not prefetch {url}: {reason}")]
    InstallManifestFetch { url: String, reason: String },

    /// The network failed and nothing intercepted the request.
    #[error("Network error: {0}")]
    NetworkFetch(#[from] NetError),

    /// The network failed and the current bucket has no entry.
    #[error("No cached response for {method} {url} ({reason})")]
    CacheMiss {
        method: String,
        url: String,
        reason: String,
    },

    /// Writing into a bucket failed.
    #[error("Cache write to {bucket} failed: {reason}")]
    CacheWrite { bucket: String, reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("No install prompt is pending")]
    NoPendingPrompt,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceWorkerError {
    /// Whether the page should treat this as "no response available".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ServiceWorkerError::CacheMiss { .. } | ServiceWorkerError::NetworkFetch(_)
        )
    }
}
