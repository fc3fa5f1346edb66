//! Worker configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use schedkit_net::FetcherConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::{PrefetchManifest, CACHE_NAME};
use crate::ServiceWorkerError;

/// What to do with a network response that arrived but is not 2xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonOkPolicy {
    /// Return it to the page, never cache it.
    #[default]
    PassThrough,
    /// Return it to the page and cache it like any other response.
    PassThroughAndCache,
    /// Prefer a cached copy; return the non-OK response only if none exists.
    FallbackToCache,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Current bucket name
    pub cache_name: String,

    /// Origin the page is served from, manifest paths resolve against it
    pub origin: String,

    /// URLs prefetched at install time
    pub manifest: PrefetchManifest,

    /// Handling of non-2xx network responses
    pub non_ok_policy: NonOkPolicy,

    /// Network timeout in seconds
    pub fetch_timeout_secs: u64,

    /// User agent override
    pub user_agent: Option<String>,

    /// Maximum redirects followed per fetch
    pub max_redirects: usize,

    /// Where buckets are persisted, `None` keeps them in memory only
    pub persist_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            origin: "http://127.0.0.1:5000/".to_string(),
            manifest: PrefetchManifest::livestream_default(),
            non_ok_policy: NonOkPolicy::default(),
            fetch_timeout_secs: 30,
            user_agent: None,
            max_redirects: 10,
            persist_dir: dirs::cache_dir().map(|dir| dir.join("livestream-schedule")),
        }
    }
}

impl WorkerConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_name must not be empty".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ServiceWorkerError::Config(
                "fetch_timeout_secs must be positive".to_string(),
            ));
        }
        self.resolved_manifest()?;
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url, ServiceWorkerError> {
        Url::parse(&self.origin)
            .map_err(|e| ServiceWorkerError::Config(format!("origin {:?}: {e}", self.origin)))
    }

    pub fn resolved_manifest(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.manifest.resolve(&self.origin_url()?)
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        let mut config = FetcherConfig {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_redirects: self.max_redirects,
            ..Default::default()
        };
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        config
    }
}
