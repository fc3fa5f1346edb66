//! Prefetch manifest.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// Current bucket name. Bump the version whenever the manifest changes so
/// activation evicts the previous bucket.
pub const CACHE_NAME: &str = "livestream-schedule-v2";

const LIVESTREAM_MANIFEST: [&str; 4] = [
    "/",
    "/static/css/style.css?v=2",
    "/static/js/script.js?v=2",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
];

/// Ordered set of URLs prefetched at install time.
///
/// Entries are either origin-relative paths or absolute URLs. Duplicates are
/// dropped, first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PrefetchManifest {
    entries: Vec<String>,
}

impl PrefetchManifest {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.into();
            if !unique.contains(&entry) {
                unique.push(entry);
            }
        }
        Self { entries: unique }
    }

    /// The page root, versioned stylesheet and script, and the icon font CSS.
    pub fn livestream_default() -> Self {
        Self::new(LIVESTREAM_MANIFEST)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every entry against the page origin.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, ServiceWorkerError> {
        let mut resolved: Vec<Url> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let url = origin.join(entry).map_err(|e| {
                ServiceWorkerError::Config(format!("manifest entry {entry:?}: {e}"))
            })?;
            if !resolved.contains(&url) {
                resolved.push(url);
            }
        }
        Ok(resolved)
    }
}

impl Default for PrefetchManifest {
    fn default() -> Self {
        Self::livestream_default()
    }
}

impl From<Vec<String>> for PrefetchManifest {
    fn from(entries: Vec<String>) -> Self {
        Self::new(entries)
    }
}

impl From<PrefetchManifest> for Vec<String> {
    fn from(manifest: PrefetchManifest) -> Self {
        manifest.entries
    }
}
