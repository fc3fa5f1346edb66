//! Cache buckets.
//!
//! A [`Cache`] is one named bucket mapping a [`RequestKey`] to the most
//! recently stored [`CacheEntry`]. [`CacheStorage`] holds every bucket, the
//! current one and any stale ones left behind by older versions.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use schedkit_net::{Request, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Bucket-level errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Only GET requests can be cached, got {0}")]
    NonGetRequest(String),

    #[error("Corrupt cache entry for {url}: {reason}")]
    CorruptEntry { url: String, reason: String },
}

// ==================== Keys ====================

/// Request identity: method plus full URL, query string included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.as_str().to_string(),
        }
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET.as_str()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Entries ====================

/// One stored response header. The value is kept as raw bytes since header
/// values need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHeader {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Bytes,
}

impl CachedHeader {
    pub fn new(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request method.
    pub method: String,

    /// Request URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in arrival order.
    pub headers: Vec<CachedHeader>,

    /// Response body.
    #[serde(with = "base64_bytes")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for `key`. The body buffer is shared, not copied.
    pub fn from_response(key: &RequestKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| {
                CachedHeader::new(name.as_str(), Bytes::copy_from_slice(value.as_bytes()))
            })
            .collect();

        Self {
            method: key.method.clone(),
            url: key.url.clone(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let corrupt = |reason: String| CacheError::CorruptEntry {
            url: self.url.clone(),
            reason,
        };

        let url = Url::parse(&self.url).map_err(|e| corrupt(e.to_string()))?;
        let status = StatusCode::from_u16(self.status).map_err(|e| corrupt(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let name =
                HeaderName::try_from(header.name.as_str()).map_err(|e| corrupt(e.to_string()))?;
            let value =
                HeaderValue::from_bytes(&header.value).map_err(|e| corrupt(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Response::new(url, status, headers, self.body.clone()))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// A named cache bucket.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    name: String,
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create an empty bucket.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request. Only GET requests ever match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.get(&RequestKey::for_request(request))
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &RequestKey) -> Option<&CacheEntry> {
        if !key.is_get() {
            return None;
        }
        self.entries.get(key)
    }

    /// Upsert an entry. Non-GET entries are rejected.
    pub fn put(&mut self, entry: CacheEntry) -> Result<(), CacheError> {
        let key = entry.key();
        if !key.is_get() {
            return Err(CacheError::NonGetRequest(key.method));
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, sorted by URL.
    pub fn keys(&self) -> Vec<&RequestKey> {
        let mut keys: Vec<&RequestKey> = self.entries.keys().collect();
        keys.sort_by(|a, b| a.url.cmp(&b.url));
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Every bucket known to the origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a bucket, creating it if absent.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Insert a whole bucket, replacing any bucket with the same name.
    pub fn insert(&mut self, cache: Cache) {
        self.caches.insert(cache.name.clone(), cache);
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Bucket names, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.caches.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str, body: &'static str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        Response::new(
            Url::parse(url).unwrap(),
            StatusCode::OK,
            headers,
            Bytes::from_static(body.as_bytes()),
        )
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_entry_restores_response() {
        let request = get("http://127.0.0.1:5000/");
        let key = RequestKey::for_request(&request);
        let entry = CacheEntry::from_response(&key, &response("http://127.0.0.1:5000/", "home"));

        let restored = entry.to_response().unwrap();
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.body, Bytes::from_static(b"home"));
        assert_eq!(restored.content_type(), Some("text/html"));
        assert_eq!(restored.headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_non_utf8_header_survives_storage() {
        let url = "http://127.0.0.1:5000/";
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-disposition",
            HeaderValue::from_bytes(b"attachment; filename=caf\xe9.ics").unwrap(),
        );
        let network = Response::new(
            Url::parse(url).unwrap(),
            StatusCode::OK,
            headers,
            Bytes::from_static(b"BEGIN:VCALENDAR"),
        );
        let key = RequestKey::for_request(&get(url));

        let json = serde_json::to_string(&CacheEntry::from_response(&key, &network)).unwrap();
        let stored: CacheEntry = serde_json::from_str(&json).unwrap();
        let restored = stored.to_response().unwrap();

        assert_eq!(
            restored.headers.get("content-disposition").unwrap().as_bytes(),
            b"attachment; filename=caf\xe9.ics"
        );
        assert_eq!(restored.headers, network.headers);
    }

    #[test]
    fn test_query_string_is_part_of_identity() {
        let mut cache = Cache::new("livestream-schedule-v2");
        let v2 = get("http://127.0.0.1:5000/static/css/style.css?v=2");
        let key = RequestKey::for_request(&v2);
        cache
            .put(CacheEntry::from_response(&key, &response(key.url.as_str(), "css")))
            .unwrap();

        assert!(cache.match_request(&v2).is_some());
        assert!(cache
            .match_request(&get("http://127.0.0.1:5000/static/css/style.css?v=1"))
            .is_none());
        assert!(cache
            .match_request(&get("http://127.0.0.1:5000/static/css/style.css"))
            .is_none());
    }

    #[test]
    fn test_put_rejects_non_get() {
        let mut cache = Cache::new("v2");
        let post = Request::new(Method::POST, Url::parse("http://127.0.0.1:5000/api").unwrap());
        let key = RequestKey::for_request(&post);
        let entry = CacheEntry::from_response(&key, &response("http://127.0.0.1:5000/api", "{}"));

        assert_eq!(
            cache.put(entry),
            Err(CacheError::NonGetRequest("POST".to_string()))
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_non_get_never_matches() {
        let mut cache = Cache::new("v2");
        let request = get("http://127.0.0.1:5000/");
        let key = RequestKey::for_request(&request);
        cache
            .put(CacheEntry::from_response(&key, &response("http://127.0.0.1:5000/", "home")))
            .unwrap();

        let head = Request::new(Method::HEAD, Url::parse("http://127.0.0.1:5000/").unwrap());
        assert!(cache.match_request(&head).is_none());
    }

    #[test]
    fn test_put_upserts() {
        let mut cache = Cache::new("v2");
        let request = get("http://127.0.0.1:5000/");
        let key = RequestKey::for_request(&request);
        cache
            .put(CacheEntry::from_response(&key, &response(&key.url, "old")))
            .unwrap();
        cache
            .put(CacheEntry::from_response(&key, &response(&key.url, "new")))
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().body, Bytes::from_static(b"new"));
        assert!(cache.delete(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_entry() {
        let entry = CacheEntry {
            method: "GET".to_string(),
            url: "not a url".to_string(),
            status: 200,
            headers: Vec::new(),
            body: Bytes::new(),
            cached_at: 0,
        };
        assert!(matches!(
            entry.to_response(),
            Err(CacheError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_entry_json_body_is_base64() {
        let request = get("http://127.0.0.1:5000/");
        let key = RequestKey::for_request(&request);
        let entry = CacheEntry::from_response(&key, &response(&key.url, "home"));

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["body"], "aG9tZQ==");

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("livestream-schedule-v1"));

        storage.open("livestream-schedule-v2");
        storage.open("livestream-schedule-v1");
        assert_eq!(
            storage.keys(),
            vec!["livestream-schedule-v1", "livestream-schedule-v2"]
        );

        assert!(storage.delete("livestream-schedule-v1"));
        assert!(!storage.delete("livestream-schedule-v1"));
        assert_eq!(storage.keys(), vec!["livestream-schedule-v2"]);
    }
}
