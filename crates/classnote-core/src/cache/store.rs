use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::http::{Request, RequestKey, Response, ResponseType};

/// A response as it sits in a store, with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

// ============================================================================
// On-disk format
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GenerationFile {
    pub name: String,
    pub entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub key: RequestKey,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body
    pub body: String,
    pub kind: ResponseType,
    pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn from_cached(key: &RequestKey, cached: &CachedResponse) -> Self {
        let r = &cached.response;
        Self {
            key: key.clone(),
            status: r.status,
            status_text: r.status_text.clone(),
            headers: r.headers.clone(),
            body: BASE64.encode(&r.body),
            kind: r.kind,
            stored_at: cached.stored_at,
        }
    }

    fn into_cached(self) -> Result<(RequestKey, CachedResponse)> {
        let body = BASE64
            .decode(self.body.as_bytes())
            .with_context(|| format!("Corrupt body for cache entry {}", self.key))?;
        let response = Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body: Bytes::from(body),
            kind: self.kind,
        };
        Ok((
            self.key,
            CachedResponse {
                response,
                stored_at: self.stored_at,
            },
        ))
    }
}

// ============================================================================
// Store
// ============================================================================

/// One cache generation.
///
/// Every put, delete and lookup is atomic per key. Concurrent puts for
/// the same key are last-write-wins.
pub struct CacheStore {
    name: String,
    path: Option<PathBuf>,
    entries: RwLock<HashMap<RequestKey, CachedResponse>>,
    /// Serializes file rewrites so a stale snapshot never lands last
    persist_lock: Mutex<()>,
    evicted: AtomicBool,
}

impl CacheStore {
    pub(crate) fn new(name: String, path: Option<PathBuf>) -> Self {
        Self {
            name,
            path,
            entries: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            evicted: AtomicBool::new(false),
        }
    }

    pub(crate) async fn load(path: PathBuf) -> Result<Self> {
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let file: GenerationFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;

        let mut entries = HashMap::with_capacity(file.entries.len());
        for entry in file.entries {
            let (key, cached) = entry.into_cached()?;
            entries.insert(key, cached);
        }
        debug!(generation = %file.name, entries = entries.len(), "Loaded cache generation");

        Ok(Self {
            name: file.name,
            path: Some(path),
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
            evicted: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        self.match_key(&request.key()).await
    }

    pub async fn match_key(&self, key: &RequestKey) -> Option<Response> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|cached| cached.response.clone())
    }

    pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
        let key = request.key();
        debug!(generation = %self.name, key = %key, "Storing response");
        self.entries
            .write()
            .await
            .insert(key, CachedResponse::new(response));
        self.persist().await
    }

    /// Store several responses with a single file rewrite.
    pub async fn put_all(&self, items: Vec<(Request, Response)>) -> Result<()> {
        {
            let mut entries = self.entries.write().await;
            for (request, response) in items {
                entries.insert(request.key(), CachedResponse::new(response));
            }
        }
        self.persist().await
    }

    pub async fn delete(&self, request: &Request) -> Result<bool> {
        let removed = self.entries.write().await.remove(&request.key()).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn keys(&self) -> Vec<RequestKey> {
        let mut keys: Vec<RequestKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Entries with their storage time, sorted by key.
    pub async fn entries(&self) -> Vec<(RequestKey, CachedResponse)> {
        let mut entries: Vec<(RequestKey, CachedResponse)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop all further writes and remove the generation file. Holds the
    /// persist lock so an in-flight write cannot rename its file back
    /// into place after the removal.
    pub(crate) async fn evict(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.evicted.store(true, Ordering::SeqCst);

        let Some(path) = &self.path else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove cache file: {}", path.display()))
            }
        }
    }

    /// Rewrite the generation file from the current entries.
    pub(crate) async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        if self.evicted.load(Ordering::SeqCst) {
            debug!(generation = %self.name, "Skipping write for evicted generation");
            return Ok(());
        }

        let file = {
            let entries = self.entries.read().await;
            let mut stored: Vec<StoredEntry> = entries
                .iter()
                .map(|(k, v)| StoredEntry::from_cached(k, v))
                .collect();
            stored.sort_by(|a, b| a.key.cmp(&b.key));
            GenerationFile {
                name: self.name.clone(),
                entries: stored,
            }
        };

        let contents = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace cache file: {}", path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use url::Url;

    fn request(path: &str) -> Request {
        Request::get(Url::parse("https://app.example/").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_put_then_match() {
        let store = CacheStore::new("classnote-v3".to_string(), None);
        let req = request("index.html");
        assert!(store.match_request(&req).await.is_none());

        store
            .put(&req, Response::new(200, "<html>", ResponseType::Basic))
            .await
            .unwrap();

        let hit = store.match_request(&req).await.expect("stored response");
        assert_eq!(&hit.body[..], b"<html>");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_is_last_write_wins() {
        let store = CacheStore::new("classnote-v3".to_string(), None);
        let req = request("app.js");
        store.put(&req, Response::new(200, "one", ResponseType::Basic)).await.unwrap();
        store.put(&req, Response::new(200, "two", ResponseType::Basic)).await.unwrap();
        let hit = store.match_request(&req).await.unwrap();
        assert_eq!(&hit.body[..], b"two");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = CacheStore::new("classnote-v3".to_string(), None);
        let req = request("app.css");
        store.put(&req, Response::new(200, "body{}", ResponseType::Basic)).await.unwrap();
        assert!(store.delete(&req).await.unwrap());
        assert!(!store.delete(&req).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classnote-v3.json");
        let store = CacheStore::new("classnote-v3".to_string(), Some(path.clone()));
        let req = request("manifest.json");
        let resp = Response::new(200, vec![0u8, 159, 146, 150], ResponseType::Basic)
            .with_header("Content-Type", "application/json");
        store.put(&req, resp.clone()).await.unwrap();

        let reloaded = CacheStore::load(path).await.unwrap();
        assert_eq!(reloaded.name(), "classnote-v3");
        assert_eq!(reloaded.match_request(&req).await, Some(resp));
    }

    #[tokio::test]
    async fn test_evicted_store_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classnote-v2.json");
        let store = CacheStore::new("classnote-v2".to_string(), Some(path.clone()));
        store.persist().await.unwrap();
        assert!(path.exists());

        store.evict().await.unwrap();
        assert!(!path.exists());
        store
            .put(&request("late.js"), Response::new(200, "x", ResponseType::Basic))
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_evict_during_writes_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classnote-v2.json");
        let store = std::sync::Arc::new(CacheStore::new(
            "classnote-v2".to_string(),
            Some(path.clone()),
        ));

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .put(
                            &request(&format!("page-{i}.html")),
                            Response::new(200, "page", ResponseType::Basic),
                        )
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        store.evict().await.unwrap();

        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        assert!(!path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_age_display() {
        let fresh = CachedResponse::new(Response::offline());
        assert_eq!(fresh.age_display(), "just now");

        let mut old = CachedResponse::new(Response::offline());
        old.stored_at = Utc::now() - Duration::minutes(125);
        assert_eq!(old.age_display(), "2h ago");

        old.stored_at = Utc::now() - Duration::days(3);
        assert_eq!(old.age_display(), "3d ago");
    }
}
