use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::store::CacheStore;

/// The set of named cache generations.
pub struct CacheStorage {
    dir: Option<PathBuf>,
    caches: RwLock<HashMap<String, Arc<CacheStore>>>,
}

impl CacheStorage {
    /// Storage that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Open durable storage rooted at `dir`, loading every generation
    /// file already present. Unreadable files are skipped with a warning.
    pub async fn open_dir(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let mut caches = HashMap::new();
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to list cache directory: {}", dir.display()))?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match CacheStore::load(path.clone()).await {
                Ok(store) if !owns_file(&store, &path) => {
                    warn!(
                        path = %path.display(),
                        generation = store.name(),
                        "Skipping cache file with mismatched name"
                    );
                }
                Ok(store) => {
                    caches.insert(store.name().to_string(), Arc::new(store));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache file");
                }
            }
        }
        info!(dir = %dir.display(), generations = caches.len(), "Opened cache storage");

        Ok(Self {
            dir: Some(dir),
            caches: RwLock::new(caches),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Open a generation, creating it if absent.
    pub async fn open(&self, name: &str) -> Result<Arc<CacheStore>> {
        anyhow::ensure!(
            is_valid_generation_name(name),
            "Invalid cache generation name: {:?}",
            name
        );
        if let Some(store) = self.caches.read().await.get(name) {
            return Ok(Arc::clone(store));
        }

        let store = {
            let mut caches = self.caches.write().await;
            // Another task may have created it between the two locks
            if let Some(store) = caches.get(name) {
                return Ok(Arc::clone(store));
            }
            let path = self.dir.as_ref().map(|d| d.join(file_name_for(name)));
            let store = Arc::new(CacheStore::new(name.to_string(), path));
            caches.insert(name.to_string(), Arc::clone(&store));
            store
        };
        debug!(generation = name, "Created cache generation");
        store.persist().await?;
        Ok(store)
    }

    /// Look up a generation without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<CacheStore>> {
        self.caches.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Names of all generations, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a generation and its file. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let Some(store) = self.caches.write().await.remove(name) else {
            return Ok(false);
        };
        store.evict().await?;
        info!(generation = name, "Deleted cache generation");
        Ok(true)
    }
}

/// Generation names double as file names, so only a conservative
/// character set is accepted: ASCII alphanumerics, `-`, `_` and `.`, not
/// starting with a dot.
pub fn is_valid_generation_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// File holding a generation. One-to-one for valid names.
fn file_name_for(name: &str) -> String {
    format!("{}.json", name)
}

/// A loaded file only counts when it sits where its name says it should.
fn owns_file(store: &CacheStore, path: &Path) -> bool {
    is_valid_generation_name(store.name())
        && path.file_name().and_then(|f| f.to_str()) == Some(file_name_for(store.name()).as_str())
}
