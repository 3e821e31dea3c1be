use std::collections::{HashMap, VecDeque};
use std::future::Future;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::CacheError;

/// In-memory LRU over `(key -> blob)` with a byte-size budget
/// `BlobCache`). Backing storage remains the source of truth, so eviction
/// here is never destructive — it only means the next read goes back to
/// disk.
pub struct BlobCache {
    inner: Mutex<Inner>,
}

struct Inner {
    budget_bytes: u64,
    used_bytes: u64,
    entries: HashMap<String, Bytes>,
    /// Front = most recently used.
    recency: VecDeque<String>,
}

impl BlobCache {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                budget_bytes,
                used_bytes: 0,
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
        }
    }

    /// Returns the cached blob for `key`, loading it with `loader` on a
    /// miss and evicting least-recently-used entries until the budget is
    /// respected again.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, CacheError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if let Some(blob) = inner.touch(key) {
                return Ok(blob);
            }
        }
        let blob = loader().await?;
        let mut inner = self.inner.lock().await;
        inner.insert(key.to_string(), blob.clone());
        Ok(blob)
    }

    pub async fn used_bytes(&self) -> u64 {
        self.inner.lock().await.used_bytes
    }

    pub async fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(removed) = inner.entries.remove(key) {
            inner.used_bytes -= removed.len() as u64;
            inner.recency.retain(|k| k != key);
        }
    }
}

impl Inner {
    fn touch(&mut self, key: &str) -> Option<Bytes> {
        let blob = self.entries.get(key).cloned()?;
        self.recency.retain(|k| k != key);
        self.recency.push_front(key.to_string());
        Some(blob)
    }

    fn insert(&mut self, key: String, blob: Bytes) {
        if self.entries.contains_key(&key) {
            return;
        }
        self.used_bytes += blob.len() as u64;
        self.recency.push_front(key.clone());
        self.entries.insert(key, blob);

        while self.used_bytes > self.budget_bytes {
            let Some(oldest) = self.recency.pop_back() else {
                break;
            };
            if let Some(removed) = self.entries.remove(&oldest) {
                self.used_bytes -= removed.len() as u64;
            }
        }
    }
}
