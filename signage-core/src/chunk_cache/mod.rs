//! Content-addressed media + widget-HTML store. Persists artifacts
//! through `cacache` (content-addressed, integrity-checked on-disk cache),
//! serves byte-range reads out of an in-memory LRU of chunk blobs, and
//! tracks which layouts still reach which media.

pub mod blob_lru;
pub mod metadata;
pub mod range;
pub mod widget_html;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use signage_config::device_class::CHUNK_STORAGE_THRESHOLD;
use signage_contracts::ids::{LayoutId, MediaId};
use signage_contracts::required_file::Fingerprint;

use crate::error::{CacheError, CacheResult};

pub use blob_lru::BlobCache;
pub use metadata::{ArtifactMetadata, FileExistence};
pub use widget_html::ResourceFetcher;

fn meta_key(key: &str) -> String {
    format!("{key}::meta")
}

fn chunk_key(key: &str, index: u32) -> String {
    format!("{key}::chunk::{index}")
}

/// A 206/416 response shape independent of any HTTP framework, so
/// `signage-server` can translate it into `axum::response::Response`
/// without `signage-core` depending on axum.
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

pub struct ChunkCache {
    root: PathBuf,
    chunk_size: u64,
    blobs: BlobCache,
    dependants: DashMap<MediaId, HashSet<LayoutId>>,
    /// Per-key write guard: ensures `fileExists` never observes a
    /// half-written chunked artifact even if two writers somehow target
    /// the same key concurrently.
    write_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
}

impl ChunkCache {
    pub fn new(root: impl Into<PathBuf>, chunk_size: u64, blob_lru_budget: u64) -> Self {
        Self {
            root: root.into(),
            chunk_size,
            blobs: BlobCache::new(blob_lru_budget),
            dependants: DashMap::new(),
            write_locks: DashMap::new(),
            fetcher: None,
        }
    }

    pub fn with_resource_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.write_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Pure existence lookup (`fileExists`); the sole durability
    /// predicate the rest of the system relies on.
    pub async fn file_exists(&self, key: &str) -> CacheResult<FileExistence> {
        match self.read_metadata(key).await? {
            Some(meta) => Ok(FileExistence {
                exists: true,
                chunked: meta.chunked,
                metadata: Some(meta),
            }),
            None => Ok(FileExistence::absent()),
        }
    }

    async fn read_metadata(&self, key: &str) -> CacheResult<Option<ArtifactMetadata>> {
        match cacache::read(&self.root, &meta_key(key)).await {
            Ok(bytes) => {
                let meta = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::MalformedMetadata(key.to_string(), e))?;
                Ok(Some(meta))
            }
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(other) => Err(CacheError::Storage(other)),
        }
    }

    async fn write_metadata(&self, key: &str, meta: &ArtifactMetadata) -> CacheResult<()> {
        let bytes = serde_json::to_vec(meta)
            .map_err(|e| CacheError::MalformedMetadata(key.to_string(), e))?;
        cacache::write(&self.root, &meta_key(key), bytes).await?;
        Ok(())
    }

    async fn remove_artifact(&self, key: &str, meta: &ArtifactMetadata) -> CacheResult<()> {
        for i in 0..meta.num_chunks {
            let _ = cacache::remove(&self.root, &chunk_key(key, i)).await;
        }
        cacache::remove(&self.root, &meta_key(key)).await?;
        Ok(())
    }

    /// Stores `blob` whole or chunked depending on size (`put`). Used
    /// by the download pipeline for small files and by `storeWidgetHtml`.
    /// A `put` whose fingerprint matches what is already stored is a no-op;
    /// a differing fingerprint replaces the artifact (old chunks deleted).
    pub async fn put(
        &self,
        key: &str,
        blob: Bytes,
        content_type: &str,
        fingerprint: Option<Fingerprint>,
    ) -> CacheResult<()> {
        let guard = self.guard_for(key);
        let _permit = guard.lock().await;

        if let Some(existing) = self.read_metadata(key).await? {
            if existing.fingerprint.is_some() && existing.fingerprint == fingerprint {
                debug!(key, "put is a no-op, fingerprint unchanged");
                return Ok(());
            }
            self.remove_artifact(key, &existing).await?;
        }

        let total_size = blob.len() as u64;
        if total_size <= CHUNK_STORAGE_THRESHOLD {
            cacache::write(&self.root, &chunk_key(key, 0), blob.to_vec()).await?;
            let meta = ArtifactMetadata::whole(total_size, content_type.to_string(), fingerprint);
            self.write_metadata(key, &meta).await?;
        } else {
            let num_chunks = total_size.div_ceil(self.chunk_size) as u32;
            for index in 0..num_chunks {
                let start = index as u64 * self.chunk_size;
                let end = (start + self.chunk_size).min(total_size);
                cacache::write(&self.root, &chunk_key(key, index), blob[start as usize..end as usize].to_vec())
                    .await?;
            }
            let meta = ArtifactMetadata::chunked(
                total_size,
                self.chunk_size,
                num_chunks,
                content_type.to_string(),
                fingerprint,
            );
            self.write_metadata(key, &meta).await?;
        }
        Ok(())
    }

    /// Called by the download queue's `onChunkStored` hook as each
    /// byte-range chunk completes. Writes metadata on the
    /// first arrival — by arrival order, not index order — which is the
    /// moment the file becomes queryable by `fileExists`.
    pub async fn store_chunk(
        &self,
        key: &str,
        index: u32,
        blob: Bytes,
        num_chunks: u32,
        total_size: u64,
        content_type: &str,
        fingerprint: Option<Fingerprint>,
    ) -> CacheResult<()> {
        let guard = self.guard_for(key);
        let _permit = guard.lock().await;

        cacache::write(&self.root, &chunk_key(key, index), blob.to_vec()).await?;

        if self.read_metadata(key).await?.is_none() {
            let meta = ArtifactMetadata::chunked(
                total_size,
                self.chunk_size,
                num_chunks,
                content_type.to_string(),
                fingerprint,
            );
            self.write_metadata(key, &meta).await?;
        }
        Ok(())
    }

    /// Whole-file read (`get`). For a chunked artifact this
    /// concatenates every chunk; callers that want partial content from a
    /// large file must use `range` instead.
    pub async fn get(&self, key: &str) -> CacheResult<Option<(Bytes, String)>> {
        let Some(meta) = self.read_metadata(key).await? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(meta.total_size as usize);
        for index in 0..meta.num_chunks {
            let chunk = self.load_chunk(key, index).await?;
            out.extend_from_slice(&chunk);
        }
        Ok(Some((Bytes::from(out), meta.content_type)))
    }

    async fn load_chunk(&self, key: &str, index: u32) -> CacheResult<Bytes> {
        let ck = chunk_key(key, index);
        let root = self.root.clone();
        self.blobs
            .get_or_load(&ck, || async move {
                let bytes = cacache::read(&root, &ck).await?;
                Ok(Bytes::from(bytes))
            })
            .await
    }

    /// Serves a byte-range read out of chunked storage (range-serving
    /// algorithm). Always honoured when the caller sends a `Range` header,
    /// regardless of whether the artifact is chunked or whole.
    pub async fn range(&self, key: &str, range_header: &str) -> CacheResult<RangeResponse> {
        let meta = self
            .read_metadata(key)
            .await?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

        let Some((start, end)) = range::parse_byte_range(range_header, meta.total_size) else {
            return Ok(RangeResponse {
                status: 416,
                headers: vec![(
                    "Content-Range",
                    format!("bytes */{}", meta.total_size),
                )],
                body: Bytes::new(),
            });
        };

        let first_chunk = meta.chunk_index_for_offset(start);
        let last_chunk = meta.chunk_index_for_offset(end);

        let mut body = Vec::with_capacity((end - start + 1) as usize);
        for index in first_chunk..=last_chunk {
            let chunk = self.load_chunk(key, index).await?;
            let (local_start, local_len) = meta.local_slice(index, start, end);
            let local_start = local_start as usize;
            let local_end = local_start + local_len as usize;
            body.extend_from_slice(&chunk[local_start..local_end]);
        }

        debug_assert_eq!(body.len() as u64, end - start + 1);

        Ok(RangeResponse {
            status: 206,
            headers: vec![
                (
                    "Content-Range",
                    format!("bytes {}-{}/{}", start, end, meta.total_size),
                ),
                ("Content-Length", body.len().to_string()),
                ("Accept-Ranges", "bytes".to_string()),
                ("Content-Type", meta.content_type.clone()),
            ],
            body: Bytes::from(body),
        })
    }

    /// Records that `layout_id` references `media_id`, for reachability
    /// bookkeeping (dependants map).
    pub fn add_dependant(&self, media_id: MediaId, layout_id: LayoutId) {
        self.dependants.entry(media_id).or_default().insert(layout_id);
    }

    /// Removes `layout_id` from every dependants set, returning the media
    /// ids that are now orphaned (eligible for eviction).
    pub fn remove_layout_dependants(&self, layout_id: &LayoutId) -> Vec<MediaId> {
        let mut orphaned = Vec::new();
        self.dependants.retain(|media_id, layouts| {
            layouts.remove(layout_id);
            if layouts.is_empty() {
                orphaned.push(media_id.clone());
                false
            } else {
                true
            }
        });
        orphaned
    }

    /// Evicts a media artifact entirely (storage entries + LRU +
    /// dependants bookkeeping). Used for orphan cleanup and purge
    /// directives (`purgeAll`).
    pub async fn evict(&self, key: &str) -> CacheResult<()> {
        if let Some(meta) = self.read_metadata(key).await? {
            for index in 0..meta.num_chunks {
                self.blobs.invalidate(&chunk_key(key, index)).await;
            }
            self.remove_artifact(key, &meta).await?;
        }
        Ok(())
    }

    /// Clears the entire cache: storage, blob LRU accounting is implicitly
    /// dropped since its entries reference keys that no longer resolve,
    /// and the dependants map. Used for `purgeAll` and app teardown.
    pub async fn clear(&self) -> CacheResult<()> {
        cacache::clear(&self.root).await?;
        self.dependants.clear();
        self.write_locks.clear();
        Ok(())
    }

    pub fn fetcher(&self) -> Option<&Arc<dyn ResourceFetcher>> {
        self.fetcher.as_ref()
    }

    /// Bytes currently resident in the in-memory blob LRU, for the status
    /// surface. Not the same as on-disk occupancy: `cacache`'s
    /// content-addressed store is the durable source of truth.
    pub async fn blob_cache_bytes_in_use(&self) -> u64 {
        self.blobs.used_bytes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(dir: &tempfile::TempDir) -> ChunkCache {
        ChunkCache::new(dir.path(), 16, 1024 * 1024)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_a_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = Bytes::from_static(b"hello world");
        cache
            .put("media/1", blob.clone(), "text/plain", None)
            .await
            .unwrap();

        let existence = cache.file_exists("media/1").await.unwrap();
        assert!(existence.exists);
        assert!(!existence.chunked);

        let (read_back, content_type) = cache.get("media/1").await.unwrap().unwrap();
        assert_eq!(read_back, blob);
        assert_eq!(content_type, "text/plain");
    }

    #[tokio::test]
    async fn put_then_range_round_trips_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = Bytes::from(vec![7u8; 40]); // chunk_size=16 -> 3 chunks
        cache
            .put("media/2", blob.clone(), "application/octet-stream", None)
            .await
            .unwrap();

        let response = cache.range("media/2", "bytes=0-39").await.unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.body, blob);
    }

    #[tokio::test]
    async fn range_spanning_chunk_boundary_slices_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob: Bytes = (0u8..40).collect::<Vec<u8>>().into();
        cache
            .put("media/3", blob.clone(), "application/octet-stream", None)
            .await
            .unwrap();

        let response = cache.range("media/3", "bytes=10-25").await.unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.body.as_ref(), &blob[10..=25]);
    }

    #[tokio::test]
    async fn unsatisfiable_range_returns_416() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache
            .put("media/4", Bytes::from_static(b"short"), "text/plain", None)
            .await
            .unwrap();

        let response = cache.range("media/4", "bytes=9999-10000").await.unwrap();
        assert_eq!(response.status, 416);
    }

    #[tokio::test]
    async fn put_with_same_fingerprint_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let fp = Some(Fingerprint::new("abc123"));
        cache
            .put("media/5", Bytes::from_static(b"v1"), "text/plain", fp.clone())
            .await
            .unwrap();
        // Same fingerprint, different bytes: must not replace.
        cache
            .put("media/5", Bytes::from_static(b"v2-longer"), "text/plain", fp)
            .await
            .unwrap();

        let (body, _) = cache.get("media/5").await.unwrap().unwrap();
        assert_eq!(body, Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn put_with_different_fingerprint_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache
            .put(
                "media/6",
                Bytes::from_static(b"v1"),
                "text/plain",
                Some(Fingerprint::new("aaa")),
            )
            .await
            .unwrap();
        cache
            .put(
                "media/6",
                Bytes::from_static(b"v2"),
                "text/plain",
                Some(Fingerprint::new("bbb")),
            )
            .await
            .unwrap();

        let (body, _) = cache.get("media/6").await.unwrap().unwrap();
        assert_eq!(body, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn removing_last_dependant_orphans_media() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let media = MediaId::new("m1");
        let layout_a = LayoutId::new("a");
        let layout_b = LayoutId::new("b");
        cache.add_dependant(media.clone(), layout_a.clone());
        cache.add_dependant(media.clone(), layout_b.clone());

        let orphaned = cache.remove_layout_dependants(&layout_a);
        assert!(orphaned.is_empty(), "still referenced by layout b");

        let orphaned = cache.remove_layout_dependants(&layout_b);
        assert_eq!(orphaned, vec![media]);
    }
}
