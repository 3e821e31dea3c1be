//! Bounded-concurrency byte-range download pipeline. Fetches each
//! required file exactly once regardless of how many callers enqueue it,
//! and — for large files — delivers chunks to the cache as they land so a
//! file becomes queryable before the download finishes.

pub mod task;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use md5::{Digest, Md5};
use reqwest::Client;
use signage_config::device_class::CHUNK_STORAGE_THRESHOLD;
use signage_contracts::ids::FileId;
use signage_contracts::required_file::{FileKind, RequiredFile};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use task::{DownloadStatus, DownloadTask};

use crate::chunk_cache::ChunkCache;

#[derive(Debug, Clone, Default)]
pub struct QueueProgress {
    pub queued: usize,
    pub downloading: usize,
    pub complete: usize,
    pub failed: usize,
    pub pending: usize,
}

pub struct DownloadQueue {
    client: Client,
    cache: Arc<ChunkCache>,
    chunk_size: u64,
    chunks_per_file: usize,
    concurrency: usize,
    tasks: DashMap<String, Arc<DownloadTask>>,
    pending: Mutex<VecDeque<Arc<DownloadTask>>>,
    active_count: Arc<AtomicUsize>,
}

impl DownloadQueue {
    pub fn new(
        client: Client,
        cache: Arc<ChunkCache>,
        chunk_size: u64,
        chunks_per_file: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            cache,
            chunk_size,
            chunks_per_file,
            concurrency,
            tasks: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Idempotent by URL: a second enqueue of an in-flight or completed
    /// download returns the existing task without issuing a second HEAD or
    /// GET.
    pub async fn enqueue(self: &Arc<Self>, file: RequiredFile) -> Arc<DownloadTask> {
        let url = file.url.to_string();
        if let Some(existing) = self.tasks.get(&url) {
            return existing.clone();
        }

        let task = DownloadTask::new(file);
        self.tasks.insert(url, task.clone());
        self.pending.lock().await.push_back(task.clone());
        self.try_dispatch();
        task
    }

    pub fn get_task(&self, url: &str) -> Option<Arc<DownloadTask>> {
        self.tasks.get(url).map(|t| t.clone())
    }

    /// Moves a queued task to the front of the FIFO. Returns `true` if the
    /// task was found queued-and-moved, or is already at the front /
    /// already downloading (nothing useful to do); `false` if the task is
    /// unknown or already terminal.
    pub async fn prioritize(&self, kind: FileKind, id: &FileId) -> bool {
        let Some(task) = self
            .tasks
            .iter()
            .find(|entry| entry.file.kind == kind && &entry.file.id == id)
            .map(|entry| entry.clone())
        else {
            return false;
        };

        let status = task.status().await;
        if status.is_terminal() {
            return false;
        }
        if status == DownloadStatus::Downloading {
            return true;
        }

        let mut pending = self.pending.lock().await;
        if let Some(pos) = pending.iter().position(|t| Arc::ptr_eq(t, &task)) {
            let task = pending.remove(pos).unwrap();
            pending.push_front(task);
        }
        true
    }

    pub async fn get_progress(&self) -> QueueProgress {
        let mut progress = QueueProgress::default();
        for entry in self.tasks.iter() {
            match entry.status().await {
                DownloadStatus::Queued => progress.queued += 1,
                DownloadStatus::Downloading => progress.downloading += 1,
                DownloadStatus::Complete => progress.complete += 1,
                DownloadStatus::Failed(_) => progress.failed += 1,
                DownloadStatus::Pending => progress.pending += 1,
                DownloadStatus::Cancelled => {}
            }
        }
        progress
    }

    pub async fn clear(&self) {
        self.tasks.clear();
        self.pending.lock().await.clear();
    }

    fn try_dispatch(self: &Arc<Self>) {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                if queue.active_count.load(Ordering::Acquire) >= queue.concurrency {
                    return;
                }
                let next = {
                    let mut pending = queue.pending.lock().await;
                    pending.pop_front()
                };
                let Some(task) = next else { return };

                queue.active_count.fetch_add(1, Ordering::AcqRel);
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue.run_download(task).await;
                    queue.active_count.fetch_sub(1, Ordering::AcqRel);
                    queue.try_dispatch();
                });
            }
        });
    }

    async fn run_download(&self, task: Arc<DownloadTask>) {
        task.set_status(DownloadStatus::Downloading).await;
        let url = task.file.url.to_string();

        let head = match self.client.head(&url).send().await {
            Ok(resp) => resp,
            Err(source) => {
                warn!(url, error = %source, "HEAD request failed");
                task.set_status(DownloadStatus::Failed(source.to_string()))
                    .await;
                return;
            }
        };

        if head.status().as_u16() == 202 {
            debug!(url, "CMS reported file not ready yet");
            task.set_status(DownloadStatus::Pending).await;
            return;
        }
        if !head.status().is_success() {
            let status = head.status().as_u16();
            warn!(url, status, "HEAD returned a hard error");
            task.set_status(DownloadStatus::Failed(format!("HTTP {status}")))
                .await;
            return;
        }

        let total_bytes = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let content_type = head
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        task.total_bytes.store(total_bytes, Ordering::Relaxed);

        let key = task.file.cache_key();
        let fingerprint = Some(task.file.fingerprint.clone());

        if total_bytes <= CHUNK_STORAGE_THRESHOLD {
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(blob) => {
                        verify_fingerprint(&url, &blob, &task.file.fingerprint);
                        task.add_downloaded(blob.len() as u64);
                        if let Err(e) = self
                            .cache
                            .put(&key, blob, &content_type, fingerprint)
                            .await
                        {
                            warn!(url, error = %e, "failed to store downloaded file");
                            task.set_status(DownloadStatus::Failed(e.to_string())).await;
                            return;
                        }
                        task.set_status(DownloadStatus::Complete).await;
                    }
                    Err(source) => {
                        warn!(url, error = %source, "GET body read failed");
                        task.set_status(DownloadStatus::Failed(source.to_string()))
                            .await;
                    }
                },
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    task.set_status(DownloadStatus::Failed(format!("HTTP {status}")))
                        .await;
                }
                Err(source) => {
                    warn!(url, error = %source, "GET request failed");
                    task.set_status(DownloadStatus::Failed(source.to_string()))
                        .await;
                }
            }
            return;
        }

        self.run_chunked_download(&task, &url, &key, total_bytes, &content_type, fingerprint)
            .await;
    }

    async fn run_chunked_download(
        &self,
        task: &Arc<DownloadTask>,
        url: &str,
        key: &str,
        total_bytes: u64,
        content_type: &str,
        fingerprint: Option<signage_contracts::required_file::Fingerprint>,
    ) {
        let num_chunks = total_bytes.div_ceil(self.chunk_size) as u32;
        let chunks_per_file = self.chunks_per_file;

        let results: Vec<Result<(), String>> = stream::iter(0..num_chunks)
            .map(|index| {
                let client = self.client.clone();
                let url = url.to_string();
                let chunk_size = self.chunk_size;
                async move {
                    let start = index as u64 * chunk_size;
                    let end = (start + chunk_size - 1).min(total_bytes - 1);
                    client
                        .get(&url)
                        .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
                        .send()
                        .await
                        .map_err(|e| e.to_string())?
                        .bytes()
                        .await
                        .map(|blob| (index, blob))
                        .map_err(|e| e.to_string())
                }
            })
            .buffer_unordered(chunks_per_file)
            .then(|result| {
                let task = task.clone();
                let key = key.to_string();
                let content_type = content_type.to_string();
                let fingerprint = fingerprint.clone();
                async move {
                    match result {
                        Ok((index, blob)) => {
                            task.add_downloaded(blob.len() as u64);
                            // Delivered to the cache before the next chunk
                            // is awaited by the underlying stream
                            // step 3); `buffer_unordered` drives at most
                            // `chunks_per_file` GETs concurrently, and this
                            // `.then` stage runs in-order per completion.
                            self.cache
                                .store_chunk(
                                    &key,
                                    index,
                                    blob,
                                    num_chunks,
                                    total_bytes,
                                    &content_type,
                                    fingerprint,
                                )
                                .await
                                .map_err(|e| e.to_string())
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .collect()
            .await;

        if let Some(reason) = results.into_iter().find_map(|r| r.err()) {
            warn!(url, reason, "chunked download failed");
            task.set_status(DownloadStatus::Failed(reason)).await;
            return;
        }

        task.set_status(DownloadStatus::Complete).await;
    }
}

fn verify_fingerprint(url: &str, blob: &Bytes, expected: &signage_contracts::required_file::Fingerprint) {
    let digest = format!("{:x}", Md5::digest(blob));
    if digest != expected.0 {
        warn!(
            url,
            expected = expected.0,
            actual = digest,
            "MD5 mismatch on whole-file download; keeping the file, the media element will reject it naturally if corrupt"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signage_contracts::required_file::Fingerprint;
    use url::Url;

    fn file(url: &str) -> RequiredFile {
        RequiredFile {
            kind: FileKind::Media,
            id: FileId::new("m1"),
            url: Url::parse(url).unwrap(),
            fingerprint: Fingerprint("deadbeef".to_string()),
            size_bytes: 10,
            purge: false,
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ChunkCache::new(dir.path(), 16, 1024));
        // concurrency=0 keeps this test from dispatching a real network
        // request; it only exercises the idempotency bookkeeping.
        let queue = Arc::new(DownloadQueue::new(Client::new(), cache, 16, 4, 0));

        let first = queue.enqueue(file("https://cms.example/a.jpg")).await;
        let second = queue.enqueue(file("https://cms.example/a.jpg")).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn prioritize_moves_queued_task_to_front() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ChunkCache::new(dir.path(), 16, 1024));
        // Zero concurrency: nothing auto-dispatches, so both stay queued.
        let queue = Arc::new(DownloadQueue::new(Client::new(), cache, 16, 4, 0));

        queue.enqueue(file("https://cms.example/a.jpg")).await;
        let media_id = FileId::new("m2");
        let mut second_file = file("https://cms.example/b.jpg");
        second_file.id = media_id.clone();
        queue.enqueue(second_file).await;

        let moved = queue.prioritize(FileKind::Media, &media_id).await;
        assert!(moved);

        let pending = queue.pending.lock().await;
        assert_eq!(pending.front().unwrap().file.id, media_id);
    }
}
