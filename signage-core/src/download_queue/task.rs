use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use signage_contracts::required_file::RequiredFile;
use tokio::sync::{Mutex, Notify};

/// Lifecycle of a single file download. `Pending` is the sticky
/// state entered on a CMS `202`; unlike `Failed` it is not terminal, the
/// next collection cycle re-enqueues the file and tries again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Queued,
    Pending,
    Downloading,
    Complete,
    Failed(String),
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Complete | DownloadStatus::Failed(_) | DownloadStatus::Cancelled
        )
    }
}

/// A single in-flight (or completed) download, shared by every caller that
/// enqueued the same URL (idempotent by URL).
pub struct DownloadTask {
    pub file: RequiredFile,
    pub total_bytes: AtomicU64,
    pub downloaded_bytes: AtomicU64,
    status: Mutex<DownloadStatus>,
    done: Notify,
}

impl DownloadTask {
    pub fn new(file: RequiredFile) -> Arc<Self> {
        Arc::new(Self {
            file,
            total_bytes: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
            status: Mutex::new(DownloadStatus::Queued),
            done: Notify::new(),
        })
    }

    pub async fn status(&self) -> DownloadStatus {
        self.status.lock().await.clone()
    }

    pub async fn set_status(&self, status: DownloadStatus) {
        let terminal = status.is_terminal();
        *self.status.lock().await = status;
        // Waiters only wake on terminal states; a `Pending`
        // transition is not itself progress worth waking a waiter for.
        if terminal {
            self.done.notify_waiters();
        }
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Blocks until the task reaches a terminal state.
    pub async fn wait(&self) -> DownloadStatus {
        loop {
            // Register interest before checking status, else a transition
            // to terminal between the check and the `.await` is missed.
            let notified = self.done.notified();
            let current = self.status().await;
            if current.is_terminal() {
                return current;
            }
            notified.await;
        }
    }

    pub fn progress(&self) -> (u64, u64) {
        (
            self.downloaded_bytes.load(Ordering::Relaxed),
            self.total_bytes.load(Ordering::Relaxed),
        )
    }
}
