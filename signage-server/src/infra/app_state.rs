use std::fmt;
use std::sync::Arc;

use signage_config::Config;
use signage_core::prelude::{ChunkCache, CollectionOrchestrator, DownloadQueue};

/// Shared handles every route needs. Cloning is cheap: every field is
/// either an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<ChunkCache>,
    pub queue: Arc<DownloadQueue>,
    pub orchestrator: Arc<CollectionOrchestrator>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
