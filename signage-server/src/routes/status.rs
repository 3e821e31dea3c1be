use axum::Json;
use axum::extract::State;
use serde::Serialize;

use signage_contracts::ids::LayoutId;
use signage_core::prelude::QueueProgress;

use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub current_layout_id: Option<LayoutId>,
    pub pending_layout_id: Option<LayoutId>,
    pub blacklisted_layout_ids: Vec<LayoutId>,
    pub queue: QueueSummary,
    pub cache_bytes_in_use: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueSummary {
    pub queued: usize,
    pub downloading: usize,
    pub complete: usize,
    pub failed: usize,
    pub pending: usize,
}

impl From<QueueProgress> for QueueSummary {
    fn from(progress: QueueProgress) -> Self {
        Self {
            queued: progress.queued,
            downloading: progress.downloading,
            complete: progress.complete,
            failed: progress.failed,
            pending: progress.pending,
        }
    }
}

/// `GET /status`: current/pending layout, queue depth and cache occupancy,
/// for an operator dashboard or health check polling this display.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.orchestrator.status_snapshot().await;
    Json(StatusResponse {
        current_layout_id: snapshot.current_layout_id,
        pending_layout_id: snapshot.pending_layout_id,
        blacklisted_layout_ids: snapshot.blacklisted_layout_ids,
        queue: snapshot.queue.into(),
        cache_bytes_in_use: snapshot.cache_bytes_in_use,
    })
}
