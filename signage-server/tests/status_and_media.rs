use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use reqwest::Client;
use tower::ServiceExt;

use signage_contracts::error::Result as CmsResult;
use signage_contracts::ids::{LayoutId, MediaId, RegionId};
use signage_contracts::prelude::{
    CmsClient, DisplaySettings, DisplayStatus, RegisterDisplayRequest, RegisterDisplayResponse,
};
use signage_contracts::required_file::RequiredFile;
use signage_contracts::schedule_doc::ScheduleDocument;
use signage_core::prelude::{
    CacheReadiness, CacheWidgetHtmlProvider, ChunkCache, CollectionOrchestrator, DownloadQueue,
    LayoutRenderer,
};
use signage_core::renderer::dom_sink::recording::RecordingDomSink;

use signage_server::infra::app_state::AppState;
use signage_server::routes;

struct EmptyCms;

#[async_trait]
impl CmsClient for EmptyCms {
    async fn register_display(&self, _request: RegisterDisplayRequest) -> CmsResult<RegisterDisplayResponse> {
        Ok(RegisterDisplayResponse {
            status: "ok".to_string(),
            settings: DisplaySettings {
                collect_interval_secs: 300,
            },
        })
    }

    async fn required_files(&self) -> CmsResult<Vec<RequiredFile>> {
        Ok(Vec::new())
    }

    async fn schedule(&self) -> CmsResult<ScheduleDocument> {
        Ok(ScheduleDocument::default())
    }

    async fn get_resource(&self, _layout_id: &LayoutId, _region_id: &RegionId, _media_id: &MediaId) -> CmsResult<String> {
        Ok(String::new())
    }

    async fn submit_status(&self, _status: DisplayStatus) -> CmsResult<()> {
        Ok(())
    }
}

fn build_state(dir: &tempfile::TempDir) -> AppState {
    let config = signage_config::Config {
        server: signage_config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        cms: signage_config::CmsConfig {
            base_url: "http://localhost:9000".to_string(),
            cms_key: String::new(),
            hardware_key: String::new(),
            display_name: "test-display".to_string(),
        },
        cache: signage_config::CacheConfig {
            root: dir.path().to_path_buf(),
        },
        collect_interval: Duration::from_secs(300),
        device: signage_config::DeviceClass::Mid.profile(),
    };

    let cache = Arc::new(ChunkCache::new(dir.path(), 16, 1024 * 1024));
    let queue = Arc::new(DownloadQueue::new(Client::new(), cache.clone(), 16, 4, 0));
    let readiness = Arc::new(CacheReadiness::new());
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let renderer = Arc::new(LayoutRenderer::new(
        Arc::new(RecordingDomSink::new()),
        readiness.clone(),
        Arc::new(CacheWidgetHtmlProvider),
        Duration::from_millis(10),
        tx,
    ));
    let orchestrator = CollectionOrchestrator::new(
        Arc::new(EmptyCms),
        RegisterDisplayRequest {
            cms_key: String::new(),
            hardware_key: String::new(),
            display_name: "test-display".to_string(),
        },
        "https://cache.local/".to_string(),
        cache.clone(),
        queue.clone(),
        renderer,
        readiness,
        Duration::from_secs(300),
    );

    AppState {
        config: Arc::new(config),
        cache,
        queue,
        orchestrator,
    }
}

#[tokio::test]
async fn status_route_reports_empty_state_before_any_collection() {
    let dir = tempfile::tempdir().unwrap();
    let app = routes::create_app(build_state(&dir));

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(json["current_layout_id"].is_null());
    assert!(json["pending_layout_id"].is_null());
    assert_eq!(json["queue"]["queued"], 0);
}

#[tokio::test]
async fn cache_route_returns_404_for_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let app = routes::create_app(build_state(&dir));

    let response = app
        .oneshot(Request::builder().uri("/cache/media/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cache_route_serves_whole_file_then_satisfies_a_range() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(&dir);
    state
        .cache
        .put("media/m1", bytes::Bytes::from_static(b"hello world"), "text/plain", None)
        .await
        .unwrap();
    let app = routes::create_app(state);

    let whole = app
        .clone()
        .oneshot(Request::builder().uri("/cache/m1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(whole.status(), StatusCode::OK);

    let ranged = app
        .oneshot(
            Request::builder()
                .uri("/cache/m1")
                .header("Range", "bytes=0-4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    let bytes = body::to_bytes(ranged.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello");
}
