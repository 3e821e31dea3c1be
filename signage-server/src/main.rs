use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

use signage_config::Config;
use signage_contracts::prelude::RegisterDisplayRequest;
use signage_core::prelude::{
    CacheReadiness, CacheWidgetHtmlProvider, ChunkCache, CollectionOrchestrator, DownloadQueue,
    LayoutRenderer,
};
use signage_core::renderer::dom_sink::recording::RecordingDomSink;

use signage_server::infra::app_state::AppState;
use signage_server::infra::demo_cms::DemoCmsClient;
use signage_server::infra::shutdown;
use signage_server::routes;

/// How long a widget gets to become ready before the renderer falls back to
/// its region's next widget. Not device-class-tuned: it bounds a
/// local readiness check, not network throughput.
const MEDIA_READY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = Arc::new(Config::load()?);
    config.ensure_directories()?;
    info!(host = config.server.host, port = config.server.port, "loaded configuration");
    info!(class = ?config.device.class, "device profile selected");

    let http_client = reqwest::Client::new();

    let cache = Arc::new(
        ChunkCache::new(config.cache_root(), config.device.chunk_size, config.device.blob_lru_budget)
            .with_resource_fetcher(Arc::new(signage_core::chunk_cache::widget_html::ReqwestResourceFetcher::new(
                http_client.clone(),
            ))),
    );

    let queue = Arc::new(DownloadQueue::new(
        http_client.clone(),
        cache.clone(),
        config.device.chunk_size,
        config.device.chunks_per_file,
        config.device.download_concurrency,
    ));

    let readiness = Arc::new(CacheReadiness::new());
    let (renderer_events_tx, renderer_events_rx) = mpsc::unbounded_channel();
    let renderer = Arc::new(LayoutRenderer::new(
        Arc::new(RecordingDomSink::new()),
        readiness.clone(),
        Arc::new(CacheWidgetHtmlProvider),
        MEDIA_READY_TIMEOUT,
        renderer_events_tx,
    ));

    let resource_base_url = format!("http://{}:{}/cache/", config.server.host, config.server.port);

    let cms_base_url = Url::parse(&config.cms.base_url)?;
    let fixture_dir = config.cache_root().join("cms-fixtures");
    let cms = Arc::new(DemoCmsClient::new(
        http_client,
        cms_base_url,
        fixture_dir,
        config.collect_interval.as_secs(),
    ));

    let register_request = RegisterDisplayRequest {
        cms_key: config.cms.cms_key.clone(),
        hardware_key: config.cms.hardware_key.clone(),
        display_name: config.cms.display_name.clone(),
    };

    let orchestrator = CollectionOrchestrator::new(
        cms,
        register_request,
        resource_base_url,
        cache.clone(),
        queue.clone(),
        renderer,
        readiness,
        config.collect_interval,
    );

    tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_forever().await }
    });
    tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.drive_renderer_events(renderer_events_rx).await }
    });

    let state = AppState {
        config: config.clone(),
        cache: cache.clone(),
        queue: queue.clone(),
        orchestrator,
    };
    let app = routes::create_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_signal())
        .await?;

    shutdown::teardown(&cache, &queue).await;
    Ok(())
}
