//! Drives the periodic collect → reconcile → present cycle and mediates
//! every other component. This is the only place that holds
//! `currentLayoutId`/`pendingLayoutId` and the only place permitted to
//! mutate them.

pub mod readiness;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use signage_contracts::command::LiveCommand;
use signage_contracts::error::CmsError;
use signage_contracts::ids::{FileId, LayoutId, MediaId};
use signage_contracts::prelude::{CmsClient, DisplayStatus, RegisterDisplayRequest};
use signage_contracts::required_file::{FileKind, RequiredFile};
use signage_contracts::schedule_doc::{ScheduleDocument, ScheduleEntry, ScheduleEntryKind};

use crate::chunk_cache::ChunkCache;
use crate::download_queue::{DownloadQueue, DownloadStatus, QueueProgress};
use crate::error::OrchestratorResult;
use crate::renderer::{LayoutRenderer, RendererEvent};
use crate::schedule::{self, ResolverContext};

pub use readiness::{CacheReadiness, CacheWidgetHtmlProvider};

const MAX_CONSECUTIVE_FAILURES: u32 = 3;
const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// The CMS-file id and a layout/media id are the same identifier under
/// different typed roles: a layout's `RequiredFile.id` is also its
/// `LayoutId`, and a widget's `mediaId` is also the `FileId` of the media
/// `RequiredFile` it points at. Converting between the two newtypes is
/// just a relabel, never a lookup.
fn file_id_of_layout(layout_id: &LayoutId) -> FileId {
    FileId::new(layout_id.as_str())
}

fn file_id_of_media(media_id: &MediaId) -> FileId {
    FileId::new(media_id.as_str())
}

fn media_cache_key(media_id: &MediaId) -> String {
    format!("media/{media_id}")
}

fn layout_cache_key(layout_id: &LayoutId) -> String {
    format!("media/{layout_id}")
}

struct SessionOverride {
    layout_id: LayoutId,
}

/// Read-only snapshot for a status/health surface; holds no
/// reference to orchestrator state so it can outlive the lock guards it
/// was built from.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub current_layout_id: Option<LayoutId>,
    pub pending_layout_id: Option<LayoutId>,
    pub blacklisted_layout_ids: Vec<LayoutId>,
    pub queue: QueueProgress,
    pub cache_bytes_in_use: u64,
}

pub struct CollectionOrchestrator {
    cms: Arc<dyn CmsClient>,
    register_request: RegisterDisplayRequest,
    resource_base_url: String,
    cache: Arc<ChunkCache>,
    queue: Arc<DownloadQueue>,
    renderer: Arc<LayoutRenderer>,
    readiness: Arc<CacheReadiness>,

    current_layout_id: Mutex<Option<LayoutId>>,
    pending_layout_id: Mutex<Option<LayoutId>>,
    last_attempted_layout: Mutex<Option<LayoutId>>,
    known_layout_ids: Mutex<HashSet<LayoutId>>,
    overlay_renderers: DashMap<LayoutId, Arc<LayoutRenderer>>,
    session_override: Mutex<Option<SessionOverride>>,

    blacklisted: DashMap<LayoutId, ()>,
    consecutive_failures: DashMap<LayoutId, u32>,

    collect_interval: Mutex<Duration>,
    in_collection: AtomicBool,
    rerun_requested: AtomicBool,
    cms_backoff_failures: AtomicU32,
    registered: AtomicBool,
}

impl CollectionOrchestrator {
    pub fn new(
        cms: Arc<dyn CmsClient>,
        register_request: RegisterDisplayRequest,
        resource_base_url: String,
        cache: Arc<ChunkCache>,
        queue: Arc<DownloadQueue>,
        renderer: Arc<LayoutRenderer>,
        readiness: Arc<CacheReadiness>,
        default_collect_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            cms,
            register_request,
            resource_base_url,
            cache,
            queue,
            renderer,
            readiness,
            current_layout_id: Mutex::new(None),
            pending_layout_id: Mutex::new(None),
            last_attempted_layout: Mutex::new(None),
            known_layout_ids: Mutex::new(HashSet::new()),
            overlay_renderers: DashMap::new(),
            session_override: Mutex::new(None),
            blacklisted: DashMap::new(),
            consecutive_failures: DashMap::new(),
            collect_interval: Mutex::new(default_collect_interval),
            in_collection: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            cms_backoff_failures: AtomicU32::new(0),
            registered: AtomicBool::new(false),
        })
    }

    /// Registers with the CMS (first cycle, or after a `rekey` command)
    /// and adopts the `collectInterval` it returns.
    pub async fn register(&self) -> OrchestratorResult<()> {
        let response = self
            .cms
            .register_display(self.register_request.clone())
            .await?;
        *self.collect_interval.lock().await =
            Duration::from_secs(response.settings.collect_interval_secs);
        self.registered.store(true, Ordering::Release);
        info!(status = response.status, "registered with CMS");
        Ok(())
    }

    /// Runs collection on a timer forever. Registers first if this is the
    /// first call. Each tick's own failures never abort the loop; they're
    /// handled entirely inside `collect`.
    pub async fn run_forever(self: &Arc<Self>) {
        if !self.registered.load(Ordering::Acquire) {
            if let Err(e) = self.register().await {
                warn!(error = %e, "initial registration failed; proceeding to collect anyway, retries happen via backoff");
            }
        }
        loop {
            self.collect().await;
            let delay = self.next_delay().await;
            tokio::time::sleep(delay).await;
        }
    }

    async fn next_delay(&self) -> Duration {
        let failures = self.cms_backoff_failures.load(Ordering::Acquire);
        if failures == 0 {
            return *self.collect_interval.lock().await;
        }
        let backoff = MIN_BACKOFF.saturating_mul(1 << failures.min(10));
        backoff.min(MAX_BACKOFF)
    }

    /// Reentrancy-guarded entry point: a concurrent call while one is
    /// already running is coalesced into a single extra pass rather than
    /// stacking.
    pub async fn collect(self: &Arc<Self>) {
        if self
            .in_collection
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.rerun_requested.store(true, Ordering::Release);
            return;
        }

        loop {
            self.rerun_requested.store(false, Ordering::Release);
            self.run_cycle().await;
            if !self.rerun_requested.load(Ordering::Acquire) {
                break;
            }
        }
        self.in_collection.store(false, Ordering::Release);
    }

    async fn run_cycle(self: &Arc<Self>) {
        let required_files = match self.cms.required_files().await {
            Ok(files) => files,
            Err(e) => {
                self.on_cms_unreachable(&e);
                return;
            }
        };
        self.reconcile_files(required_files).await;

        let schedule = match self.cms.schedule().await {
            Ok(document) => document,
            Err(e) => {
                self.on_cms_unreachable(&e);
                return;
            }
        };
        self.cms_backoff_failures.store(0, Ordering::Release);

        let document = self.apply_session_override(schedule).await;
        let ctx = ResolverContext {
            now: chrono::Local::now(),
            location: None,
            criteria_context: Default::default(),
        };
        let resolved = schedule::resolve(&document, &ctx);

        self.present_main(&resolved.main_layouts).await;
        self.present_overlays(&resolved.overlays).await;
        self.evict_orphans(&resolved.main_layouts, &resolved.overlays).await;
        self.submit_status().await;
    }

    fn on_cms_unreachable(&self, error: &CmsError) {
        warn!(error = %error, "CMS unreachable this cycle; keeping current layout on screen");
        self.cms_backoff_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Diff required files against the cache, enqueue what's
    /// missing or changed, drop what the CMS marked for purge. Every
    /// enqueue is paired with a watcher (`enqueue_and_watch`) so a file
    /// landing feeds straight into `handle_media_cached` instead of
    /// waiting for the next collection cycle to notice.
    async fn reconcile_files(self: &Arc<Self>, required_files: Vec<RequiredFile>) {
        for file in required_files {
            if file.purge {
                let key = file.cache_key();
                if let Err(e) = self.cache.evict(&key).await {
                    warn!(key, error = %e, "failed to purge file");
                }
                continue;
            }

            let key = file.cache_key();
            let existence = match self.cache.file_exists(&key).await {
                Ok(existence) => existence,
                Err(e) => {
                    warn!(key, error = %e, "fileExists check failed; enqueueing to be safe");
                    self.enqueue_and_watch(file).await;
                    continue;
                }
            };

            let up_to_date = existence
                .metadata
                .as_ref()
                .and_then(|m| m.fingerprint.as_ref())
                .map(|fp| fp == &file.fingerprint)
                .unwrap_or(false);

            if !existence.exists || !up_to_date {
                self.enqueue_and_watch(file).await;
            }
        }
    }

    /// Enqueues a file and spawns a watcher that calls
    /// `handle_media_cached` once the download reaches a terminal state.
    /// This is what actually drives `media-cached` rechecks of a held
    /// `pendingLayoutId` in the running system, rather than only the
    /// `handle_media_cached` call a test can make directly.
    async fn enqueue_and_watch(self: &Arc<Self>, file: RequiredFile) {
        let kind = file.kind;
        let file_id = file.id.clone();
        let cache_key = file.cache_key();
        let task = self.queue.enqueue(file).await;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if task.wait().await == DownloadStatus::Complete {
                orchestrator
                    .handle_media_cached(file_id, kind, format!("/cache/{cache_key}"))
                    .await;
            }
        });
    }

    async fn apply_session_override(&self, mut document: ScheduleDocument) -> ScheduleDocument {
        if let Some(session) = self.session_override.lock().await.as_ref() {
            document.entries.insert(
                0,
                ScheduleEntry {
                    id: signage_contracts::ids::ScheduleEntryId::new("session-override"),
                    priority: i32::MAX,
                    window: None,
                    geo_fence: None,
                    criteria: None,
                    kind: ScheduleEntryKind::Layout {
                        layout_id: session.layout_id.clone(),
                    },
                },
            );
        }
        document
    }

    /// Pick the first non-blacklisted candidate, prepare its
    /// widget HTML and media priority, and either render it or hold it as
    /// `pendingLayoutId` until its first widgets are cached.
    async fn present_main(self: &Arc<Self>, candidates: &[LayoutId]) {
        let Some(layout_id) = candidates.iter().find(|id| !self.blacklisted.contains_key(*id)).cloned() else {
            return;
        };

        {
            let mut known = self.known_layout_ids.lock().await;
            known.insert(layout_id.clone());
        }

        self.queue
            .prioritize(FileKind::Layout, &file_id_of_layout(&layout_id))
            .await;

        *self.last_attempted_layout.lock().await = Some(layout_id.clone());
        self.try_present_layout(layout_id).await;
    }

    /// Shared by the main collection cycle and by `media-cached` re-checks
    /// of a held `pendingLayoutId`.
    async fn try_present_layout(self: &Arc<Self>, layout_id: LayoutId) {
        let key = layout_cache_key(&layout_id);
        let Some((xlf_bytes, _content_type)) = self.cache.get(&key).await.unwrap_or(None) else {
            // Layout XLF itself isn't cached yet; nothing to parse, so it
            // can only become the pending layout.
            *self.pending_layout_id.lock().await = Some(layout_id);
            return;
        };
        let xlf_xml = match std::str::from_utf8(&xlf_bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(%layout_id, error = %e, "layout XLF is not valid UTF-8");
                self.blacklist(layout_id).await;
                return;
            }
        };
        let parsed = match crate::renderer::parse_xlf(xlf_xml, layout_id.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%layout_id, error = %e, "layout XLF failed to parse");
                self.blacklist(layout_id).await;
                return;
            }
        };

        self.prepare_widget_html(&parsed).await;
        for region in &parsed.regions {
            for widget in &region.widgets {
                if let Some(media_id) = &widget.media_id {
                    self.cache.add_dependant(media_id.clone(), layout_id.clone());
                    self.queue
                        .prioritize(FileKind::Media, &file_id_of_media(media_id))
                        .await;
                }
            }
        }

        let ready = parsed.regions.iter().all(|region| {
            region
                .widgets
                .first()
                .and_then(|w| w.media_id.as_ref())
                .map(|media_id| self.readiness.is_ready(media_id))
                .unwrap_or(true)
        });

        if !ready {
            *self.pending_layout_id.lock().await = Some(layout_id);
            return;
        }

        if let Err(e) = self.renderer.render_layout(xlf_xml, layout_id.clone()).await {
            warn!(%layout_id, error = %e, "render_layout failed");
            self.blacklist(layout_id).await;
        }
    }

    async fn prepare_widget_html(&self, layout: &crate::renderer::XlfLayout) {
        for region in &layout.regions {
            for widget in &region.widgets {
                if !widget.kind.is_html_widget() {
                    continue;
                }
                let Some(media_id) = &widget.media_id else { continue };
                let key = readiness::widget_resource_key(&layout.id, &region.id, media_id);
                if self.cache.file_exists(&key).await.map(|e| e.exists).unwrap_or(false) {
                    continue;
                }
                match self.cms.get_resource(&layout.id, &region.id, media_id).await {
                    Ok(html) => {
                        if let Err(e) = self
                            .cache
                            .store_widget_html(&key, &html, &self.resource_base_url)
                            .await
                        {
                            warn!(key, error = %e, "failed to cache widget HTML");
                        }
                    }
                    Err(e) => warn!(key, error = %e, "get_resource failed for html widget"),
                }
            }
        }
    }

    async fn blacklist(self: &Arc<Self>, layout_id: LayoutId) {
        let failures = {
            let mut entry = self.consecutive_failures.entry(layout_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if failures >= MAX_CONSECUTIVE_FAILURES {
            warn!(%layout_id, failures, "blacklisting layout for this session");
            self.blacklisted.insert(layout_id, ());
        }
    }

    /// Diff the resolved overlay set against what's rendered,
    /// starting new ones and stopping ones no longer selected. Each overlay
    /// gets its own renderer instance since it plays on its own z-layer,
    /// independent of the main layout's lifecycle.
    async fn present_overlays(self: &Arc<Self>, overlays: &[LayoutId]) {
        let wanted: HashSet<LayoutId> = overlays.iter().cloned().collect();

        let stale: Vec<LayoutId> = self
            .overlay_renderers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| !wanted.contains(id))
            .collect();
        for id in stale {
            if let Some((_, renderer)) = self.overlay_renderers.remove(&id) {
                renderer.stop().await;
            }
        }

        for layout_id in overlays {
            if self.overlay_renderers.contains_key(layout_id) {
                continue;
            }
            {
                let mut known = self.known_layout_ids.lock().await;
                known.insert(layout_id.clone());
            }
            let key = layout_cache_key(layout_id);
            let Some((xlf_bytes, _)) = self.cache.get(&key).await.unwrap_or(None) else {
                debug!(%layout_id, "overlay layout not cached yet, will retry next cycle");
                continue;
            };
            let Ok(xlf_xml) = std::str::from_utf8(&xlf_bytes) else { continue };

            let (overlay_renderer, mut overlay_events) = self.renderer.clone_for_overlay();
            tokio::spawn(async move {
                // Overlays re-resolve every collection cycle rather than
                // reacting to their own layoutEnd/mediaError; draining
                // keeps the channel from backing up.
                while overlay_events.recv().await.is_some() {}
            });
            if overlay_renderer.render_layout(xlf_xml, layout_id.clone()).await.is_ok() {
                self.overlay_renderers.insert(layout_id.clone(), overlay_renderer);
            }
        }
    }

    /// Any layout no longer part of the resolved main+overlay
    /// set has its dependants dropped, orphaning media that nothing else
    /// still reaches; that media is evicted immediately.
    async fn evict_orphans(&self, main: &[LayoutId], overlays: &[LayoutId]) {
        let still_referenced: HashSet<LayoutId> = main.iter().chain(overlays.iter()).cloned().collect();
        let removed: Vec<LayoutId> = {
            let mut known = self.known_layout_ids.lock().await;
            let removed = known.difference(&still_referenced).cloned().collect::<Vec<_>>();
            known.retain(|id| still_referenced.contains(id));
            removed
        };

        for layout_id in removed {
            let orphaned = self.cache.remove_layout_dependants(&layout_id);
            for media_id in orphaned {
                let key = media_cache_key(&media_id);
                if let Err(e) = self.cache.evict(&key).await {
                    warn!(key, error = %e, "failed to evict orphaned media");
                }
                self.readiness.mark_unready(&media_id);
            }
        }
    }

    async fn submit_status(&self) {
        let status = DisplayStatus {
            current_layout_id: self.current_layout_id.lock().await.clone(),
            pending_layout_id: self.pending_layout_id.lock().await.clone(),
            blacklisted_layout_ids: self.blacklisted.iter().map(|e| e.key().clone()).collect(),
            message: None,
        };
        if let Err(e) = self.cms.submit_status(status).await {
            debug!(error = %e, "submit_status failed, non-fatal");
        }
    }

    /// Assembles a point-in-time view for a status/health endpoint.
    /// Read-only: unlike `submit_status`, never talks to the CMS.
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            current_layout_id: self.current_layout_id.lock().await.clone(),
            pending_layout_id: self.pending_layout_id.lock().await.clone(),
            blacklisted_layout_ids: self.blacklisted.iter().map(|e| e.key().clone()).collect(),
            queue: self.queue.get_progress().await,
            cache_bytes_in_use: self.cache.blob_cache_bytes_in_use().await,
        }
    }

    /// Re-checks a held `pendingLayoutId` after a file becomes cached.
    async fn try_promote_pending(self: &Arc<Self>) {
        let Some(layout_id) = self.pending_layout_id.lock().await.clone() else {
            return;
        };
        self.try_present_layout(layout_id).await;
    }

    pub async fn handle_renderer_event(self: &Arc<Self>, event: RendererEvent) {
        match event {
            RendererEvent::LayoutStart(id) => {
                let mut current = self.current_layout_id.lock().await;
                *current = Some(id.clone());
                let mut pending = self.pending_layout_id.lock().await;
                if pending.as_ref() == Some(&id) {
                    *pending = None;
                }
                self.consecutive_failures.remove(&id);
            }
            RendererEvent::LayoutEnd(id) => {
                let mut current = self.current_layout_id.lock().await;
                if current.as_ref() == Some(&id) {
                    *current = None;
                }
                drop(current);
                self.collect().await;
            }
            RendererEvent::MediaError { reason, .. } => {
                if let Some(layout_id) = self.last_attempted_layout.lock().await.clone() {
                    warn!(%layout_id, reason, "mediaError; layout cannot render");
                    self.blacklist(layout_id).await;
                    self.collect().await;
                }
            }
            RendererEvent::PendingLayout(id) => {
                *self.pending_layout_id.lock().await = Some(id);
            }
        }
    }

    pub async fn handle_media_cached(self: &Arc<Self>, file_id: FileId, kind: FileKind, url: String) {
        if kind == FileKind::Media {
            self.readiness.mark_ready(MediaId::new(file_id.as_str()), url);
            self.try_promote_pending().await;
        }
    }

    pub async fn handle_command(self: &Arc<Self>, command: LiveCommand) {
        match command {
            LiveCommand::CollectNow | LiveCommand::DataUpdate => self.collect().await,
            LiveCommand::ChangeLayout { layout_id } => {
                *self.session_override.lock().await = Some(SessionOverride { layout_id });
                self.collect().await;
            }
            LiveCommand::OverlayLayout { layout_id } => {
                debug!(%layout_id, "overlay-layout command: letting the next schedule resolution pick it up");
                self.collect().await;
            }
            LiveCommand::RevertToSchedule => {
                *self.session_override.lock().await = None;
                self.collect().await;
            }
            LiveCommand::PurgeAll => {
                if let Err(e) = self.cache.clear().await {
                    warn!(error = %e, "cache.clear() failed during purgeAll");
                }
                self.queue.clear().await;
                self.readiness.clear();
                self.blacklisted.clear();
                self.consecutive_failures.clear();
                *self.current_layout_id.lock().await = None;
                *self.pending_layout_id.lock().await = None;
                self.known_layout_ids.lock().await.clear();
                self.collect().await;
            }
            LiveCommand::Rekey => {
                self.registered.store(false, Ordering::Release);
                if let Err(e) = self.register().await {
                    warn!(error = %e, "re-registration failed after rekey command");
                }
                self.collect().await;
            }
            LiveCommand::Screenshot => {
                debug!("screenshot command received; capture is the transport layer's concern");
            }
        }
    }

    /// Drains a live-command channel until it closes, dispatching each
    /// command in turn. Intended to be spawned as its own task alongside
    /// `run_forever`.
    pub async fn drive_commands(
        self: Arc<Self>,
        mut commands: Box<dyn signage_contracts::prelude::LiveCommandSource>,
    ) {
        while let Some(command) = commands.recv().await {
            self.handle_command(command).await;
        }
    }

    /// Drains the renderer's event channel until it closes. Intended to be
    /// spawned as its own task alongside `run_forever`.
    pub async fn drive_renderer_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RendererEvent>,
    ) {
        while let Some(event) = events.recv().await {
            self.handle_renderer_event(event).await;
        }
    }
}
