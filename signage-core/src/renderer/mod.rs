//! XLF layout rendering: builds a region/widget DOM through a
//! `DomSink`, reuses it across replays of the same layout, gates layout
//! start on first-widget media readiness, and owns blob-URL lifetime per
//! layout.

pub mod active_layout;
pub mod dom_sink;
pub mod xlf;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use signage_contracts::ids::{LayoutId, MediaId, RegionId, WidgetId};

use crate::error::RenderResult;

pub use active_layout::{ActiveLayout, LayoutPhase};
pub use dom_sink::{DomSink, TransitionPhase};
pub use xlf::{parse_xlf, WidgetKind, XlfLayout, XlfRegion, XlfWidget};

/// Resolves whether a media file is cached yet, and its playable URL
/// (blob, cache-scheme, or absolute CMS URL for streaming) once it is.
pub trait MediaReadiness: Send + Sync {
    fn is_ready(&self, media_id: &MediaId) -> bool;
    fn url_for(&self, media_id: &MediaId) -> Option<String>;
}

/// Produces the cache key a CMS-rendered widget's HTML is stored under,
/// for pointing an `<iframe>` at it.
pub trait WidgetHtmlProvider: Send + Sync {
    fn widget_html_key(&self, layout_id: &LayoutId, region_id: &RegionId, media_id: &MediaId) -> String;
}

#[derive(Debug, Clone)]
pub enum RendererEvent {
    LayoutStart(LayoutId),
    LayoutEnd(LayoutId),
    MediaError {
        region_id: RegionId,
        widget_id: WidgetId,
        reason: String,
    },
    /// Emitted when a widget needed to start the layout is not yet cached;
    /// the orchestrator is expected to pin this layout as pending.
    PendingLayout(LayoutId),
}

pub struct LayoutRenderer {
    sink: Arc<dyn DomSink>,
    media: Arc<dyn MediaReadiness>,
    html: Arc<dyn WidgetHtmlProvider>,
    media_ready_timeout: Duration,
    active: Mutex<Option<ActiveLayout>>,
    epoch: AtomicU64,
    events: mpsc::UnboundedSender<RendererEvent>,
}

impl LayoutRenderer {
    pub fn new(
        sink: Arc<dyn DomSink>,
        media: Arc<dyn MediaReadiness>,
        html: Arc<dyn WidgetHtmlProvider>,
        media_ready_timeout: Duration,
        events: mpsc::UnboundedSender<RendererEvent>,
    ) -> Self {
        Self {
            sink,
            media,
            html,
            media_ready_timeout,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
            events,
        }
    }

    fn emit(&self, event: RendererEvent) {
        let _ = self.events.send(event);
    }

    /// Builds a second, independent renderer sharing this one's DOM sink,
    /// media readiness and widget-HTML provider, for an overlay layout
    /// that plays on its own z-layer with its own lifecycle.
    /// Its events are not wired to anything by default; a caller that
    /// cares about an overlay's events should drain the returned receiver.
    pub fn clone_for_overlay(self: &Arc<Self>) -> (Arc<LayoutRenderer>, mpsc::UnboundedReceiver<RendererEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let overlay = Arc::new(LayoutRenderer::new(
            self.sink.clone(),
            self.media.clone(),
            self.html.clone(),
            self.media_ready_timeout,
            tx,
        ));
        (overlay, rx)
    }

    /// Renders `layout_id`. Replays in place without DOM teardown when
    /// `layout_id` matches the currently active layout; otherwise clears the
    /// previous layout's regions and builds fresh. The previous layout's
    /// blob URLs outlive the clear: they are only revoked once the new
    /// layout has actually emitted `LayoutStart`, from inside
    /// `start_or_resume`, so a widget mid-transition never loses its source
    /// out from under it.
    pub async fn render_layout(self: &Arc<Self>, xlf_xml: &str, layout_id: LayoutId) -> RenderResult<()> {
        let parsed = xlf::parse_xlf(xlf_xml, layout_id.clone())?;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let mut guard = self.active.lock().await;
        let is_replay = guard.as_ref().map(|a| a.id() == &layout_id).unwrap_or(false);

        let mut blobs_to_revoke = None;
        if is_replay {
            let active = guard.as_mut().expect("checked above");
            active.reset_for_replay(parsed, epoch);
            self.restart_media_elements(active);
        } else {
            if let Some(previous) = guard.take() {
                blobs_to_revoke = Some(previous.owned_blob_urls.clone());
                self.clear_regions(&previous);
            }
            let active = ActiveLayout::new(parsed, epoch);
            self.build_scaffold(&active);
            *guard = Some(active);
        }
        drop(guard);

        self.start_or_resume(layout_id, epoch, blobs_to_revoke).await;
        Ok(())
    }

    /// Tears down whatever layout is currently active without replacing it.
    /// Used by the orchestrator to stop an overlay that the resolver no
    /// longer selects. There is no new layout to wait a `LayoutStart` on,
    /// so the blob URLs are revoked immediately.
    pub async fn stop(&self) {
        let mut guard = self.active.lock().await;
        if let Some(previous) = guard.take() {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.clear_regions(&previous);
            for url in &previous.owned_blob_urls {
                self.sink.revoke_blob_url(url);
            }
        }
    }

    /// Runs each region's out-transition for whatever widget is currently
    /// showing, then clears the region. Leaves blob-URL revocation to the
    /// caller.
    fn clear_regions(&self, previous: &ActiveLayout) {
        for (region_index, region) in previous.xlf.regions.iter().enumerate() {
            let widget_index = previous.region_cursors[region_index].widget_index;
            if let Some(widget) = region.widgets.get(widget_index) {
                self.run_phase_transition(widget, TransitionPhase::Out);
            }
            self.sink.clear_region(&region.id);
        }
    }

    /// Runs a widget's parsed in/out transition, if it declared one for
    /// that phase. A widget with no matching `<transitions>` entry just
    /// shows/hides with no animation.
    fn run_phase_transition(&self, widget: &XlfWidget, phase: TransitionPhase) {
        let Some(transition) = (match phase {
            TransitionPhase::In => widget.in_transition(),
            TransitionPhase::Out => widget.out_transition(),
        }) else {
            return;
        };
        let direction = match transition.kind {
            xlf::TransitionKind::FlyIn(d) | xlf::TransitionKind::FlyOut(d) => Some(d),
            _ => None,
        };
        self.sink
            .run_transition(&widget.id, phase, transition.kind, direction, transition.duration_ms);
    }

    fn build_scaffold(&self, active: &ActiveLayout) {
        for region in &active.xlf.regions {
            self.sink
                .ensure_region(&region.id, region.x, region.y, region.width, region.height);
            for widget in &region.widgets {
                self.sink.create_widget(&region.id, &widget.id, widget.kind.clone());
            }
        }
    }

    fn restart_media_elements(&self, active: &ActiveLayout) {
        for region in &active.xlf.regions {
            for widget in &region.widgets {
                if widget.kind.is_media_element() {
                    self.sink.restart_media(&widget.id);
                }
            }
        }
    }

    /// Media-ready gating: waits for every region's first widget to
    /// become loadable before starting the authoritative layout timer. A
    /// widget still not ready after `media_ready_timeout` falls back to
    /// its region's next widget; a region with no startable widget emits
    /// `mediaError` and leaves the layout in `preparing`.
    async fn start_or_resume(self: &Arc<Self>, layout_id: LayoutId, epoch: u64, blobs_to_revoke: Option<HashSet<String>>) {
        // Superseding/failing to start this layout still has to release
        // the previous one's blobs eventually, since no later `LayoutStart`
        // for this attempt will ever fire to trigger it.
        let revoke_stale_blobs = || {
            if let Some(urls) = &blobs_to_revoke {
                for url in urls {
                    self.sink.revoke_blob_url(url);
                }
            }
        };

        let region_count = {
            let guard = self.active.lock().await;
            guard.as_ref().map(|a| a.xlf.regions.len()).unwrap_or(0)
        };

        let mut any_region_ready = false;
        for region_index in 0..region_count {
            if self.epoch.load(Ordering::Acquire) != epoch {
                revoke_stale_blobs();
                return; // superseded while we were waiting
            }
            if self.wait_region_start_ready(region_index, epoch).await {
                any_region_ready = true;
            }
        }

        if !any_region_ready {
            revoke_stale_blobs();
            return; // mediaError already emitted per region
        }

        let mut guard = self.active.lock().await;
        let Some(active) = guard.as_mut() else {
            revoke_stale_blobs();
            return;
        };
        if active.epoch != epoch {
            revoke_stale_blobs();
            return;
        }
        active.phase = LayoutPhase::Playing;
        let layout_duration = active.xlf.duration_ms;
        let mut started_widgets = Vec::with_capacity(active.xlf.regions.len());
        for region_index in 0..active.xlf.regions.len() {
            let widget_index = active.region_cursors[region_index].widget_index;
            let widget = active.xlf.regions[region_index].widgets[widget_index].clone();
            let region_id = active.region_id(region_index).clone();
            self.sink.show_widget(&region_id, &widget.id);
            started_widgets.push(widget);
        }
        drop(guard);

        self.emit(RendererEvent::LayoutStart(layout_id.clone()));
        revoke_stale_blobs();
        for widget in &started_widgets {
            self.run_phase_transition(widget, TransitionPhase::In);
        }

        let renderer = self.clone();
        tokio::spawn(async move {
            renderer.drive_regions(layout_id.clone(), epoch).await;
        });

        if let Some(duration_ms) = layout_duration {
            let renderer = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
                if renderer.epoch.load(Ordering::Acquire) == epoch {
                    renderer.emit(RendererEvent::LayoutEnd(layout_id));
                }
            });
        }
    }

    /// Returns `true` once the region's starting widget is ready to play
    /// (immediately, or after a fallback to a widget that is).
    async fn wait_region_start_ready(self: &Arc<Self>, region_index: usize, epoch: u64) -> bool {
        let (region_id, widget_count) = {
            let guard = self.active.lock().await;
            let Some(active) = guard.as_ref() else { return false };
            (active.region_id(region_index).clone(), active.xlf.regions[region_index].widgets.len())
        };

        for attempt in 0..widget_count.max(1) {
            let widget_index = {
                let guard = self.active.lock().await;
                let Some(active) = guard.as_ref() else { return false };
                (active.region_cursors[region_index].widget_index + attempt) % widget_count.max(1)
            };

            let widget = {
                let guard = self.active.lock().await;
                let Some(active) = guard.as_ref() else { return false };
                active.xlf.regions[region_index].widgets[widget_index].clone()
            };

            if self.widget_is_ready(&widget) {
                let mut guard = self.active.lock().await;
                if let Some(active) = guard.as_mut() {
                    active.region_cursors[region_index].widget_index = widget_index;
                }
                return true;
            }

            if widget.media_id.is_some() {
                self.emit(RendererEvent::PendingLayout({
                    let guard = self.active.lock().await;
                    guard.as_ref().map(|a| a.id().clone()).unwrap_or_else(|| LayoutId::new(""))
                }));
            }

            tokio::time::sleep(self.media_ready_timeout).await;
            if self.epoch.load(Ordering::Acquire) != epoch {
                return false;
            }
        }

        self.emit(RendererEvent::MediaError {
            region_id: region_id.clone(),
            widget_id: WidgetId::new("unknown"),
            reason: "no widget in region became ready before timeout".to_string(),
        });
        false
    }

    fn widget_is_ready(&self, widget: &XlfWidget) -> bool {
        match &widget.media_id {
            Some(media_id) => self.media.is_ready(media_id),
            // HTML-backed widgets (ticker/webpage/clock/weather/calendar)
            // are considered ready as soon as their cache key resolves;
            // the iframe `load` event is a DOM-layer detail outside this
            // trait's surface.
            None => true,
        }
    }

    async fn drive_regions(self: Arc<Self>, layout_id: LayoutId, epoch: u64) {
        let region_count = {
            let guard = self.active.lock().await;
            guard.as_ref().map(|a| a.xlf.regions.len()).unwrap_or(0)
        };

        let handles: Vec<_> = (0..region_count)
            .map(|region_index| {
                let renderer = self.clone();
                let layout_id = layout_id.clone();
                tokio::spawn(async move { renderer.drive_region(layout_id, region_index, epoch).await })
            })
            .collect();

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn drive_region(self: Arc<Self>, _layout_id: LayoutId, region_index: usize, epoch: u64) {
        loop {
            let (region_id, widget, use_duration) = {
                let guard = self.active.lock().await;
                let Some(active) = guard.as_ref() else { return };
                if active.epoch != epoch {
                    return;
                }
                let widget_index = active.region_cursors[region_index].widget_index;
                let widget = active.xlf.regions[region_index].widgets[widget_index].clone();
                (active.region_id(region_index).clone(), widget, widget.use_duration)
            };

            if !use_duration || widget.duration_ms == 0 {
                // No duration-based advance available without a real media
                // element signalling "ended"; this region holds here until
                // superseded by a replay or layout change.
                return;
            }

            tokio::time::sleep(Duration::from_millis(widget.duration_ms as u64)).await;

            let mut guard = self.active.lock().await;
            let Some(active) = guard.as_mut() else { return };
            if active.epoch != epoch {
                return;
            }

            self.sink.hide_widget(&region_id, &widget.id);
            self.run_phase_transition(&widget, TransitionPhase::Out);
            let next_index = active.advance_region(region_index);
            if next_index == active.region_cursors[region_index].widget_index && widget.id == active.xlf.regions[region_index].widgets[next_index].id {
                // single, non-looping widget: stays visible
                self.sink.show_widget(&region_id, &widget.id);
                self.run_phase_transition(&widget, TransitionPhase::In);
                return;
            }
            let next_widget = active.xlf.regions[region_index].widgets[next_index].clone();
            drop(guard);
            self.sink.show_widget(&region_id, &next_widget.id);
            self.run_phase_transition(&next_widget, TransitionPhase::In);
        }
    }

    /// Resolves a widget's playable source and, for media, wraps raw bytes
    /// in a renderer-owned blob URL so the per-layout ownership invariant
    /// holds. Widget callbacks must go through this rather than
    /// create blob URLs themselves.
    pub async fn resolve_widget_source(&self, layout_id: &LayoutId, region_id: &RegionId, widget: &XlfWidget) -> Option<String> {
        let media_id = widget.media_id.as_ref()?;
        let url = self.media.url_for(media_id)?;
        if url.starts_with("blob:") {
            let mut guard = self.active.lock().await;
            if let Some(active) = guard.as_mut() {
                active.owned_blob_urls.insert(url.clone());
            }
        }
        if widget.kind.is_html_widget() {
            let key = self.html.widget_html_key(layout_id, region_id, media_id);
            self.sink.load_iframe(&widget.id, &key);
        }
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::dom_sink::recording::RecordingDomSink;
    use super::*;
    use std::collections::HashSet as StdHashSet;
    use std::sync::Mutex as StdMutex;

    struct AlwaysReady;
    impl MediaReadiness for AlwaysReady {
        fn is_ready(&self, _media_id: &MediaId) -> bool {
            true
        }
        fn url_for(&self, media_id: &MediaId) -> Option<String> {
            Some(format!("blob:test/{media_id}"))
        }
    }

    struct NeverReady(StdMutex<StdHashSet<MediaId>>);
    impl MediaReadiness for NeverReady {
        fn is_ready(&self, media_id: &MediaId) -> bool {
            self.0.lock().unwrap().contains(media_id)
        }
        fn url_for(&self, media_id: &MediaId) -> Option<String> {
            Some(format!("blob:test/{media_id}"))
        }
    }

    struct FakeHtmlProvider;
    impl WidgetHtmlProvider for FakeHtmlProvider {
        fn widget_html_key(&self, _layout_id: &LayoutId, _region_id: &RegionId, media_id: &MediaId) -> String {
            format!("widget/{media_id}")
        }
    }

    const SINGLE_IMAGE_LAYOUT: &str = r#"
        <layout width="1920" height="1080">
          <region id="r1" left="0" top="0" width="1920" height="1080">
            <media id="w1" type="image" mediaId="m1" duration="0" useDuration="0" />
          </region>
        </layout>
    "#;

    fn build_renderer(media: Arc<dyn MediaReadiness>) -> (Arc<LayoutRenderer>, Arc<RecordingDomSink>, mpsc::UnboundedReceiver<RendererEvent>) {
        let sink = Arc::new(RecordingDomSink::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let renderer = Arc::new(LayoutRenderer::new(
            sink.clone(),
            media,
            Arc::new(FakeHtmlProvider),
            Duration::from_millis(10),
            tx,
        ));
        (renderer, sink, rx)
    }

    #[tokio::test]
    async fn new_layout_builds_scaffold_and_emits_layout_start() {
        let (renderer, sink, mut rx) = build_renderer(Arc::new(AlwaysReady));
        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, RendererEvent::LayoutStart(id) if id == LayoutId::new("l1")));

        let ops = sink.ops_snapshot();
        assert!(ops.iter().any(|op| matches!(op, dom_sink::recording::DomOp::EnsureRegion(_))));
        assert!(ops.iter().any(|op| matches!(op, dom_sink::recording::DomOp::CreateWidget(_, _))));
    }

    #[tokio::test]
    async fn replaying_same_layout_does_not_clear_the_region() {
        let (renderer, sink, mut rx) = build_renderer(Arc::new(AlwaysReady));
        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();

        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let second_event = rx.recv().await.unwrap();
        assert!(matches!(second_event, RendererEvent::LayoutStart(_)));

        let ops = sink.ops_snapshot();
        assert!(
            !ops.iter().any(|op| matches!(op, dom_sink::recording::DomOp::ClearRegion(_))),
            "replay must not clear regions: {ops:?}"
        );
    }

    #[tokio::test]
    async fn replaying_same_layout_restarts_video_from_zero_without_recreating_it() {
        const VIDEO_LAYOUT: &str = r#"
            <layout width="1920" height="1080">
              <region id="r1" left="0" top="0" width="1920" height="1080">
                <media id="w1" type="video" mediaId="m1" duration="45" useDuration="1" loop="0" />
              </region>
            </layout>
        "#;
        let (renderer, sink, mut rx) = build_renderer(Arc::new(AlwaysReady));
        renderer
            .render_layout(VIDEO_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();
        sink.clear_ops();

        renderer
            .render_layout(VIDEO_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let second_event = rx.recv().await.unwrap();
        assert!(matches!(second_event, RendererEvent::LayoutStart(_)));

        let ops = sink.ops_snapshot();
        assert!(
            ops.iter().any(|op| matches!(op, dom_sink::recording::DomOp::RestartMedia(_))),
            "replay must restart the video widget from currentTime 0: {ops:?}"
        );
        assert!(
            !ops.iter().any(|op| matches!(
                op,
                dom_sink::recording::DomOp::CreateWidget(_, _) | dom_sink::recording::DomOp::ClearRegion(_)
            )),
            "replay must not destroy or recreate any DOM node: {ops:?}"
        );
    }

    #[tokio::test]
    async fn different_layout_tears_down_previous_and_revokes_its_blobs() {
        let (renderer, sink, mut rx) = build_renderer(Arc::new(AlwaysReady));
        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();

        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l2"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();

        let ops = sink.ops_snapshot();
        assert!(ops.iter().any(|op| matches!(op, dom_sink::recording::DomOp::ClearRegion(_))));
    }

    #[tokio::test]
    async fn blob_revocation_is_deferred_until_after_the_new_layout_shows_its_widget() {
        let (renderer, sink, mut rx) = build_renderer(Arc::new(AlwaysReady));
        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();

        let region_id = RegionId::new("r1");
        let widget = xlf::parse_xlf(SINGLE_IMAGE_LAYOUT, LayoutId::new("l1")).unwrap().regions[0].widgets[0].clone();
        let url = renderer
            .resolve_widget_source(&LayoutId::new("l1"), &region_id, &widget)
            .await
            .unwrap();
        assert!(url.starts_with("blob:"));

        sink.clear_ops();

        renderer
            .render_layout(SINGLE_IMAGE_LAYOUT, LayoutId::new("l2"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();

        let ops = sink.ops_snapshot();
        let show_index = ops
            .iter()
            .position(|op| matches!(op, dom_sink::recording::DomOp::ShowWidget(_)))
            .expect("new layout must show its widget");
        let revoke_index = ops
            .iter()
            .position(|op| matches!(op, dom_sink::recording::DomOp::RevokeBlobUrl(_)))
            .expect("superseded layout's blob must eventually be revoked");
        assert!(
            revoke_index > show_index,
            "blob revocation must happen after the new layout starts showing its widget: {ops:?}"
        );
    }

    #[tokio::test]
    async fn widget_transitions_fire_on_show_and_on_hide() {
        const TRANSITION_LAYOUT: &str = r#"
            <layout width="1920" height="1080">
              <region id="r1" left="0" top="0" width="1920" height="1080">
                <media id="w1" type="image" mediaId="m1" duration="1" useDuration="1">
                  <transitions>
                    <fadeIn duration="300" />
                    <fadeOut duration="200" />
                  </transitions>
                </media>
                <media id="w2" type="image" mediaId="m2" duration="1" useDuration="1" />
              </region>
            </layout>
        "#;
        let (renderer, sink, mut rx) = build_renderer(Arc::new(AlwaysReady));
        renderer
            .render_layout(TRANSITION_LAYOUT, LayoutId::new("l1"))
            .await
            .unwrap();
        let _ = rx.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let ops = sink.ops_snapshot();
        assert!(
            ops.iter()
                .any(|op| matches!(op, dom_sink::recording::DomOp::Transition(_, TransitionPhase::In))),
            "expected an in-transition on the first widget's show: {ops:?}"
        );
        assert!(
            ops.iter()
                .any(|op| matches!(op, dom_sink::recording::DomOp::Transition(_, TransitionPhase::Out))),
            "expected an out-transition when the first widget is hidden: {ops:?}"
        );
    }

    #[tokio::test]
    async fn unready_media_emits_pending_layout_before_starting() {
        let media = Arc::new(NeverReady(StdMutex::new(StdHashSet::new())));
        let (renderer, _sink, mut rx) = build_renderer(media);

        let render = renderer.clone();
        let xlf = SINGLE_IMAGE_LAYOUT.to_string();
        tokio::spawn(async move {
            let _ = render.render_layout(&xlf, LayoutId::new("l1")).await;
        });

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, RendererEvent::PendingLayout(_)));
    }
}
