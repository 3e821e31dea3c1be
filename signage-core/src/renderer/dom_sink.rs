//! Abstraction over the browser DOM the renderer drives. Kept as a
//! trait so the layout state machine is testable without a browser: tests
//! substitute a recording sink, production code an adapter backed by
//! `web-sys` at the application boundary (outside this crate).

use signage_contracts::ids::{RegionId, WidgetId};

use super::xlf::{Direction, TransitionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    In,
    Out,
}

/// Every DOM mutation the renderer performs, as an explicit operation
/// rather than raw JS calls. A widget's native element kind (`<video>`,
/// `<img>`, `<iframe>`, ...) is implied by the widget kind passed to
/// `create_widget`; the sink is responsible for choosing the right tag.
pub trait DomSink: Send + Sync {
    /// Creates (or reuses, on a replay) the region container element.
    fn ensure_region(&self, region_id: &RegionId, x: i32, y: i32, width: u32, height: u32);

    /// Pre-creates every widget of a region up-front, hidden (widget
    /// lifecycle: "Create all widgets of a region up-front").
    fn create_widget(&self, region_id: &RegionId, widget_id: &WidgetId, kind: super::xlf::WidgetKind);

    fn show_widget(&self, region_id: &RegionId, widget_id: &WidgetId);
    fn hide_widget(&self, region_id: &RegionId, widget_id: &WidgetId);

    /// Resets a `<video>`/`<audio>` element to `currentTime = 0` and plays
    /// it unconditionally, including looping elements (layout-replay
    /// rule).
    fn restart_media(&self, widget_id: &WidgetId);

    /// Points an `<iframe>` at `cache_key` for a widget whose content is
    /// CMS-rendered HTML (ticker, webpage, clock, weather, calendar,
    /// generic).
    fn load_iframe(&self, widget_id: &WidgetId, cache_key: &str);

    fn run_transition(
        &self,
        widget_id: &WidgetId,
        phase: TransitionPhase,
        kind: TransitionKind,
        direction: Option<Direction>,
        duration_ms: u32,
    );

    /// Creates a blob URL for `bytes` and returns it. The renderer is the
    /// only caller permitted to invoke this (blob-URL ownership
    /// invariant); widgets never create URLs directly.
    fn create_blob_url(&self, content_type: &str, bytes: &[u8]) -> String;

    fn revoke_blob_url(&self, url: &str);

    fn clear_region(&self, region_id: &RegionId);
}

#[cfg(any(test, feature = "test-support"))]
pub mod recording {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DomOp {
        EnsureRegion(RegionId),
        CreateWidget(RegionId, WidgetId),
        ShowWidget(WidgetId),
        HideWidget(WidgetId),
        RestartMedia(WidgetId),
        LoadIframe(WidgetId, String),
        Transition(WidgetId, TransitionPhase),
        CreateBlobUrl(String),
        RevokeBlobUrl(String),
        ClearRegion(RegionId),
    }

    /// Headless sink used by tests: records every call instead of touching
    /// any real DOM, and vends deterministic, sequential blob URLs.
    #[derive(Default)]
    pub struct RecordingDomSink {
        pub ops: Mutex<Vec<DomOp>>,
        next_blob_id: std::sync::atomic::AtomicU64,
    }

    impl RecordingDomSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ops_snapshot(&self) -> Vec<DomOp> {
            self.ops.lock().unwrap().clone()
        }

        pub fn clear_ops(&self) {
            self.ops.lock().unwrap().clear();
        }
    }

    impl DomSink for RecordingDomSink {
        fn ensure_region(&self, region_id: &RegionId, _x: i32, _y: i32, _width: u32, _height: u32) {
            self.ops.lock().unwrap().push(DomOp::EnsureRegion(region_id.clone()));
        }

        fn create_widget(&self, region_id: &RegionId, widget_id: &WidgetId, _kind: super::super::xlf::WidgetKind) {
            self.ops
                .lock()
                .unwrap()
                .push(DomOp::CreateWidget(region_id.clone(), widget_id.clone()));
        }

        fn show_widget(&self, _region_id: &RegionId, widget_id: &WidgetId) {
            self.ops.lock().unwrap().push(DomOp::ShowWidget(widget_id.clone()));
        }

        fn hide_widget(&self, _region_id: &RegionId, widget_id: &WidgetId) {
            self.ops.lock().unwrap().push(DomOp::HideWidget(widget_id.clone()));
        }

        fn restart_media(&self, widget_id: &WidgetId) {
            self.ops.lock().unwrap().push(DomOp::RestartMedia(widget_id.clone()));
        }

        fn load_iframe(&self, widget_id: &WidgetId, cache_key: &str) {
            self.ops
                .lock()
                .unwrap()
                .push(DomOp::LoadIframe(widget_id.clone(), cache_key.to_string()));
        }

        fn run_transition(
            &self,
            widget_id: &WidgetId,
            phase: TransitionPhase,
            _kind: TransitionKind,
            _direction: Option<Direction>,
            _duration_ms: u32,
        ) {
            self.ops.lock().unwrap().push(DomOp::Transition(widget_id.clone(), phase));
        }

        fn create_blob_url(&self, content_type: &str, _bytes: &[u8]) -> String {
            let id = self.next_blob_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let url = format!("blob:test/{id}-{content_type}");
            self.ops.lock().unwrap().push(DomOp::CreateBlobUrl(url.clone()));
            url
        }

        fn revoke_blob_url(&self, url: &str) {
            self.ops.lock().unwrap().push(DomOp::RevokeBlobUrl(url.to_string()));
        }

        fn clear_region(&self, region_id: &RegionId) {
            self.ops.lock().unwrap().push(DomOp::ClearRegion(region_id.clone()));
        }
    }
}
