//! Bridges the async cache into the renderer's synchronous readiness
//! checks (`MediaReadiness`). The renderer polls this on a tight
//! timer loop while waiting for a widget to start, so it cannot afford to
//! await a cache lookup; the orchestrator keeps this map current instead,
//! updating it as downloads complete and as layouts are torn down.

use dashmap::DashMap;

use signage_contracts::ids::{LayoutId, MediaId, RegionId};

use crate::renderer::{MediaReadiness, WidgetHtmlProvider};

#[derive(Default)]
pub struct CacheReadiness {
    urls: DashMap<MediaId, String>,
}

impl CacheReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self, media_id: MediaId, url: String) {
        self.urls.insert(media_id, url);
    }

    pub fn mark_unready(&self, media_id: &MediaId) {
        self.urls.remove(media_id);
    }

    pub fn clear(&self) {
        self.urls.clear();
    }
}

impl MediaReadiness for CacheReadiness {
    fn is_ready(&self, media_id: &MediaId) -> bool {
        self.urls.contains_key(media_id)
    }

    fn url_for(&self, media_id: &MediaId) -> Option<String> {
        self.urls.get(media_id).map(|entry| entry.clone())
    }
}

/// The composite cache key a CMS-rendered widget's HTML is stored under
/// (resources are addressed by `layoutId/regionId/mediaId`, unlike
/// media and layout files which use their CMS id directly).
pub fn widget_resource_key(layout_id: &LayoutId, region_id: &RegionId, media_id: &MediaId) -> String {
    format!("resource/{layout_id}/{region_id}/{media_id}")
}

pub struct CacheWidgetHtmlProvider;

impl WidgetHtmlProvider for CacheWidgetHtmlProvider {
    fn widget_html_key(&self, layout_id: &LayoutId, region_id: &RegionId, media_id: &MediaId) -> String {
        widget_resource_key(layout_id, region_id, media_id)
    }
}
