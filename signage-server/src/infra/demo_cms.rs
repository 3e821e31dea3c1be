//! A concrete `CmsClient` for the demo binary. This is deliberately not a
//! CMS wire protocol: required files and the schedule document come from
//! JSON fixtures on disk, reloaded fresh on every call so editing them
//! while the binary runs is visible on the next collection cycle. Only
//! `get_resource` — HTML-widget content a real CMS renders on demand — goes
//! over the network, against whatever `base_url` is configured.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use signage_contracts::error::{CmsError, Result};
use signage_contracts::ids::{LayoutId, MediaId, RegionId};
use signage_contracts::prelude::{
    CmsClient, DisplaySettings, DisplayStatus, RegisterDisplayRequest, RegisterDisplayResponse,
};
use signage_contracts::required_file::RequiredFile;
use signage_contracts::schedule_doc::ScheduleDocument;

pub struct DemoCmsClient {
    client: Client,
    base_url: Url,
    fixture_dir: PathBuf,
    collect_interval_secs: u64,
}

impl DemoCmsClient {
    pub fn new(client: Client, base_url: Url, fixture_dir: PathBuf, collect_interval_secs: u64) -> Self {
        Self {
            client,
            base_url,
            fixture_dir,
            collect_interval_secs,
        }
    }

    async fn read_fixture<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.fixture_dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "fixture did not parse, using default");
                T::default()
            }),
            Err(_) => {
                debug!(path = %path.display(), "no fixture present, using default");
                T::default()
            }
        }
    }
}

#[async_trait]
impl CmsClient for DemoCmsClient {
    async fn register_display(&self, request: RegisterDisplayRequest) -> Result<RegisterDisplayResponse> {
        debug!(display = request.display_name, "demo register_display");
        Ok(RegisterDisplayResponse {
            status: "ok".to_string(),
            settings: DisplaySettings {
                collect_interval_secs: self.collect_interval_secs,
            },
        })
    }

    async fn required_files(&self) -> Result<Vec<RequiredFile>> {
        Ok(self.read_fixture("required_files.json").await)
    }

    async fn schedule(&self) -> Result<ScheduleDocument> {
        Ok(self.read_fixture("schedule.json").await)
    }

    /// The one operation a demo CMS realistically needs a wire call for:
    /// CMS-rendered widget HTML (ticker, webpage, clock) has no stable URL
    /// and must be fetched each time it's needed.
    async fn get_resource(&self, layout_id: &LayoutId, region_id: &RegionId, media_id: &MediaId) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("resource/{layout_id}/{region_id}/{media_id}"))
            .map_err(|e| CmsError::MalformedResponse(e.to_string()))?;

        match self.client.get(url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .text()
                .await
                .map_err(|e| CmsError::MalformedResponse(e.to_string())),
            Ok(resp) => {
                warn!(%url, status = %resp.status(), "get_resource returned non-success, falling back to placeholder");
                Ok(placeholder_html(media_id))
            }
            Err(e) => {
                warn!(%url, error = %e, "get_resource unreachable, falling back to placeholder");
                Ok(placeholder_html(media_id))
            }
        }
    }

    async fn submit_status(&self, status: DisplayStatus) -> Result<()> {
        debug!(
            current = ?status.current_layout_id,
            pending = ?status.pending_layout_id,
            blacklisted = status.blacklisted_layout_ids.len(),
            "demo submit_status"
        );
        Ok(())
    }
}

fn placeholder_html(media_id: &MediaId) -> String {
    format!("<html><body>resource {media_id} unavailable</body></html>")
}
