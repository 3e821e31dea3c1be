use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::LiveCommand;
use crate::error::Result;
use crate::ids::{LayoutId, MediaId, RegionId};
use crate::required_file::RequiredFile;
use crate::schedule_doc::ScheduleDocument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDisplayRequest {
    pub cms_key: String,
    pub hardware_key: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    pub collect_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDisplayResponse {
    pub status: String,
    pub settings: DisplaySettings,
}

/// Status reported back to the CMS. Kept
/// deliberately small: proof-of-play and metrics upload are out of scope
/// this only carries what the error-handling policy needs to
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub current_layout_id: Option<LayoutId>,
    pub pending_layout_id: Option<LayoutId>,
    pub blacklisted_layout_ids: Vec<LayoutId>,
    pub message: Option<String>,
}

/// Typed methods the core calls on the CMS. Transport — the
/// XML-over-HTTP/REST protocol actually spoken to the CMS — is entirely
/// the implementor's concern; the core only sees parsed values.
#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn register_display(
        &self,
        request: RegisterDisplayRequest,
    ) -> Result<RegisterDisplayResponse>;

    async fn required_files(&self) -> Result<Vec<RequiredFile>>;

    async fn schedule(&self) -> Result<ScheduleDocument>;

    async fn get_resource(
        &self,
        layout_id: &LayoutId,
        region_id: &RegionId,
        media_id: &MediaId,
    ) -> Result<String>;

    async fn submit_status(&self, status: DisplayStatus) -> Result<()>;
}

/// A push channel of live commands. Reconnection/heartbeating are
/// the transport's concern; the core only consumes parsed commands.
#[async_trait]
pub trait LiveCommandSource: Send {
    /// Waits for the next command, or returns `None` once the channel is
    /// permanently closed.
    async fn recv(&mut self) -> Option<LiveCommand>;
}
