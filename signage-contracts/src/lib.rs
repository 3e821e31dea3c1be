//! Data model and external-interface traits consumed by `signage-core`.
//!
//! This crate is the trait-surface boundary: everything the orchestrator
//! calls out to (the CMS, the live-command stream) and everything it
//! passes around internally (required files, schedule documents,
//! commands) is defined here with no dependency on how it is transported.

pub mod cms_client;
pub mod command;
pub mod error;
pub mod ids;
pub mod required_file;
pub mod schedule_doc;

pub mod prelude {
    pub use super::cms_client::{
        CmsClient, DisplaySettings, DisplayStatus, LiveCommandSource,
        RegisterDisplayRequest, RegisterDisplayResponse,
    };
    pub use super::command::LiveCommand;
    pub use super::error::{CmsError, Result};
    pub use super::ids::{FileId, LayoutId, MediaId, RegionId, ScheduleEntryId, WidgetId};
    pub use super::required_file::{Fingerprint, FileKind, RequiredFile};
    pub use super::schedule_doc::{
        CriteriaPredicate, GeoFence, ScheduleDocument, ScheduleEntry, ScheduleEntryKind,
        TimeWindow,
    };
}
