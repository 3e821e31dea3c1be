use serde::{Deserialize, Serialize};

use crate::ids::LayoutId;

/// Typed commands delivered over the live channel. Transport and
/// reconnection are out of scope; the core only needs the parsed variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum LiveCommand {
    CollectNow,
    Screenshot,
    ChangeLayout { layout_id: LayoutId },
    OverlayLayout { layout_id: LayoutId },
    RevertToSchedule,
    PurgeAll,
    DataUpdate,
    Rekey,
}
