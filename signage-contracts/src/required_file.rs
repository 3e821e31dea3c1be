use serde::{Deserialize, Serialize};
use url::Url;

use crate::ids::FileId;

/// Content fingerprint for a `RequiredFile`. The CMS uses MD5; this is kept
/// as an opaque wrapper rather than `[u8; 16]` so a future fingerprint
/// algorithm swap doesn't ripple through the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

/// `type` discriminant. A `Resource` has no stable URL until
/// fetched: the CMS produces widget HTML on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Layout,
    Media,
    Resource,
}

/// A CMS-declared artifact. Two `RequiredFile`s with the same `id` but
/// a different `fingerprint` represent a CMS-side edit; the cache treats
/// that as a replace on the next collection cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredFile {
    pub kind: FileKind,
    pub id: FileId,
    pub url: Url,
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    #[serde(default)]
    pub purge: bool,
}

impl RequiredFile {
    /// The cache key this file is stored and looked up under. Resources use
    /// a composite `layoutId/regionId/mediaId` key; media and layout
    /// files are addressed by their CMS id directly.
    pub fn cache_key(&self) -> String {
        format!("media/{}", self.id)
    }
}
