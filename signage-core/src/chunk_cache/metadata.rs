use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use signage_contracts::required_file::Fingerprint;

/// On-disk representation of a cached file's metadata (`ChunkedArtifact`).
/// The presence of this record (not the presence of chunk entries) is the
/// cache's sole existence predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub total_size: u64,
    pub chunk_size: u64,
    pub num_chunks: u32,
    pub content_type: String,
    pub fingerprint: Option<Fingerprint>,
    pub created_at: DateTime<Utc>,
    /// Authoritative: a file is "chunked" iff this is true, independent of
    /// `num_chunks` (a whole file is stored as exactly one chunk entry but
    /// `chunked == false`).
    pub chunked: bool,
}

impl ArtifactMetadata {
    pub fn whole(total_size: u64, content_type: String, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            total_size,
            chunk_size: total_size,
            num_chunks: 1,
            content_type,
            fingerprint,
            created_at: Utc::now(),
            chunked: false,
        }
    }

    pub fn chunked(
        total_size: u64,
        chunk_size: u64,
        num_chunks: u32,
        content_type: String,
        fingerprint: Option<Fingerprint>,
    ) -> Self {
        Self {
            total_size,
            chunk_size,
            num_chunks,
            content_type,
            fingerprint,
            created_at: Utc::now(),
            chunked: true,
        }
    }

    /// Index of the chunk covering byte offset `offset`.
    pub fn chunk_index_for_offset(&self, offset: u64) -> u32 {
        (offset / self.chunk_size) as u32
    }

    /// `(start, len)` byte range within chunk `index`'s own bytes that is
    /// covered by the absolute byte range `[start, end]`.
    pub fn local_slice(&self, index: u32, start: u64, end: u64) -> (u64, u64) {
        let chunk_start = index as u64 * self.chunk_size;
        let chunk_end = (chunk_start + self.chunk_size).min(self.total_size) - 1;
        let local_start = start.max(chunk_start) - chunk_start;
        let local_end = end.min(chunk_end) - chunk_start;
        (local_start, local_end - local_start + 1)
    }
}

/// Existence lookup result (`fileExists`).
#[derive(Debug, Clone)]
pub struct FileExistence {
    pub exists: bool,
    pub chunked: bool,
    pub metadata: Option<ArtifactMetadata>,
}

impl FileExistence {
    pub fn absent() -> Self {
        Self {
            exists: false,
            chunked: false,
            metadata: None,
        }
    }
}
