use thiserror::Error;

/// Errors from the content-addressed media/resource store.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("underlying storage error: {0}")]
    Storage(#[from] cacache::Error),

    #[error("no entry for key {0}")]
    NotFound(String),

    #[error("malformed metadata for key {0}: {1}")]
    MalformedMetadata(String, #[source] serde_json::Error),

    #[error("range header could not be satisfied")]
    RangeNotSatisfiable,

    #[error("artifact for key {0} is whole; use get() instead of a chunk read")]
    NotChunked(String),
}

/// Errors from the download pipeline.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("download for {url} timed out")]
    Timeout { url: String },

    #[error("download task was cancelled")]
    Cancelled,
}

/// Errors from XLF parsing and layout rendering.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("XLF parse error: {0}")]
    Parse(String),

    #[error("no region in layout {0} could start")]
    NoRegionReady(String),
}

/// Errors surfaced by the collection orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Cms(#[from] signage_contracts::error::CmsError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
pub type RenderResult<T> = std::result::Result<T, RenderError>;
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
