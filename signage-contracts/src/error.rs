use thiserror::Error;

/// Errors surfaced by the external-interface boundary:
/// CMS transport failures, malformed schedule documents, and command
/// stream hiccups. Transport concerns themselves are out of scope; this
/// only covers the shapes the core needs to react to.
#[derive(Error, Debug)]
pub enum CmsError {
    #[error("CMS unreachable: {0}")]
    Unreachable(String),

    #[error("CMS rejected the request: {0}")]
    Rejected(String),

    #[error("malformed response from CMS: {0}")]
    MalformedResponse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CmsError>;
