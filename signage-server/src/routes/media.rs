use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::infra::app_state::AppState;

/// Serves a cached artifact by its cache key, honouring `Range` the way
/// `ChunkCache::range` already computes it (`cache://` scheme). A
/// missing `Range` header falls back to a whole-file read via `get`.
pub async fn serve_cached(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let key = format!("media/{key}");

    let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return serve_whole(&state, &key).await;
    };

    match state.cache.range(&key, range_header).await {
        Ok(range_response) => {
            let mut builder = Response::builder().status(range_response.status);
            for (name, value) in range_response.headers {
                builder = builder.header(HeaderName::from_static(name), value);
            }
            builder
                .body(axum::body::Body::from(range_response.body))
                .expect("range response headers are always valid ASCII")
        }
        Err(e) => {
            warn!(key, error = %e, "range read failed");
            (StatusCode::NOT_FOUND, "not cached").into_response()
        }
    }
}

async fn serve_whole(state: &AppState, key: &str) -> Response {
    match state.cache.get(key).await {
        Ok(Some((bytes, content_type))) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, bytes.len().to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .body(axum::body::Body::from(bytes))
            .expect("content-type from cache metadata is always valid ASCII"),
        Ok(None) => (StatusCode::NOT_FOUND, "not cached").into_response(),
        Err(e) => {
            warn!(key, error = %e, "whole-file read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "cache read error").into_response()
        }
    }
}
