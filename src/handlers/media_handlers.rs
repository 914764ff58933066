//! Serves the public download URL scheme
//! `/v0/b/{bucket}/o/{encodedKey}?alt=media&token=...` from the local store.
//! Bodies are streamed from disk, never buffered.

use crate::{errors::AppError, handlers::AppState, models::BlobEntry};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio_util::io::ReaderStream;
use tracing::debug;

fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub alt: Option<String>,
    pub token: Option<String>,
}

/// Metadata document returned when `alt=media` is absent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub name: String,
    pub bucket: String,
    pub content_type: Option<String>,
    pub size: String,
    pub md5_hash: Option<String>,
    pub updated: Option<String>,
    pub download_tokens: Option<String>,
}

impl From<&BlobEntry> for MediaMetadata {
    fn from(entry: &BlobEntry) -> Self {
        Self {
            name: entry.key.clone(),
            bucket: entry.bucket.clone(),
            content_type: entry.content_type.clone(),
            size: entry.size.to_string(),
            md5_hash: entry.md5_hash.clone(),
            updated: entry.updated.map(|ts| ts.to_rfc3339()),
            download_tokens: entry.download_token().map(str::to_string),
        }
    }
}

/// `GET /v0/b/{bucket}/o/{key}`. The key arrives as one encoded segment.
///
/// Blobs carrying a download token only answer requests presenting it.
pub async fn get_media(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<MediaQuery>,
) -> Result<Response, AppError> {
    if bucket != state.navigator.bucket() {
        return Err(AppError::not_found(format!("bucket `{}` not found", bucket)));
    }

    let entry = state.navigator.get_blob(&key).await?;
    if let Some(expected) = entry.download_token() {
        if !query
            .token
            .as_deref()
            .is_some_and(|token| secure_compare(token, expected))
        {
            debug!(key = %key, "rejected download with missing or wrong token");
            return Err(AppError::forbidden("invalid or missing download token"));
        }
    }

    if query.alt.as_deref() != Some("media") {
        return Ok(Json(MediaMetadata::from(&entry)).into_response());
    }

    let (meta, file) = state.store.get_object_reader(&bucket, &key).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_media_headers(response.headers_mut(), &meta);

    Ok(response)
}

fn set_media_headers(headers: &mut HeaderMap, meta: &BlobEntry) {
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));

    if let Some(hash) = meta.md5_hash.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", hash)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Some(updated) = meta.updated {
        if let Ok(value) = HeaderValue::from_str(&updated.to_rfc2822()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}
