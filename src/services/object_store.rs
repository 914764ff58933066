//! ObjectStore: the backend collaborator the navigator delegates to.
//!
//! Implementations own every round trip to the storage service. The trait is
//! object safe so a single handle can be shared as `Arc<dyn ObjectStore>`.

use crate::models::BlobEntry;
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::BTreeMap, io, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("write channel for `{0}` is already closed")]
    ChannelClosed(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage backend operations used by the helper.
///
/// Every call is a fresh round trip; implementations must not cache.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List entries whose key starts with `prefix`.
    ///
    /// With `current_directory_only`, keys nested deeper than one level are
    /// collapsed into directory entries (`prefix` + next segment + `/`).
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        current_directory_only: bool,
    ) -> StoreResult<Vec<BlobEntry>>;

    /// Fetch one entry. `Ok(None)` when the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<BlobEntry>>;

    /// Write a whole object in one call.
    async fn create_from_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<BlobEntry>;

    /// Open a chunked writer for large objects.
    async fn open_writer(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<Box<dyn WriteChannel>>;

    /// Copy an object, returning the entry written at the destination.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<BlobEntry>;

    /// Delete an object. `Ok(false)` when nothing was deleted.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool>;

    /// Stream the payload of `entry` into a local file at `path`.
    async fn download_to(&self, entry: &BlobEntry, path: &Path) -> StoreResult<()>;
}

/// A streamed upload in progress.
///
/// Nothing becomes visible in the bucket until [`WriteChannel::finish`]
/// succeeds. Dropping an unfinished channel releases its resources and
/// discards the partial upload.
#[async_trait]
pub trait WriteChannel: Send {
    async fn write(&mut self, chunk: &[u8]) -> StoreResult<()>;

    /// Commit the upload and return the stored entry.
    async fn finish(self: Box<Self>) -> StoreResult<BlobEntry>;

    /// Discard the upload.
    async fn abort(self: Box<Self>);
}
