#![allow(dead_code)]

use async_trait::async_trait;
use blob_helper::{
    BlobEntry, BlobNavigator, LocalObjectStore, MimeRegistry, ObjectStore, StoreError,
    StoreResult, WriteChannel,
};
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

pub const BUCKET: &str = "test-bucket";

pub async fn local_store() -> (LocalObjectStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = LocalObjectStore::new(Arc::new(pool), dir.path().join("blobs"));
    store.migrate().await.unwrap();
    store.ensure_bucket(BUCKET).await.unwrap();
    (store, dir)
}

pub fn navigator(store: Arc<dyn ObjectStore>) -> BlobNavigator {
    BlobNavigator::new(BUCKET, store, Arc::new(MimeRegistry))
}

pub async fn put(store: &dyn ObjectStore, key: &str, body: &[u8], content_type: &str) -> BlobEntry {
    store
        .create_from_bytes(
            BUCKET,
            key,
            Bytes::copy_from_slice(body),
            content_type,
            BTreeMap::new(),
        )
        .await
        .unwrap()
}

/// Wraps a real store, counting calls and optionally failing copy/delete.
pub struct RecordingStore {
    pub inner: LocalObjectStore,
    pub buffered_writes: AtomicUsize,
    pub streamed_writes: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_copy: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Write a few bytes, then fail, on `download_to`.
    pub fail_download: AtomicBool,
    /// Report every key as absent on `get`, while `list` still shows it.
    pub hide_on_get: AtomicBool,
}

impl RecordingStore {
    pub fn new(inner: LocalObjectStore) -> Self {
        Self {
            inner,
            buffered_writes: AtomicUsize::new(0),
            streamed_writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_copy: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_download: AtomicBool::new(false),
            hide_on_get: AtomicBool::new(false),
        }
    }

    fn injected(what: &str) -> StoreError {
        StoreError::Io(std::io::Error::other(format!("injected {what} failure")))
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        current_directory_only: bool,
    ) -> StoreResult<Vec<BlobEntry>> {
        self.inner.list(bucket, prefix, current_directory_only).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<BlobEntry>> {
        if self.hide_on_get.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(bucket, key).await
    }

    async fn create_from_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<BlobEntry> {
        self.buffered_writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .create_from_bytes(bucket, key, bytes, content_type, metadata)
            .await
    }

    async fn open_writer(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<Box<dyn WriteChannel>> {
        self.streamed_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.open_writer(bucket, key, content_type, metadata).await
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<BlobEntry> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(Self::injected("copy"));
        }
        self.inner.copy(src_bucket, src_key, dst_bucket, dst_key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(bucket, key).await
    }

    async fn download_to(&self, entry: &BlobEntry, path: &Path) -> StoreResult<()> {
        if self.fail_download.load(Ordering::SeqCst) {
            std::fs::write(path, b"half")?;
            return Err(Self::injected("download"));
        }
        self.inner.download_to(entry, path).await
    }
}
