//! src/services/blob_navigator.rs
//!
//! BlobNavigator: listing, classification, "last blob" resolution and
//! move/rename orchestration for a single bucket. All state lives in the
//! backend; the navigator only holds the bucket name and shared handles, so
//! one instance can be cloned freely across tasks.

use crate::{
    errors::{HelperError, HelperResult},
    models::{BlobEntry, BlobRef, SearchPolicy, TOKEN_KEY},
    services::{
        classifier::{ContentClassifier, SNIFF_LEN},
        name_codec,
        object_store::{ObjectStore, WriteChannel},
    },
};
use bytes::Bytes;
use futures::StreamExt;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncReadExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Files strictly smaller than this are written in one call; anything at or
/// above it goes through a streamed writer.
pub const STREAMING_THRESHOLD: u64 = 1_000_000;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// How an upload of a given size is written to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadMode {
    Buffered,
    Streamed,
}

impl UploadMode {
    pub fn for_size(len: u64) -> Self {
        if len < STREAMING_THRESHOLD {
            UploadMode::Buffered
        } else {
            UploadMode::Streamed
        }
    }
}

/// Sort class used by [`BlobNavigator::resolve_last_blob`]. `Preferred`
/// entries sort after `Deferred` ones, so they win the "last" pick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Deferred,
    Preferred,
}

fn priority(entry: &BlobEntry, file_priority: bool) -> Priority {
    if entry.is_directory != file_priority {
        Priority::Preferred
    } else {
        Priority::Deferred
    }
}

fn last_blob_order(a: &BlobEntry, b: &BlobEntry, file_priority: bool) -> Ordering {
    priority(a, file_priority)
        .cmp(&priority(b, file_priority))
        .then_with(|| a.key.cmp(&b.key))
}

/// Bucket-scoped helper over an [`ObjectStore`].
#[derive(Clone)]
pub struct BlobNavigator {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    classifier: Arc<dyn ContentClassifier>,
    storage_host: String,
}

impl BlobNavigator {
    pub fn new(
        bucket: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        classifier: Arc<dyn ContentClassifier>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            store,
            classifier,
            storage_host: name_codec::DEFAULT_STORAGE_HOST.to_string(),
        }
    }

    /// Override the host used when building download URLs.
    pub fn with_storage_host(mut self, host: impl Into<String>) -> Self {
        self.storage_host = host.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn storage_host(&self) -> &str {
        &self.storage_host
    }

    fn no_such_blob(&self, key: &str) -> HelperError {
        HelperError::NoSuchBlob {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    /// Fetch one blob, failing with `NoSuchBlob` when it is absent.
    pub async fn get_blob(&self, key: &str) -> HelperResult<BlobEntry> {
        self.store
            .get(&self.bucket, key)
            .await?
            .ok_or_else(|| self.no_such_blob(key))
    }

    async fn resolve<'a>(&self, blob: BlobRef<'a>) -> HelperResult<BlobEntry> {
        match blob {
            BlobRef::Key(key) => self.get_blob(key).await,
            BlobRef::Entry(entry) => Ok(entry.clone()),
        }
    }

    /// Entries one level below `prefix`, filtered by `policy`.
    ///
    /// The entry equal to `prefix` itself (a materialized directory marker)
    /// is never returned. Order is whatever the backend reports.
    ///
    /// ```text
    /// life-cycles/
    /// ├─ 20201231/
    /// │  ├─ market-kurly.zip
    /// │  ├─ emart.zip
    /// ├─ 20210129/
    /// │  ├─ homeplus.zip
    ///
    /// list_blobs("life-cycles/", Directories)  => [20201231/, 20210129/]
    /// list_blobs("life-cycles/20201231/", Files) => [market-kurly.zip, emart.zip]
    /// ```
    pub async fn list_blobs(
        &self,
        prefix: &str,
        policy: SearchPolicy,
    ) -> HelperResult<Vec<BlobEntry>> {
        let entries = self.store.list(&self.bucket, prefix, true).await?;
        let selected: Vec<BlobEntry> = entries
            .into_iter()
            .filter(|entry| policy.matches(entry))
            .filter(|entry| entry.key != prefix)
            .collect();

        debug!(
            bucket = %self.bucket,
            prefix = %prefix,
            ?policy,
            count = selected.len(),
            "listed blobs"
        );
        Ok(selected)
    }

    pub async fn list_blob_names(
        &self,
        prefix: &str,
        policy: SearchPolicy,
    ) -> HelperResult<Vec<String>> {
        let entries = self.list_blobs(prefix, policy).await?;
        Ok(entries.into_iter().map(|entry| entry.key).collect())
    }

    /// Walk down to the deepest "last" file under `prefix`.
    ///
    /// At every level entries are ordered by priority class and then by key;
    /// with `file_priority` files outrank sibling directories, otherwise
    /// directories do. The last entry wins and directories are descended into.
    ///
    /// ```text
    /// life-cycles/
    /// ├─ 20201231/
    /// │  ├─ market-kurly.zip
    /// ├─ 20210129/
    /// │  ├─ homeplus.zip
    /// ├─ sample.zip
    ///
    /// resolve_last_blob("life-cycles/", true)  => life-cycles/sample.zip
    /// resolve_last_blob("life-cycles/", false) => life-cycles/20210129/homeplus.zip
    /// ```
    ///
    /// Returns `None` when a level is empty or the chosen file vanished before
    /// it could be confirmed.
    pub async fn resolve_last_blob(
        &self,
        prefix: &str,
        file_priority: bool,
    ) -> HelperResult<Option<BlobEntry>> {
        let mut current = prefix.to_string();
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(current.clone()) {
                warn!(prefix = %current, "directory cycle while resolving last blob");
                return Ok(None);
            }

            let mut entries = self.list_blobs(&current, SearchPolicy::All).await?;
            entries.sort_by(|a, b| last_blob_order(a, b, file_priority));

            let Some(last) = entries.pop() else {
                debug!(prefix = %current, "no entries left to descend into");
                return Ok(None);
            };

            if last.is_directory {
                debug!(from = %current, into = %last.key, "descending");
                current = last.key;
                continue;
            }

            return Ok(self.store.get(&self.bucket, &last.key).await?);
        }
    }

    /// Download a blob into `dest_dir`, creating the directory chain.
    ///
    /// The file is named `new_filename` when given (and not blank), otherwise
    /// after the blob's simple name. The payload lands in a temp file beside
    /// the target and replaces it only once the transfer completes, so a
    /// failed download leaves any existing file untouched.
    pub async fn download<'a>(
        &self,
        blob: impl Into<BlobRef<'a>>,
        dest_dir: &Path,
        new_filename: Option<&str>,
    ) -> HelperResult<PathBuf> {
        let entry = self.resolve(blob.into()).await?;

        let filename = match new_filename.filter(|name| !name.trim().is_empty()) {
            Some(name) => name,
            None => name_codec::simple_name(&entry.key),
        };
        if filename.is_empty() {
            return Err(HelperError::InvalidFilename(entry.key.clone()));
        }

        let path = dest_dir.join(filename);
        let parent = path.parent().unwrap_or(dest_dir);
        fs::create_dir_all(parent).await?;

        let tmp_path = parent.join(format!(".download-{}.part", Uuid::new_v4()));
        let transferred = match self.store.download_to(&entry, &tmp_path).await {
            Ok(()) => fs::rename(&tmp_path, &path).await.map_err(HelperError::from),
            Err(err) => Err(err.into()),
        };

        if let Err(err) = transferred {
            match fs::remove_file(&tmp_path).await {
                Ok(_) => debug!(path = %tmp_path.display(), "removed partial download"),
                Err(rm_err) if rm_err.kind() == std::io::ErrorKind::NotFound => {}
                Err(rm_err) => warn!(
                    path = %tmp_path.display(),
                    error = %rm_err,
                    "failed to remove partial download"
                ),
            }
            return Err(err);
        }

        info!(key = %entry.key, path = %path.display(), "downloaded blob");
        Ok(path)
    }

    /// Upload a local file to `dest_key` with a fresh download token.
    ///
    /// Without `mime_type` the content type is sniffed from the file; an
    /// unknown type falls back to `application/octet-stream`.
    pub async fn upload(
        &self,
        dest_key: &str,
        file: &Path,
        mime_type: Option<&str>,
    ) -> HelperResult<BlobEntry> {
        let len = fs::metadata(file).await?.len();

        let content_type = match mime_type.filter(|m| !m.trim().is_empty()) {
            Some(mime) => mime.to_string(),
            None => self.detect_content_type(file).await?,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert(TOKEN_KEY.to_string(), Uuid::new_v4().to_string());

        let entry = match UploadMode::for_size(len) {
            UploadMode::Buffered => {
                let bytes = Bytes::from(fs::read(file).await?);
                self.store
                    .create_from_bytes(&self.bucket, dest_key, bytes, &content_type, metadata)
                    .await?
            }
            UploadMode::Streamed => {
                let writer = self
                    .store
                    .open_writer(&self.bucket, dest_key, &content_type, metadata)
                    .await?;
                stream_file(writer, file).await?
            }
        };

        info!(
            key = %dest_key,
            size = len,
            content_type = %content_type,
            "uploaded blob"
        );
        Ok(entry)
    }

    async fn detect_content_type(&self, file: &Path) -> HelperResult<String> {
        let mut header = Vec::with_capacity(SNIFF_LEN);
        File::open(file)
            .await?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut header)
            .await?;

        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        Ok(self
            .classifier
            .detect(&header, file_name)
            .filter(|mime| !mime.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()))
    }

    /// Copy the blob to `new_key`, then delete the original.
    ///
    /// The delete only runs once the copy has succeeded. A failed delete
    /// leaves the object under both keys and is reported as
    /// `PostCopyDeleteFailed`.
    pub async fn move_to<'a>(
        &self,
        blob: impl Into<BlobRef<'a>>,
        new_key: &str,
    ) -> HelperResult<BlobEntry> {
        let source = self.resolve(blob.into()).await?;
        if source.key == new_key {
            debug!(key = %new_key, "move onto the same key, nothing to do");
            return Ok(source);
        }

        let copied = self
            .store
            .copy(&self.bucket, &source.key, &self.bucket, new_key)
            .await
            .map_err(|err| HelperError::CopyFailed {
                src: source.key.clone(),
                dst: new_key.to_string(),
                source: err,
            })?;

        let reason = match self.store.delete(&self.bucket, &source.key).await {
            Ok(true) => {
                info!(from = %source.key, to = %new_key, "moved blob");
                return Ok(copied);
            }
            Ok(false) => "backend reported nothing was deleted".to_string(),
            Err(err) => err.to_string(),
        };

        error!(
            from = %source.key,
            to = %new_key,
            reason = %reason,
            "blob copied but source not deleted; object now exists under both keys"
        );
        Err(HelperError::PostCopyDeleteFailed {
            src: source.key,
            dst: new_key.to_string(),
            reason,
        })
    }

    /// Replace the final segment of the key, keeping its directory.
    pub async fn rename<'a>(
        &self,
        blob: impl Into<BlobRef<'a>>,
        new_simple_name: &str,
    ) -> HelperResult<BlobEntry> {
        let blob: BlobRef<'a> = blob.into();
        let new_key = name_codec::renamed_key(blob.key(), new_simple_name);
        self.move_to(blob, &new_key).await
    }

    /// Delete a blob. Returns `false` when it did not exist.
    pub async fn delete(&self, key: &str) -> HelperResult<bool> {
        if self.store.get(&self.bucket, key).await?.is_none() {
            debug!(key = %key, "delete of missing blob ignored");
            return Ok(false);
        }

        let deleted = self.store.delete(&self.bucket, key).await?;
        info!(key = %key, deleted, "deleted blob");
        Ok(deleted)
    }

    /// File extension of a blob, from its key or else its content type.
    ///
    /// Returns an empty string when the key is blank, when the blob has no
    /// content type, or when the content type has no registered extension.
    pub async fn to_file_extension(&self, key: &str) -> HelperResult<String> {
        if key.trim().is_empty() {
            return Ok(String::new());
        }
        if let Some(ext) = name_codec::extension_from_key(key) {
            return Ok(ext.to_string());
        }

        let entry = self.get_blob(key).await?;
        let Some(content_type) = entry.content_type.filter(|ct| !ct.trim().is_empty()) else {
            return Ok(String::new());
        };

        match name_codec::extension_from_content_type(self.classifier.as_ref(), &content_type) {
            Ok(ext) => Ok(ext),
            Err(HelperError::UnknownMimeType(mime)) => {
                warn!(key = %key, mime = %mime, "no extension registered for content type");
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Download URL for a key, without a token.
    pub fn url_for(&self, key: &str) -> String {
        name_codec::build_download_url(&self.storage_host, &self.bucket, key, None)
    }

    /// Download URL for an entry, carrying its token when it has one.
    pub fn download_url(&self, entry: &BlobEntry) -> String {
        name_codec::build_download_url(
            &self.storage_host,
            &entry.bucket,
            &entry.key,
            entry.download_token(),
        )
    }

    /// Fetch the blob a download URL points at.
    pub async fn blob_from_url(&self, url: &str) -> HelperResult<BlobEntry> {
        let key = name_codec::parse_blob_key_from_url(url)?;
        self.get_blob(&key).await
    }
}

/// Pump a local file through a write channel.
///
/// The channel is aborted on any read or write failure so the partial upload
/// never becomes visible.
async fn stream_file(mut writer: Box<dyn WriteChannel>, file: &Path) -> HelperResult<BlobEntry> {
    let source = match File::open(file).await {
        Ok(source) => source,
        Err(err) => {
            writer.abort().await;
            return Err(err.into());
        }
    };

    let mut chunks = ReaderStream::new(source);
    while let Some(chunk) = chunks.next().await {
        let written = match chunk {
            Ok(chunk) => writer.write(&chunk).await.map_err(HelperError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = written {
            writer.abort().await;
            return Err(err);
        }
    }

    Ok(writer.finish().await?)
}
