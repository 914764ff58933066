//! src/services/local_store.rs
//!
//! LocalObjectStore: an `ObjectStore` backed by SQLite for metadata and
//! local disk for object payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{md5(key)}` so directory-like keys
//! never turn into real directories on disk.

use crate::{
    models::{BlobEntry, SEPARATOR, is_directory_key},
    services::object_store::{ObjectStore, StoreError, StoreResult, WriteChannel},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::Context;
use sqlx::{FromRow, SqlitePool};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 222;
const BUCKET_LABEL_MAX_LEN: usize = 63;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(FromRow, Debug, Clone)]
struct BucketRow {
    id: Uuid,
    name: String,
}

#[derive(FromRow, Debug)]
struct ObjectRow {
    key: String,
    content_type: Option<String>,
    size_bytes: i64,
    md5_hash: Option<String>,
    metadata: String,
    updated_at: DateTime<Utc>,
}

impl ObjectRow {
    fn into_entry(self, bucket: &str) -> StoreResult<BlobEntry> {
        let metadata: BTreeMap<String, String> = serde_json::from_str(&self.metadata)?;
        Ok(BlobEntry {
            bucket: bucket.to_string(),
            is_directory: is_directory_key(&self.key),
            key: self.key,
            size: self.size_bytes.max(0) as u64,
            content_type: self.content_type,
            metadata,
            md5_hash: self.md5_hash,
            updated: Some(self.updated_at),
        })
    }
}

/// Object store kept on the local machine.
///
/// Cheap to clone; clones share the same pool and root directory.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Create the bucket if it does not exist yet and make its directory.
    pub async fn ensure_bucket(&self, name: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let result = sqlx::query(
            "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() > 0 {
            debug!("created bucket {}", name);
        }
        Ok(())
    }

    /// Fetch an object for reading.
    ///
    /// Returns the entry and an opened file handle ready for streaming out.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<(BlobEntry, File)> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let not_found = || StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        let entry = self
            .fetch_object(&bucket_rec, key)
            .await?
            .ok_or_else(not_found)?
            .into_entry(&bucket_rec.name)?;

        let file = File::open(self.object_path(&bucket_rec.name, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    not_found()
                } else {
                    StoreError::Io(err)
                }
            })?;

        Ok((entry, file))
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers plus the payload file name for a key.
    ///
    /// Uses MD5(bucket/key); the first two bytes pick the shard directories.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (
            format!("{:02x}", digest[0]),
            format!("{:02x}", digest[1]),
            format!("{:x}", digest),
        )
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b, name) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    /// Temporary path next to the final payload location, parents created.
    async fn temp_path_for(&self, bucket_name: &str, key: &str) -> StoreResult<PathBuf> {
        let file_path = self.object_path(bucket_name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<BucketRow> {
        ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, BucketRow>("SELECT id, name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }

    async fn fetch_object(&self, bucket: &BucketRow, key: &str) -> StoreResult<Option<ObjectRow>> {
        let row = sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, size_bytes, md5_hash, metadata, updated_at
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Insert or overwrite the metadata row for `key`.
    async fn upsert_object(
        &self,
        bucket: &BucketRow,
        key: &str,
        content_type: Option<&str>,
        size: u64,
        md5_hash: &str,
        metadata: &BTreeMap<String, String>,
    ) -> StoreResult<BlobEntry> {
        let row = sqlx::query_as::<_, ObjectRow>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, md5_hash,
                metadata, generation, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                md5_hash = excluded.md5_hash,
                metadata = excluded.metadata,
                generation = objects.generation + 1,
                updated_at = excluded.updated_at
            RETURNING key, content_type, size_bytes, md5_hash, metadata, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(content_type)
        .bind(size as i64)
        .bind(md5_hash)
        .bind(serde_json::to_string(metadata)?)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        row.into_entry(&bucket.name)
    }

    /// Move a fully written temp file into place and record its metadata.
    ///
    /// Cleans up the payload if either step fails.
    async fn commit_payload(
        &self,
        bucket: &BucketRow,
        key: &str,
        tmp_path: &Path,
        content_type: Option<&str>,
        size: u64,
        md5_hash: &str,
        metadata: &BTreeMap<String, String>,
    ) -> StoreResult<BlobEntry> {
        let file_path = self.object_path(&bucket.name, key);
        if let Err(err) = install_payload(tmp_path, &file_path).await {
            let _ = fs::remove_file(tmp_path).await;
            return Err(err);
        }

        match self
            .upsert_object(bucket, key, content_type, size, md5_hash, metadata)
            .await
        {
            Ok(entry) => Ok(entry),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        current_directory_only: bool,
    ) -> StoreResult<Vec<BlobEntry>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let rows: Vec<ObjectRow> = sqlx::query_as(
            "SELECT key, content_type, size_bytes, md5_hash, metadata, updated_at
             FROM objects
             WHERE bucket_id = ? AND substr(key, 1, ?) = ?
             ORDER BY key ASC",
        )
        .bind(bucket_rec.id)
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut common_prefixes = BTreeSet::new();
        for row in rows {
            if current_directory_only {
                if let Some(grouped) = compute_common_prefix(&row.key, prefix, SEPARATOR) {
                    common_prefixes.insert(grouped);
                    continue;
                }
            }
            entries.push(row.into_entry(&bucket_rec.name)?);
        }

        entries.extend(
            common_prefixes
                .into_iter()
                .map(|key| BlobEntry::directory(&bucket_rec.name, key)),
        );
        debug!("listed {} entries under {}/{}", entries.len(), bucket, prefix);
        Ok(entries)
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<BlobEntry>> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key)
            .await?
            .map(|row| row.into_entry(&bucket_rec.name))
            .transpose()
    }

    async fn create_from_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<BlobEntry> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let tmp_path = self.temp_path_for(&bucket_rec.name, key).await?;
        let mut file = File::create(&tmp_path).await?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let md5_hash = general_purpose::STANDARD.encode(md5::compute(&bytes).0);
        self.commit_payload(
            &bucket_rec,
            key,
            &tmp_path,
            Some(content_type),
            bytes.len() as u64,
            &md5_hash,
            &metadata,
        )
        .await
    }

    async fn open_writer(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> StoreResult<Box<dyn WriteChannel>> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let tmp_path = self.temp_path_for(&bucket_rec.name, key).await?;
        let file = File::create(&tmp_path).await?;

        Ok(Box::new(LocalWriteChannel {
            store: self.clone(),
            bucket: bucket_rec,
            key: key.to_string(),
            content_type: content_type.to_string(),
            metadata,
            tmp_path: Some(tmp_path),
            file: Some(file),
            digest: Context::new(),
            size: 0,
        }))
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<BlobEntry> {
        ensure_key_safe(src_key)?;
        ensure_key_safe(dst_key)?;
        let src_rec = self.fetch_bucket(src_bucket).await?;
        let dst_rec = self.fetch_bucket(dst_bucket).await?;

        let source = self
            .fetch_object(&src_rec, src_key)
            .await?
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?
            .into_entry(&src_rec.name)?;

        let tmp_path = self.temp_path_for(&dst_rec.name, dst_key).await?;
        if let Err(err) = fs::copy(self.object_path(&src_rec.name, src_key), &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: src_bucket.to_string(),
                    key: src_key.to_string(),
                }
            } else {
                StoreError::Io(err)
            });
        }

        self.commit_payload(
            &dst_rec,
            dst_key,
            &tmp_path,
            source.content_type.as_deref(),
            source.size,
            source.md5_hash.as_deref().unwrap_or_default(),
            &source.metadata,
        )
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(bucket_rec.id)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => {
                warn!(
                    bucket = %bucket_rec.name,
                    key = %key,
                    error = %err,
                    "object deleted but payload {} was left behind",
                    file_path.display()
                );
            }
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(true)
    }

    async fn download_to(&self, entry: &BlobEntry, path: &Path) -> StoreResult<()> {
        let (_, mut reader) = self.get_object_reader(&entry.bucket, &entry.key).await?;
        let mut file = File::create(path).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Chunked writer into a temp file that is installed on `finish`.
pub struct LocalWriteChannel {
    store: LocalObjectStore,
    bucket: BucketRow,
    key: String,
    content_type: String,
    metadata: BTreeMap<String, String>,
    tmp_path: Option<PathBuf>,
    file: Option<File>,
    digest: Context,
    size: u64,
}

#[async_trait]
impl WriteChannel for LocalWriteChannel {
    async fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::ChannelClosed(self.key.clone()))?;
        file.write_all(chunk).await?;
        self.digest.consume(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StoreResult<BlobEntry> {
        let mut this = self;
        let (Some(mut file), Some(tmp_path)) = (this.file.take(), this.tmp_path.take()) else {
            return Err(StoreError::ChannelClosed(this.key.clone()));
        };

        let flushed = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = flushed {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let digest = std::mem::replace(&mut this.digest, Context::new()).compute();
        let md5_hash = general_purpose::STANDARD.encode(digest.0);
        this.store
            .commit_payload(
                &this.bucket,
                &this.key,
                &tmp_path,
                Some(&this.content_type),
                this.size,
                &md5_hash,
                &this.metadata,
            )
            .await
    }

    async fn abort(self: Box<Self>) {
        let mut this = self;
        this.file.take();
        if let Some(tmp_path) = this.tmp_path.take() {
            let _ = fs::remove_file(&tmp_path).await;
        }
    }
}

impl Drop for LocalWriteChannel {
    fn drop(&mut self) {
        self.file.take();
        if let Some(tmp_path) = self.tmp_path.take() {
            debug!("discarding unfinished upload of {}", self.key);
            let _ = std::fs::remove_file(tmp_path);
        }
    }
}

/// Rename `tmp_path` over `file_path`, replacing any existing payload.
async fn install_payload(tmp_path: &Path, file_path: &Path) -> StoreResult<()> {
    if let Err(err) = fs::rename(tmp_path, file_path).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(file_path).await?;
            fs::rename(tmp_path, file_path).await?;
        } else {
            return Err(StoreError::Io(err));
        }
    }
    Ok(())
}

/// Basic key validation to avoid trivial path traversal vectors.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with(SEPARATOR)
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(StoreError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// - 3–222 characters, each dot-separated label at most 63
/// - lowercase letters, digits, dots, hyphens and underscores only
/// - must start and end with a letter or digit
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.into(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 222 characters"));
    }

    if name.split('.').any(|label| label.len() > BUCKET_LABEL_MAX_LEN) {
        return Err(invalid("dot-separated labels must be at most 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, hyphens, and underscores",
        ));
    }

    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Compute the directory grouping a key collapses into under `prefix`.
///
/// Returns `Some(prefix + segment + delimiter)` when the key lies deeper than
/// one level below `prefix`, otherwise `None`.
fn compute_common_prefix(key: &str, prefix: &str, delimiter: char) -> Option<String> {
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!(
        "{}{}",
        prefix,
        &after_prefix[..pos + delimiter.len_utf8()]
    ))
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
