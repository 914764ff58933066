//! Represents an entry (file or pseudo-directory) returned by a bucket listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator used to express hierarchy inside a flat key namespace.
pub const SEPARATOR: char = '/';

/// Metadata key under which the public download token is stored.
pub const TOKEN_KEY: &str = "firebaseStorageDownloadTokens";

/// A single blob, or a directory grouping, within a bucket.
///
/// Entries are snapshots handed out by an object store. Nothing in this crate
/// mutates them; operations such as rename produce new entries instead.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlobEntry {
    /// Name of the bucket holding this blob.
    pub bucket: String,

    /// Full object key (path-like identifier within the bucket).
    pub key: String,

    /// True when the key ends with the separator.
    pub is_directory: bool,

    /// Size in bytes. Zero for directory groupings.
    pub size: u64,

    /// Content type (MIME type), if the backend recorded one.
    pub content_type: Option<String>,

    /// User metadata attached to the object.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Base64-encoded MD5 digest of the payload.
    pub md5_hash: Option<String>,

    /// Last time the object was written.
    pub updated: Option<DateTime<Utc>>,
}

impl BlobEntry {
    /// Build a directory grouping entry, as reported for common prefixes.
    pub fn directory(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            is_directory: true,
            size: 0,
            content_type: None,
            metadata: BTreeMap::new(),
            md5_hash: None,
            updated: None,
        }
    }

    /// The download token carried in metadata, if any non-blank one exists.
    pub fn download_token(&self) -> Option<&str> {
        self.metadata
            .get(TOKEN_KEY)
            .map(String::as_str)
            .filter(|token| !token.trim().is_empty())
    }
}

/// Whether a key denotes a directory grouping.
pub fn is_directory_key(key: &str) -> bool {
    key.ends_with(SEPARATOR)
}

/// Either a bare key or an entry that was already fetched.
///
/// Operations that accept a `BlobRef` fetch the entry first when given a key,
/// so a missing blob surfaces as `NoSuchBlob` before any side effect.
#[derive(Clone, Copy, Debug)]
pub enum BlobRef<'a> {
    Key(&'a str),
    Entry(&'a BlobEntry),
}

impl BlobRef<'_> {
    pub fn key(&self) -> &str {
        match self {
            BlobRef::Key(key) => key,
            BlobRef::Entry(entry) => &entry.key,
        }
    }
}

impl<'a> From<&'a str> for BlobRef<'a> {
    fn from(key: &'a str) -> Self {
        BlobRef::Key(key)
    }
}

impl<'a> From<&'a String> for BlobRef<'a> {
    fn from(key: &'a String) -> Self {
        BlobRef::Key(key)
    }
}

impl<'a> From<&'a BlobEntry> for BlobRef<'a> {
    fn from(entry: &'a BlobEntry) -> Self {
        BlobRef::Entry(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_keys_end_with_separator() {
        assert!(is_directory_key("a/b/"));
        assert!(!is_directory_key("a/b"));
        assert!(!is_directory_key(""));
    }

    #[test]
    fn blank_tokens_are_ignored() {
        let mut entry = BlobEntry::directory("bucket", "a/");
        assert_eq!(entry.download_token(), None);

        entry.metadata.insert(TOKEN_KEY.into(), "  ".into());
        assert_eq!(entry.download_token(), None);

        entry.metadata.insert(TOKEN_KEY.into(), "abc".into());
        assert_eq!(entry.download_token(), Some("abc"));
    }
}
