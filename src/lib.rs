//! Convenience layer over a bucket of named blobs.
//!
//! [`BlobNavigator`] lists, fetches, uploads, moves, renames and deletes blobs
//! through an [`ObjectStore`], and derives public download URLs of the form
//! `https://{host}/v0/b/{bucket}/o/{encodedKey}?alt=media&token={token}`.
//! [`LocalObjectStore`] is a SQLite + disk backend suitable for local use.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use errors::{HelperError, HelperResult};
pub use models::{BlobEntry, BlobRef, SearchPolicy};
pub use services::{
    blob_navigator::BlobNavigator,
    classifier::{ContentClassifier, MimeRegistry},
    local_store::LocalObjectStore,
    object_store::{ObjectStore, StoreError, StoreResult, WriteChannel},
};
