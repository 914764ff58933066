//! Core data models for the blob helper.
//!
//! These values describe what an object store hands back from a listing or a
//! fetch, plus the small selectors callers use to filter listings.

pub mod blob;
pub mod search_policy;

pub use blob::{BlobEntry, BlobRef, SEPARATOR, TOKEN_KEY, is_directory_key};
pub use search_policy::SearchPolicy;
