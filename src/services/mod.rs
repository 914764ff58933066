//! Services layered over an object store: the pure name codec, content
//! classification, the navigator itself and a local SQLite/disk backend.

pub mod blob_navigator;
pub mod classifier;
pub mod local_store;
pub mod name_codec;
pub mod object_store;
