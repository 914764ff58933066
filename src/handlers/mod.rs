//! HTTP handlers for the local media endpoint and health probes.

use crate::services::{blob_navigator::BlobNavigator, local_store::LocalObjectStore};

pub mod health_handlers;
pub mod media_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub navigator: BlobNavigator,
    /// Concrete backend, used where a streaming reader is needed.
    pub store: LocalObjectStore,
}
