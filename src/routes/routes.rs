//! Defines routes for the local download endpoint.
//!
//! - `GET /healthz`, `GET /readyz`: probes
//! - `GET /v0/b/{bucket}/o/{key}`: blob metadata, or the body with `alt=media`
//!
//! `{key}` is a single percent-encoded segment such as
//! `photos%2F2025%2Fimg.jpg`; axum decodes it back to `photos/2025/img.jpg`.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    media_handlers::get_media,
};
use axum::{Router, routing::get};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v0/b/{bucket}/o/{key}", get(get_media))
}
