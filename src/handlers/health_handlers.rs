//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness: SQLite round trip, disk write/read/delete
//!   and a listing of the configured bucket

use crate::{handlers::AppState, models::SearchPolicy};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`: 200 when every check passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", CheckStatus::from(check_sqlite(&state).await));
    checks.insert("disk", CheckStatus::from(check_disk(&state).await));
    checks.insert("bucket", CheckStatus::from(check_bucket(&state).await));

    let ready = checks.values().all(|check| check.ok);
    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };

    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

async fn check_sqlite(state: &AppState) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.store.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

async fn check_disk(state: &AppState) -> Result<(), String> {
    let probe = state
        .store
        .base_path
        .join(format!(".readyz-{}", Uuid::new_v4()));

    let result = async {
        fs::write(&probe, b"readyz")
            .await
            .map_err(|e| format!("could not write tmp file: {}", e))?;
        let bytes = fs::read(&probe)
            .await
            .map_err(|e| format!("could not read tmp file: {}", e))?;
        if bytes != b"readyz" {
            return Err("file content mismatch".to_string());
        }
        Ok::<(), String>(())
    }
    .await;

    let _ = fs::remove_file(&probe).await;
    result
}

async fn check_bucket(state: &AppState) -> Result<(), String> {
    state
        .navigator
        .list_blobs("", SearchPolicy::Directories)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}
