mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use blob_helper::{handlers::AppState, routes::routes::routes};
use common::{BUCKET, local_store, navigator};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn app() -> (axum::Router, AppState, TempDir) {
    let (store, dir) = local_store().await;
    let state = AppState {
        navigator: navigator(Arc::new(store.clone())),
        store,
    };
    (routes().with_state(state.clone()), state, dir)
}

async fn get(app: &axum::Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn path_of(url: &str) -> &str {
    let rest = url.strip_prefix("https://").unwrap();
    &rest[rest.find('/').unwrap()..]
}

#[tokio::test]
async fn healthz_is_ok() {
    let (app, _state, _dir) = app().await;
    let res = get(&app, "/healthz").await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn readyz_checks_sqlite_disk_and_bucket() {
    let (app, _state, _dir) = app().await;
    let res = get(&app, "/readyz").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value =
        serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
    assert_eq!(body["checks"]["bucket"]["ok"], true);
}

#[tokio::test]
async fn download_url_serves_the_blob_body() {
    let (app, state, dir) = app().await;
    let file = dir.path().join("report.csv");
    std::fs::write(&file, b"a,b\n1,2\n").unwrap();
    let entry = state
        .navigator
        .upload("reports/2021/report.csv", &file, None)
        .await
        .unwrap();

    let url = state.navigator.download_url(&entry);
    let res = get(&app, path_of(&url)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "text/csv");
    assert_eq!(res.headers()[header::CONTENT_LENGTH], "8");
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"a,b\n1,2\n");
}

#[tokio::test]
async fn wrong_or_missing_token_is_forbidden() {
    let (app, state, dir) = app().await;
    let file = dir.path().join("secret.txt");
    std::fs::write(&file, b"shh").unwrap();
    let entry = state
        .navigator
        .upload("private/secret.txt", &file, None)
        .await
        .unwrap();

    let without_token = state.navigator.url_for(&entry.key);
    assert_eq!(get(&app, path_of(&without_token)).await.status(), StatusCode::FORBIDDEN);

    let wrong = format!("{}&token=not-it", path_of(&without_token));
    assert_eq!(get(&app, &wrong).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn without_alt_media_returns_metadata() {
    let (app, state, dir) = app().await;
    let file = dir.path().join("pic.png");
    std::fs::write(&file, [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00]).unwrap();
    let entry = state.navigator.upload("pics/pic.png", &file, None).await.unwrap();
    let token = entry.download_token().unwrap().to_string();

    let uri = format!("/v0/b/{}/o/pics%2Fpic.png?token={}", BUCKET, token);
    let res = get(&app, &uri).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value =
        serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["name"], "pics/pic.png");
    assert_eq!(body["contentType"], "image/png");
    assert_eq!(body["size"], "9");
    assert_eq!(body["downloadTokens"], token.as_str());
}

#[tokio::test]
async fn unknown_blob_or_bucket_is_not_found() {
    let (app, _state, _dir) = app().await;
    let missing_blob = format!("/v0/b/{}/o/nope.txt?alt=media", BUCKET);
    assert_eq!(get(&app, &missing_blob).await.status(), StatusCode::NOT_FOUND);

    let other_bucket = "/v0/b/other-bucket/o/nope.txt?alt=media";
    assert_eq!(get(&app, other_bucket).await.status(), StatusCode::NOT_FOUND);
}
