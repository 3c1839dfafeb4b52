//! Black-box tests against the HTTP Dispatcher, driven in-process via
//! `tower::ServiceExt::oneshot` (no real socket, no bound port).

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use shard_lib::repo::volume::LocalVolume;
use shard_lib::repo::volume::Volume;
use shard_lib::ShardSpec;
use tower::ServiceExt;

#[path = "../src/http/mod.rs"]
#[allow(dead_code)]
mod http;
#[path = "../src/peer_sync.rs"]
#[allow(dead_code)]
mod peer_sync;

fn new_state() -> (tempfile::TempDir, http::AppState) {
    let dir = tempfile::tempdir().unwrap();
    let volume: Arc<dyn Volume> = Arc::new(LocalVolume::new(dir.path()));
    let shard_spec = ShardSpec::new(0, 1).unwrap();
    let state = http::AppState::new(shard_spec, volume, vec![]);
    (dir, state)
}

#[tokio::test]
async fn ping_responds_pong() {
    let (_dir, state) = new_state();
    let app = http::router(state);
    let response = app
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"pong\n");
}

#[tokio::test]
async fn create_branch_then_write_and_read_a_file() {
    let (_dir, state) = new_state();
    state.data_store().ensure().await.unwrap();
    let app = http::router(state);

    let response = app
        .clone()
        .oneshot(
            Request::post("/branch?branch=master")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::post("/file/a.txt?branch=master")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/file/a.txt?branch=master")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"hello");
}

#[tokio::test]
async fn reading_a_missing_file_is_not_found() {
    let (_dir, state) = new_state();
    state.data_store().ensure().await.unwrap();
    state.data_store().branch(None, &Default::default()).await.unwrap();
    let app = http::router(state);

    let response = app
        .oneshot(
            Request::get("/file/missing.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn commit_then_list_commits_round_trips() {
    let (_dir, state) = new_state();
    state.data_store().ensure().await.unwrap();
    let app = http::router(state);

    app.clone()
        .oneshot(
            Request::post("/branch?branch=master")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::post("/commit?branch=master&commit=c1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/commit").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("\"Name\":\"c1\""));
}
