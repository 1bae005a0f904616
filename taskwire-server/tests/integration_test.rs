//! End-to-end facade tests driven through the real Axum router via
//! `tower::ServiceExt::oneshot`, against a live Redis. Ignored by default,
//! mirroring `ferrex-server/tests/integration_test.rs`'s
//! `#[ignore = "requires server running"]` convention for tests that need an
//! external dependency the default `cargo test` run shouldn't require.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use taskwire_broker::RedisBroker;
use taskwire_core::RedisStore;
use taskwire_server::{router, AppState};

async fn test_state() -> AppState {
    let redis_url =
        std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    AppState {
        store: RedisStore::connect(&redis_url).await.expect("connect to test redis"),
        broker: RedisBroker::connect(&redis_url).await.expect("connect to test redis"),
        tz: chrono_tz::UTC,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
#[ignore = "requires a running Redis at TEST_REDIS_URL"]
async fn insert_then_get_then_delete_round_trips() {
    let app = router(test_state().await);

    let insert_body = json!({
        "request": {"method": "GET", "url": "http://httpbin.org/get"}
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/apps/inttest/taskqueues/default/tasks")
                .header("content-type", "application/json")
                .body(Body::from(insert_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let inserted = body_json(response).await;
    assert_eq!(inserted["status"], "enqueued");
    let id = inserted["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/apps/inttest/taskqueues/default/tasks/id:{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/apps/inttest/taskqueues/default/tasks/id:{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/apps/inttest/taskqueues/default/tasks/id:{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires a running Redis at TEST_REDIS_URL"]
async fn malformed_json_body_is_a_parse_error() {
    let app = router(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/apps/inttest/taskqueues/default/tasks")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], 200_100);
}

#[tokio::test]
#[ignore = "requires a running Redis at TEST_REDIS_URL"]
async fn short_cname_lookup_is_not_found() {
    let app = router(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/apps/inttest/taskqueues/default/tasks/cname:aa")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
