use std::sync::Arc;

use assert_json_diff::assert_json_include;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use time::Duration;
use tower::ServiceExt;

use inbox::auth::{hash_token, ApiKey, MemoryKeyRegistry};
use inbox::dedup::DedupCache;
use inbox::limiter::SlidingWindowLimiter;
use inbox::router::router;
use inbox::service::ServiceSettings;
use inbox::store::MemoryStore;
use inbox::time::SystemTime;

const TOKEN: &str = "test-token-0000000000000000000000000000000000000000000000000000";

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
}

fn test_app_with_rate_limit(rate_limit: u32) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let keys = Arc::new(MemoryKeyRegistry::new(vec![ApiKey {
        key_id: "test-key".to_string(),
        token_hash: hash_token(TOKEN),
        rate_limit,
    }]));
    let dedup = Arc::new(DedupCache::new(Duration::seconds(300)));
    let limiter = Arc::new(SlidingWindowLimiter::new());

    let app = router(
        SystemTime {},
        store.clone(),
        keys,
        dedup,
        limiter,
        ServiceSettings::default(),
        false,
    );

    TestApp { app, store }
}

fn test_app() -> TestApp {
    test_app_with_rate_limit(1000)
}

impl TestApp {
    async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post_event(&self, body: Value) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

#[tokio::test]
async fn index_responds() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"inbox");
}

#[tokio::test]
async fn status_needs_no_auth() {
    let harness = test_app();

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn rejects_missing_and_unknown_tokens() {
    let harness = test_app();

    let (status, body) = harness
        .request(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"event_type": "t", "payload": {}}).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");

    let (status, body) = harness
        .request(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"event_type": "t", "payload": {}}).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn rejects_malformed_authorization_header() {
    let harness = test_app();

    let (status, body) = harness
        .request(
            Request::builder()
                .method("GET")
                .uri("/events/inbox")
                .header(header::AUTHORIZATION, TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_json_include!(
        actual: body,
        expected: json!({"status": "error", "error_code": "UNAUTHORIZED"})
    );
}

#[tokio::test]
async fn ingests_an_event() {
    let harness = test_app();

    let (status, body) = harness
        .post_event(json!({
            "event_type": "user.signup",
            "payload": {"user_id": "123", "email": "user@example.com"},
            "source": "web-app"
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert!(body["event_id"].is_string());
    assert!(body["timestamp"].is_string());
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn duplicate_submission_is_indistinguishable_but_collapsed() {
    let harness = test_app();
    let event = json!({"event_type": "order.created", "payload": {"id": 1}});

    let (_, first) = harness.post_event(event.clone()).await;
    let (status, second) = harness.post_event(event).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "accepted");
    assert_eq!(second["event_id"], first["event_id"]);
    assert_eq!(second["message"], first["message"]);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn validation_errors_name_the_field() {
    let harness = test_app();

    let (status, body) = harness
        .post_event(json!({"event_type": "", "payload": {}}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_include!(
        actual: body,
        expected: json!({
            "status": "error",
            "error_code": "VALIDATION_ERROR",
            "details": {"field": "event_type"}
        })
    );
}

#[tokio::test]
async fn oversized_payload_is_rejected_with_413() {
    let harness = test_app();

    let (status, body) = harness
        .post_event(json!({
            "event_type": "blob.created",
            "payload": {"blob": "x".repeat(257 * 1024)}
        }))
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error_code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(harness.store.len(), 0);
}

#[tokio::test]
async fn inbox_pages_chain_through_cursors() {
    let harness = test_app();

    for i in 0..5 {
        let (status, _) = harness
            .post_event(json!({"event_type": "order.created", "payload": {"id": i}}))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let mut seen = Vec::new();
    let mut uri = "/events/inbox?limit=2".to_string();

    loop {
        let (status, body) = harness.get(&uri).await;
        assert_eq!(status, StatusCode::OK);

        for event in body["events"].as_array().unwrap() {
            seen.push((
                event["timestamp"].as_str().unwrap().to_string(),
                event["event_id"].as_str().unwrap().to_string(),
            ));
        }

        let pagination = &body["pagination"];
        if pagination["has_more"].as_bool().unwrap() {
            let cursor = pagination["next_cursor"].as_str().unwrap();
            uri = format!("/events/inbox?limit=2&cursor={cursor}");
        } else {
            assert!(pagination["next_cursor"].is_null());
            break;
        }
    }

    assert_eq!(seen.len(), 5);
    let mut deduped = seen.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 5, "no event may appear twice across pages");
    assert_eq!(
        seen, deduped,
        "pages must arrive in ascending (timestamp, event_id) order"
    );
}

#[tokio::test]
async fn inbox_rejects_oversized_limit_and_bad_cursor() {
    let harness = test_app();

    let (status, body) = harness.get("/events/inbox?limit=300").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert_eq!(body["details"]["field"], "limit");

    let (status, body) = harness.get("/events/inbox?cursor=%40%40garbage").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "cursor");
    assert_eq!(body["message"], "invalid or expired cursor");
}

#[tokio::test]
async fn event_lifecycle_ingest_fetch_acknowledge() {
    let harness = test_app();

    let (_, created) = harness
        .post_event(json!({"event_type": "user.signup", "payload": {"user_id": "123"}}))
        .await;
    let event_id = created["event_id"].as_str().unwrap();
    let timestamp = created["timestamp"].as_str().unwrap();

    let uri = format!("/events/{event_id}?occurred_at={timestamp}");

    let (status, body) = harness.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_json_include!(
        actual: body,
        expected: json!({
            "status": "success",
            "event_id": event_id,
            "event_type": "user.signup",
            "delivered": false
        })
    );

    let (status, _) = harness.delete(&uri).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Acknowledgment is idempotent.
    let (status, _) = harness.delete(&uri).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = harness.get(&uri).await;
    assert_eq!(body["delivered"], true);

    let (_, inbox) = harness.get("/events/inbox").await;
    assert!(inbox["events"].as_array().unwrap().is_empty());
    assert_eq!(inbox["pagination"]["has_more"], false);
}

#[tokio::test]
async fn unknown_event_is_404() {
    let harness = test_app();

    let uri = format!(
        "/events/{}?occurred_at=2025-11-11T12:00:00.000000Z",
        uuid::Uuid::now_v7()
    );

    let (status, body) = harness.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "NOT_FOUND");

    let (status, _) = harness.delete(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rate_limited_requests_get_retry_after() {
    let harness = test_app_with_rate_limit(2);

    for _ in 0..2 {
        let (status, _) = harness.get("/events/inbox").await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/events/inbox")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .expect("429 must carry a Retry-After header");
    assert!((1..=60).contains(&retry_after));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error_code"], "RATE_LIMIT_EXCEEDED");
}
