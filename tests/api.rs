use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use podcast_backend::quota::{InMemoryUsageStore, Plan, PlanLimitTable, QuotaEngine};
use podcast_backend::routes;
use podcast_backend::session::{Identity, SessionError, SessionResolver};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

struct HeaderSession;

#[async_trait]
impl SessionResolver for HeaderSession {
    async fn resolve_session(&self, headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        Ok(headers
            .get("x-test-user")
            .and_then(|value| value.to_str().ok())
            .map(|user| Identity {
                user_id: user.to_string(),
                email: format!("{user}@example.com"),
                name: user.to_string(),
            }))
    }
}

async fn app_with(podcasts: i32, minutes: i32) -> Router {
    let store = Arc::new(InMemoryUsageStore::new());
    let engine = Arc::new(QuotaEngine::new(store.clone(), PlanLimitTable::default()));
    let mut subscription = engine
        .provision_subscription("tenant", Plan::Free, Utc::now())
        .await
        .unwrap();
    subscription.current_podcast_count = podcasts;
    subscription.current_minutes_used = minutes;
    store.seed(subscription);
    routes::router(engine, Arc::new(HeaderSession))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-test-user", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_generation(user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/user/generations")
        .header("x-test-user", user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_responds_ok() {
    let app = app_with(0, 0).await;
    let (status, body) = send(&app, get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "API is running");
}

#[tokio::test]
async fn unknown_route_uses_error_envelope() {
    let app = app_with(0, 0).await;
    let (status, body) = send(&app, get("/api/v2/nothing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"success": false, "error": "Route not found"}));
}

#[tokio::test]
async fn protected_route_requires_session() {
    let app = app_with(0, 0).await;
    let (status, body) = send(&app, get("/api/v1/user/usage", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn usage_reflects_exhausted_podcasts() {
    let app = app_with(5, 3).await;
    let (status, body) = send(&app, get("/api/v1/user/usage", Some("tenant"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["currentPeriod"]["podcastsUsed"], 5);
    assert_eq!(body["data"]["currentPeriod"]["podcastsLimit"], 5);
    assert_eq!(body["data"]["currentPeriod"]["minutesUsed"], 3);
    assert_eq!(body["data"]["subscription"]["plan"], "FREE");
    assert_eq!(body["data"]["subscription"]["status"], "ACTIVE");
}

#[tokio::test]
async fn missing_subscription_is_404() {
    let app = app_with(0, 0).await;
    let (status, body) = send(&app, get("/api/v1/user/subscription", Some("stranger"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Subscription not found");
}

#[tokio::test]
async fn subscription_is_returned_in_envelope() {
    let app = app_with(1, 2).await;
    let (status, body) = send(&app, get("/api/v1/user/subscription", Some("tenant"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["userId"], "tenant");
    assert_eq!(body["data"]["currentPodcastCount"], 1);
    assert_eq!(body["data"]["monthlyMinutesLimit"], 25);
}

#[tokio::test]
async fn limits_preflight_reports_decision() {
    let app = app_with(5, 0).await;
    let (status, body) = send(&app, get("/api/v1/user/limits", Some("tenant"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allowed"], false);
    assert_eq!(body["data"]["reason"], "Monthly podcast limit reached (5)");
}

#[tokio::test]
async fn gate_rejects_exhausted_tenant() {
    let app = app_with(5, 0).await;
    let (status, body) = send(
        &app,
        post_generation("tenant", json!({"podcastId": "p1", "minutes": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({
            "success": false,
            "error": "Subscription limit reached",
            "details": {
                "reason": "Monthly podcast limit reached (5)",
                "current": {"podcasts": 5, "minutes": 0},
                "limits": {"podcasts": 5, "minutes": 25}
            }
        })
    );
}

#[tokio::test]
async fn generation_commits_usage() {
    let app = app_with(0, 0).await;
    let (status, body) = send(
        &app,
        post_generation("tenant", json!({"podcastId": "p1", "minutes": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["usage"], json!({"podcasts": 1, "minutes": 12}));
    assert_eq!(body["data"]["record"]["amount"], 12);
    assert_eq!(body["data"]["record"]["type"], "generation_minutes");

    let (_, history) = send(&app, get("/api/v1/user/usage/history", Some("tenant"))).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn commit_refuses_minutes_past_limit_after_gate() {
    let app = app_with(1, 20).await;
    let (status, body) = send(
        &app,
        post_generation("tenant", json!({"podcastId": "p2", "minutes": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["details"]["reason"],
        "Monthly minutes limit reached (25)"
    );

    let (_, usage) = send(&app, get("/api/v1/user/usage", Some("tenant"))).await;
    assert_eq!(usage["data"]["currentPeriod"]["minutesUsed"], 20);
    assert_eq!(usage["data"]["currentPeriod"]["podcastsUsed"], 1);
}

#[tokio::test]
async fn negative_minutes_are_bad_request() {
    let app = app_with(0, 0).await;
    let (status, body) = send(
        &app,
        post_generation("tenant", json!({"podcastId": "p1", "minutes": -5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_generation_body_uses_error_envelope() {
    let app = app_with(0, 0).await;
    let (status, body) = send(&app, post_generation("tenant", json!({"minutes": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("podcastId"));

    let (status, body) = send(
        &app,
        post_generation("tenant", json!({"podcastId": "p1", "minutes": "ten"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, usage) = send(&app, get("/api/v1/user/usage", Some("tenant"))).await;
    assert_eq!(usage["data"]["currentPeriod"]["podcastsUsed"], 0);
}

#[tokio::test]
async fn malformed_history_query_uses_error_envelope() {
    let app = app_with(0, 0).await;
    let (status, body) = send(
        &app,
        get("/api/v1/user/usage/history?since=yesterday", Some("tenant")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let app = app_with(0, 0).await;
    for uri in ["/api/health", "/api/v2/nothing"] {
        let response = app.clone().oneshot(get(uri, None)).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
    }
}
