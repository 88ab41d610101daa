use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::AppError;
use crate::profile;
use crate::quota::{self, QuotaEngine};
use crate::session::SessionResolver;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/v1/user/profile",
            get(profile::get_profile).patch(profile::update_profile),
        )
        .route(
            "/api/v1/user/subscription",
            get(quota::quota_get_subscription),
        )
        .route("/api/v1/user/usage", get(quota::quota_get_usage))
        .route(
            "/api/v1/user/usage/history",
            get(quota::quota_usage_history),
        )
        .route("/api/v1/user/limits", get(quota::quota_check_limits))
        .route(
            "/api/v1/user/generations",
            post(quota::quota_record_generation)
                .route_layer(middleware::from_fn(quota::require_quota)),
        )
}

/// The application router with the engine and session resolver installed.
/// Profile routes additionally expect a `PgPool` extension.
pub fn router(engine: Arc<QuotaEngine>, sessions: Arc<dyn SessionResolver>) -> Router {
    api_routes()
        .fallback(not_found)
        .layer(Extension(engine))
        .layer(Extension(sessions))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "API is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}
