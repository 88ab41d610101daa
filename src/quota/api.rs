use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query,
    },
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ConsumeDecision, Consumption, LimitCheckResult, QuotaEngine, Subscription, UsageCounters,
    UsageRecord, UsageSummary,
};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::response::ApiResponse;

// key: quota-api -> tenant facing endpoints
pub async fn get_subscription(
    Extension(engine): Extension<Arc<QuotaEngine>>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<ApiResponse<Subscription>>> {
    let subscription = engine.get_subscription(&user_id).await?;
    Ok(ApiResponse::ok(subscription))
}

pub async fn get_usage(
    Extension(engine): Extension<Arc<QuotaEngine>>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<ApiResponse<UsageSummary>>> {
    let usage = engine.get_usage(&user_id).await?;
    Ok(ApiResponse::ok(usage))
}

pub async fn check_limits(
    Extension(engine): Extension<Arc<QuotaEngine>>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<ApiResponse<LimitCheckResult>>> {
    let result = engine.check_limits(&user_id).await?;
    Ok(ApiResponse::ok(result))
}

pub async fn usage_history(
    Extension(engine): Extension<Arc<QuotaEngine>>,
    AuthUser { user_id, .. }: AuthUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Vec<UsageRecord>>>> {
    let Query(query) = query?;
    let records = engine.usage_history(&user_id, query.since).await?;
    Ok(ApiResponse::ok(records))
}

/// Commits one generated podcast and its minutes. Runs behind
/// [`require_quota`], and the commit itself re-evaluates the limits under the
/// store lock so a request that raced past the gate is still refused.
pub async fn record_generation(
    Extension(engine): Extension<Arc<QuotaEngine>>,
    AuthUser { user_id, .. }: AuthUser,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<GenerationReceipt>>)> {
    let Json(payload) = payload?;
    if payload.podcast_id.trim().is_empty() {
        return Err(AppError::BadRequest("podcastId required".into()));
    }
    let consumption = Consumption::generation(payload.podcast_id, payload.minutes);
    match engine.consume(&user_id, &consumption).await? {
        ConsumeDecision::Admitted {
            subscription,
            record,
        } => Ok((
            StatusCode::CREATED,
            ApiResponse::ok(GenerationReceipt {
                record,
                usage: subscription.usage(),
            }),
        )),
        ConsumeDecision::Denied(result) => Err(AppError::LimitExceeded(result)),
    }
}

// key: quota-admission-gate -> 403 before metered handlers run
pub async fn require_quota(
    Extension(engine): Extension<Arc<QuotaEngine>>,
    AuthUser { user_id, .. }: AuthUser,
    request: Request<Body>,
    next: Next<Body>,
) -> AppResult<Response> {
    let result = engine.check_limits(&user_id).await?;
    if !result.allowed {
        return Err(AppError::LimitExceeded(result));
    }
    Ok(next.run(request).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub podcast_id: String,
    #[serde(default)]
    pub minutes: i32,
}

#[derive(Debug, Serialize)]
pub struct GenerationReceipt {
    pub record: Option<UsageRecord>,
    pub usage: UsageCounters,
}
