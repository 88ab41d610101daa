use axum::{extract::rejection::JsonRejection, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::response::ApiResponse;

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfile {
    #[serde(default)]
    pub name: Option<String>,
    /// An empty string clears the image.
    #[serde(default)]
    pub image: Option<String>,
}

impl UpdateProfile {
    fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::BadRequest("Name cannot be empty".into()));
            }
        }
        Ok(())
    }
}

pub async fn get_profile(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<ApiResponse<Profile>>> {
    let profile = sqlx::query_as::<_, Profile>(
        "SELECT id, name, email, image, created_at FROM users WHERE id = $1",
    )
    .bind(&user_id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error fetching profile");
        AppError::Db(e)
    })?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(ApiResponse::ok(profile))
}

pub async fn update_profile(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    payload: Result<Json<UpdateProfile>, JsonRejection>,
) -> AppResult<Json<ApiResponse<Profile>>> {
    let Json(payload) = payload?;
    payload.validate()?;
    let profile = sqlx::query_as::<_, Profile>(
        r#"
        UPDATE users SET
            name = COALESCE($2, name),
            image = CASE WHEN $3::text IS NULL THEN image ELSE NULLIF($3, '') END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, name, email, image, created_at
        "#,
    )
    .bind(&user_id)
    .bind(payload.name.as_deref().map(str::trim))
    .bind(payload.image.as_deref().map(str::trim))
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error updating profile");
        AppError::Db(e)
    })?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    tracing::info!(user_id = %user_id, "profile updated");
    Ok(ApiResponse::ok(profile))
}
