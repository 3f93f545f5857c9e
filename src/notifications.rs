use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i32,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// In-app notification written alongside workflow transitions. Failures are
/// logged by callers and never fail the triggering operation.
pub async fn notify(pool: &PgPool, user_id: i32, message: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO notifications (user_id, message) VALUES ($1, $2)")
        .bind(user_id)
        .bind(message)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_notifications(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<Notification>>> {
    let records = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(records))
}

pub async fn mark_read(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
