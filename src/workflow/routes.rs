use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::extractor::AuthUser;
use crate::notifications::notify;

use super::{
    CreateSubscriptionRequest, Decision, DecisionRequest, ListFilter, PaymentRequest,
    RenewSubscriptionRequest, Subscription, WorkflowEngine, WorkflowError,
};

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route("/api/subscriptions/alerts", get(renewal_alerts))
        .route("/api/subscriptions/:id", get(get_subscription))
        .route("/api/subscriptions/:id/hod-decision", post(hod_decision))
        .route(
            "/api/subscriptions/:id/finance-decision",
            post(finance_decision),
        )
        .route("/api/subscriptions/:id/payment", post(record_payment))
        .route("/api/subscriptions/:id/renew", post(renew_subscription))
}

async fn list_subscriptions(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Subscription>>, (StatusCode, String)> {
    let actor = user.into_actor();
    let today = Utc::now().date_naive();
    engine
        .list_for_actor(&pool, &actor, filter)
        .await
        .map(|records| {
            Json(
                records
                    .into_iter()
                    .map(|record| record.with_effective_status(today))
                    .collect(),
            )
        })
        .map_err(map_error)
}

async fn get_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, (StatusCode, String)> {
    let today = Utc::now().date_naive();
    engine
        .fetch(&pool, id)
        .await
        .map(|record| Json(record.with_effective_status(today)))
        .map_err(map_error)
}

async fn create_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), (StatusCode, String)> {
    let actor = user.into_actor();
    let record = engine
        .create_request(&pool, &actor, payload)
        .await
        .map_err(map_error)?;
    notify(
        &pool,
        record.requested_by,
        &format!("Your request for {} has been submitted.", record.tool_name),
    )
    .await
    .ok();
    Ok((StatusCode::CREATED, Json(record)))
}

async fn hod_decision(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<Subscription>, (StatusCode, String)> {
    let actor = user.into_actor();
    let record = engine
        .hod_decision(&pool, &actor, id, payload.decision, payload.reason.as_deref())
        .await
        .map_err(map_error)?;
    let message = match payload.decision {
        Decision::Approve => format!(
            "Your request for {} has been approved by the HOD.",
            record.tool_name
        ),
        Decision::Decline => format!(
            "Your request for {} has been declined by HOD. Reason: {}",
            record.tool_name,
            payload.reason.as_deref().unwrap_or_default().trim()
        ),
    };
    notify(&pool, record.requested_by, &message).await.ok();
    Ok(Json(record))
}

async fn finance_decision(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<Subscription>, (StatusCode, String)> {
    let actor = user.into_actor();
    let record = engine
        .finance_decision(&pool, &actor, id, payload.decision, payload.reason.as_deref())
        .await
        .map_err(map_error)?;
    let message = match payload.decision {
        Decision::Approve => format!(
            "Your request for {} has been approved by Finance.",
            record.tool_name
        ),
        Decision::Decline => format!(
            "Your request for {} has been declined by Finance. Reason: {}",
            record.tool_name,
            payload.reason.as_deref().unwrap_or_default().trim()
        ),
    };
    notify(&pool, record.requested_by, &message).await.ok();
    Ok(Json(record))
}

async fn record_payment(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentRequest>,
) -> Result<Json<Subscription>, (StatusCode, String)> {
    let actor = user.into_actor();
    let record = engine
        .record_payment(&pool, &actor, id, payload)
        .await
        .map_err(map_error)?;
    notify(
        &pool,
        record.requested_by,
        &format!(
            "Payment for {} has been completed. Your subscription is now active.",
            record.tool_name
        ),
    )
    .await
    .ok();
    Ok(Json(record))
}

async fn renew_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RenewSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), (StatusCode, String)> {
    let actor = user.into_actor();
    let record = engine
        .renew(&pool, &actor, id, payload)
        .await
        .map_err(map_error)?;
    notify(
        &pool,
        record.requested_by,
        &format!(
            "Your renewal request for {} has been submitted.",
            record.tool_name
        ),
    )
    .await
    .ok();
    Ok((StatusCode::CREATED, Json(record)))
}

async fn renewal_alerts(
    Extension(pool): Extension<PgPool>,
    Extension(engine): Extension<Arc<WorkflowEngine>>,
    user: AuthUser,
) -> Result<Json<Vec<Subscription>>, (StatusCode, String)> {
    let actor = user.into_actor();
    let today = Utc::now().date_naive();
    engine
        .renewal_alerts(&pool, &actor, today)
        .await
        .map(Json)
        .map_err(map_error)
}

fn map_error(err: WorkflowError) -> (StatusCode, String) {
    match err {
        WorkflowError::NotFound => (StatusCode::NOT_FOUND, "subscription not found".into()),
        WorkflowError::Unauthorized(_) => (StatusCode::FORBIDDEN, err.to_string()),
        WorkflowError::InvalidTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        WorkflowError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        WorkflowError::Database(e) => {
            error!(?e, "workflow database error");
            (StatusCode::INTERNAL_SERVER_ERROR, "database error".into())
        }
    }
}
