//! Subscription routes: a member's own view under `/api/members/me`, and
//! the admin management endpoints under `/api/admin/members/{id}`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::auth::AuthUser;
use super::users::user_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::{Subscription, SubscriptionHistory};
use crate::services::audit::{self, AuditEntry};
use crate::services::subscriptions::{self, SubscriptionError};
use crate::state::AppState;

pub(crate) fn subscription_error_to_status(err: &SubscriptionError) -> StatusCode {
    match err {
        SubscriptionError::NotFound(_) => StatusCode::NOT_FOUND,
        SubscriptionError::AlreadySubscribed | SubscriptionError::NotCancellable(_) => StatusCode::CONFLICT,
        SubscriptionError::Invalid(_) => StatusCode::BAD_REQUEST,
        SubscriptionError::User(e) => user_error_to_status(e),
        SubscriptionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn subscription_error(err: SubscriptionError) -> ApiError {
    ApiError::from_error(subscription_error_to_status(&err), &err)
}

// =============================================================================
// MEMBER SELF SERVICE
// =============================================================================

/// `GET /api/members/me/subscription`: the ACTIVE pass, or `null`.
pub async fn my_subscription(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Option<Subscription>>> {
    let me = auth.resolve(&state.pool).await?;
    Ok(Json(subscriptions::active_for_user(&state.pool, me.id).await.map_err(subscription_error)?))
}

/// `GET /api/members/me/subscription/history`
pub async fn my_subscription_history(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<SubscriptionHistory>>> {
    let me = auth.resolve(&state.pool).await?;
    Ok(Json(subscriptions::history_for_user(&state.pool, me.id).await.map_err(subscription_error)?))
}

// =============================================================================
// ADMIN
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    #[serde(default)]
    pub initial_payment_cents: i64,
    pub months: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

/// `POST /api/admin/members/{id}/subscription`
pub async fn create_for_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Json(input): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    auth.require_admin()?;
    let admin = auth.resolve(&state.pool).await?;
    let today = OffsetDateTime::now_utc().date();
    let created = subscriptions::create(&state.pool, member_id, input.initial_payment_cents, input.months, today)
        .await
        .map_err(subscription_error)?;
    let entry = AuditEntry::new(admin.id, "SUBSCRIPTION_CREATED", "SUBSCRIPTION", created.id).with_metadata(
        serde_json::json!({ "userId": member_id, "months": input.months, "status": created.status }),
    );
    audit::record_best_effort(&state.pool, &entry).await;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/admin/members/{id}/subscription`: every pass, newest first.
pub async fn list_for_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Subscription>>> {
    auth.require_admin()?;
    Ok(Json(subscriptions::list_for_user(&state.pool, member_id).await.map_err(subscription_error)?))
}

/// `GET /api/admin/members/{id}/subscription/history`
pub async fn history_for_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubscriptionHistory>>> {
    auth.require_admin()?;
    Ok(Json(subscriptions::history_for_user(&state.pool, member_id).await.map_err(subscription_error)?))
}

/// `POST /api/admin/members/{id}/subscription/{sid}/cancel?reason`
pub async fn cancel_for_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((member_id, subscription_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<CancelQuery>,
) -> ApiResult<Json<Subscription>> {
    auth.require_admin()?;
    let admin = auth.resolve(&state.pool).await?;
    let existing = subscriptions::get(&state.pool, subscription_id).await.map_err(subscription_error)?;
    if existing.user_id != member_id {
        return Err(subscription_error(SubscriptionError::NotFound(subscription_id)));
    }
    let today = OffsetDateTime::now_utc().date();
    let cancelled = subscriptions::cancel(&state.pool, subscription_id, query.reason.as_deref(), today)
        .await
        .map_err(subscription_error)?;
    let entry = AuditEntry::new(admin.id, "SUBSCRIPTION_CANCELLED", "SUBSCRIPTION", subscription_id)
        .with_metadata(serde_json::json!({ "userId": member_id, "reason": query.reason }));
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(cancelled))
}
