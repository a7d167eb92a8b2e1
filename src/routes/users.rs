//! User routes: self-service profile and billing views, the user
//! directory, and admin user CRUD under `/api/users`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use super::auth::AuthUser;
use super::admin::billing_error;
use crate::error::{ApiError, ApiResult};
use crate::models::{BillingEvent, Role, User};
use crate::services::audit::{self, AuditEntry};
use crate::services::billing;
use crate::services::users::{self, NewUser, ProfileUpdate, UserError, UserUpdate};
use crate::state::AppState;

pub(crate) fn user_error_to_status(err: &UserError) -> StatusCode {
    match err {
        UserError::NotFound(_) => StatusCode::NOT_FOUND,
        UserError::DuplicateEmail(_) | UserError::TrainerHasClasses => StatusCode::CONFLICT,
        UserError::Invalid(_) => StatusCode::BAD_REQUEST,
        UserError::AdminProtected => StatusCode::FORBIDDEN,
        UserError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn user_error(err: UserError) -> ApiError {
    ApiError::from_error(user_error_to_status(&err), &err)
}

// =============================================================================
// SELF SERVICE
// =============================================================================

/// `GET /api/users/me`
pub async fn get_me(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<User>> {
    Ok(Json(auth.resolve(&state.pool).await?))
}

/// `PUT /api/users/me`: edit display name and avatar.
pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<ProfileUpdate>,
) -> ApiResult<Json<User>> {
    let me = auth.resolve(&state.pool).await?;
    let user = users::update_profile(&state.pool, me.id, &input).await.map_err(user_error)?;
    Ok(Json(user))
}

#[derive(Serialize)]
pub struct MyBilling {
    pub user_id: Uuid,
    pub total_owed_cents: i64,
    pub bonus_days: i32,
    pub unsettled: Vec<BillingEvent>,
}

/// `GET /api/users/me/billing`: what the caller still owes.
pub async fn my_billing(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<MyBilling>> {
    let me = auth.resolve(&state.pool).await?;
    let total_owed_cents = billing::total_owed(&state.pool, me.id).await.map_err(billing_error)?;
    let unsettled = billing::unsettled_for_user(&state.pool, me.id).await.map_err(billing_error)?;
    Ok(Json(MyBilling { user_id: me.id, total_owed_cents, bonus_days: me.bonus_days, unsettled }))
}

// =============================================================================
// DIRECTORY
// =============================================================================

/// `GET /api/users/trainers`
pub async fn list_trainers(State(state): State<AppState>, _auth: AuthUser) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(users::list_by_role(&state.pool, Role::Trainer).await.map_err(user_error)?))
}

/// `GET /api/users/members`: staff only.
pub async fn list_members(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<User>>> {
    auth.require_staff()?;
    Ok(Json(users::list_by_role(&state.pool, Role::Member).await.map_err(user_error)?))
}

// =============================================================================
// ADMIN CRUD
// =============================================================================

/// `POST /api/users`
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    auth.require_admin()?;
    let admin = auth.resolve(&state.pool).await?;
    let user = users::create(&state.pool, &input).await.map_err(user_error)?;
    audit::record_best_effort(&state.pool, &AuditEntry::new(admin.id, "USER_CREATED", "USER", user.id)).await;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `PUT /api/users/{id}`
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    auth.require_admin()?;
    Ok(Json(users::update(&state.pool, id, &input).await.map_err(user_error)?))
}

/// `DELETE /api/users/{id}`
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    auth.require_admin()?;
    let admin = auth.resolve(&state.pool).await?;
    users::delete(&state.pool, id).await.map_err(user_error)?;
    audit::record_best_effort(&state.pool, &AuditEntry::new(admin.id, "USER_DELETED", "USER", id)).await;
    Ok(StatusCode::NO_CONTENT)
}
