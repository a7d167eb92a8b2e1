//! Class instance routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use super::auth::AuthUser;
use super::users::user_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::GymClass;
use crate::services::audit::{self, AuditEntry};
use crate::services::classes::{self, ClassError, ClassInput, DeleteOutcome};
use crate::state::AppState;

pub(crate) fn class_error_to_status(err: &ClassError) -> StatusCode {
    match err {
        ClassError::NotFound(_) => StatusCode::NOT_FOUND,
        ClassError::NotATrainer(_) | ClassError::Invalid(_) => StatusCode::BAD_REQUEST,
        ClassError::CapacityBelowBookings { .. } => StatusCode::CONFLICT,
        ClassError::User(e) => user_error_to_status(e),
        ClassError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn class_error(err: ClassError) -> ApiError {
    ApiError::from_error(class_error_to_status(&err), &err)
}

/// `GET /api/classes`
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<GymClass>>> {
    Ok(Json(classes::list(&state.pool).await.map_err(class_error)?))
}

/// `GET /api/classes/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<GymClass>> {
    Ok(Json(classes::get(&state.pool, id).await.map_err(class_error)?))
}

/// `GET /api/classes/trainer/{id}` (also mounted as `/instructor/{id}`): staff only.
pub async fn list_by_trainer(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(trainer_id): Path<Uuid>,
) -> ApiResult<Json<Vec<GymClass>>> {
    auth.require_staff()?;
    Ok(Json(classes::list_by_trainer(&state.pool, trainer_id).await.map_err(class_error)?))
}

/// `POST /api/classes`: staff. Admins may name another trainer; trainers
/// always lead what they schedule.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<ClassInput>,
) -> ApiResult<(StatusCode, Json<GymClass>)> {
    auth.require_staff()?;
    let caller = auth.resolve(&state.pool).await?;
    let trainer_id = match input.trainer_id {
        Some(other) if auth.is_admin() => other,
        _ => caller.id,
    };
    let class = classes::create(&state.pool, &input, trainer_id).await.map_err(class_error)?;
    Ok((StatusCode::CREATED, Json(class)))
}

/// `PUT /api/classes/{id}`: staff.
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<ClassInput>,
) -> ApiResult<Json<GymClass>> {
    auth.require_staff()?;
    Ok(Json(classes::update(&state.pool, id, &input).await.map_err(class_error)?))
}

/// `DELETE /api/classes/{id}`: staff. Booked classes are cancelled instead.
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteOutcome>> {
    auth.require_staff()?;
    let caller = auth.resolve(&state.pool).await?;
    let outcome = classes::delete(&state.pool, id).await.map_err(class_error)?;
    let entry = AuditEntry::new(caller.id, "CLASS_DELETED", "CLASS", id)
        .with_metadata(serde_json::to_value(outcome).unwrap_or_default());
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(outcome))
}
