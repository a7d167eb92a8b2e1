//! Class type routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use super::auth::AuthUser;
use super::users::user_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::ClassType;
use crate::services::class_types::{self, ClassTypeError, ClassTypeInput};
use crate::state::AppState;

pub(crate) fn class_type_error_to_status(err: &ClassTypeError) -> StatusCode {
    match err {
        ClassTypeError::NotFound(_) => StatusCode::NOT_FOUND,
        ClassTypeError::DuplicateName(_) | ClassTypeError::InUse => StatusCode::CONFLICT,
        ClassTypeError::NameRequired | ClassTypeError::NotATrainer(_) => StatusCode::BAD_REQUEST,
        ClassTypeError::User(e) => user_error_to_status(e),
        ClassTypeError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn class_type_error(err: ClassTypeError) -> ApiError {
    ApiError::from_error(class_type_error_to_status(&err), &err)
}

/// `GET /api/class-types`
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<ClassType>>> {
    Ok(Json(class_types::list(&state.pool, false).await.map_err(class_type_error)?))
}

/// `GET /api/class-types/active`
pub async fn list_active(State(state): State<AppState>) -> ApiResult<Json<Vec<ClassType>>> {
    Ok(Json(class_types::list(&state.pool, true).await.map_err(class_type_error)?))
}

/// `GET /api/class-types/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ClassType>> {
    Ok(Json(class_types::get(&state.pool, id).await.map_err(class_type_error)?))
}

/// `GET /api/class-types/trainer/{id}`
pub async fn list_by_trainer(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(trainer_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ClassType>>> {
    Ok(Json(class_types::list_by_trainer(&state.pool, trainer_id).await.map_err(class_type_error)?))
}

/// `POST /api/class-types`: admin or trainer.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<ClassTypeInput>,
) -> ApiResult<(StatusCode, Json<ClassType>)> {
    auth.require_staff()?;
    let created = class_types::create(&state.pool, &input).await.map_err(class_type_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PUT /api/class-types/{id}`: admin or trainer.
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(input): Json<ClassTypeInput>,
) -> ApiResult<Json<ClassType>> {
    auth.require_staff()?;
    Ok(Json(class_types::update(&state.pool, id, &input).await.map_err(class_type_error)?))
}

/// `DELETE /api/class-types/{id}`: admin or trainer.
pub async fn delete(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    auth.require_staff()?;
    class_types::delete(&state.pool, id).await.map_err(class_type_error)?;
    Ok(StatusCode::NO_CONTENT)
}
