//! Schedule routes.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::auth::AuthUser;
use super::classes::class_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::Schedule;
use crate::services::schedules::{self, ScheduleError};
use crate::state::AppState;

pub(crate) fn schedule_error_to_status(err: &ScheduleError) -> StatusCode {
    match err {
        ScheduleError::NotFound(_) => StatusCode::NOT_FOUND,
        ScheduleError::AlreadyStarted => StatusCode::CONFLICT,
        ScheduleError::InvalidRange => StatusCode::BAD_REQUEST,
        ScheduleError::Class(e) => class_error_to_status(e),
        ScheduleError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn schedule_error(err: ScheduleError) -> ApiError {
    ApiError::from_error(schedule_error_to_status(&err), &err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub class_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

/// `POST /api/schedules`: admin.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<NewSchedule>,
) -> ApiResult<(StatusCode, Json<Schedule>)> {
    auth.require_admin()?;
    let schedule = schedules::create(&state.pool, input.class_id, input.start_time).await.map_err(schedule_error)?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// `PUT /api/schedules/{id}/cancel`: admin.
pub async fn cancel(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Schedule>> {
    auth.require_admin()?;
    let schedule = schedules::cancel(&state.pool, id, OffsetDateTime::now_utc()).await.map_err(schedule_error)?;
    Ok(Json(schedule))
}

/// `GET /api/schedules?start&end`
pub async fn list_between(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Schedule>>> {
    let listed = schedules::list_between(&state.pool, range.start, range.end).await.map_err(schedule_error)?;
    Ok(Json(listed))
}

/// `GET /api/schedules/class/{id}`
pub async fn list_for_class(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(class_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(schedules::list_for_class(&state.pool, class_id).await.map_err(schedule_error)?))
}

/// `GET /api/schedules/trainer/{id}?start&end`: staff.
pub async fn list_for_trainer(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(trainer_id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Schedule>>> {
    auth.require_staff()?;
    let listed = schedules::list_for_trainer_between(&state.pool, trainer_id, range.start, range.end)
        .await
        .map_err(schedule_error)?;
    Ok(Json(listed))
}
