//! Booking routes.
//!
//! Members book and cancel for themselves; staff may act on anyone's behalf
//! and close bookings out as attended or no-show.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::admin::billing_error_to_status;
use super::auth::AuthUser;
use super::classes::{class_error, class_error_to_status};
use super::users::user_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::Booking;
use crate::services::bookings::{self, BookingDetails, BookingError, Closed};
use crate::services::classes;
use crate::state::AppState;

pub(crate) fn booking_error_to_status(err: &BookingError) -> StatusCode {
    match err {
        BookingError::NotFound(_) => StatusCode::NOT_FOUND,
        BookingError::UserNotAllowed => StatusCode::FORBIDDEN,
        BookingError::StaffCannotBook | BookingError::ClassInPast | BookingError::InsufficientFunds { .. } => {
            StatusCode::BAD_REQUEST
        }
        BookingError::ClassCancelled
        | BookingError::ClassFull
        | BookingError::AlreadyBooked
        | BookingError::NotBooked(_) => StatusCode::CONFLICT,
        BookingError::Class(e) => class_error_to_status(e),
        BookingError::User(e) => user_error_to_status(e),
        BookingError::Billing(e) => billing_error_to_status(e),
        BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn booking_error(err: BookingError) -> ApiError {
    ApiError::from_error(booking_error_to_status(&err), &err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookQuery {
    pub class_instance_id: Uuid,
    pub user_id: Option<Uuid>,
}

/// `POST /api/bookings?classInstanceId&userId`: `userId` is honoured for
/// staff only; everyone else books themself.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<BookQuery>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let user_id = match query.user_id {
        Some(other) if auth.is_staff() => other,
        _ => auth.resolve(&state.pool).await?.id,
    };
    let booking = bookings::create(&state.pool, user_id, query.class_instance_id, OffsetDateTime::now_utc())
        .await
        .map_err(booking_error)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// `PUT /api/bookings/{id}/cancel`: own booking, or any booking for staff.
pub async fn cancel(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Closed>> {
    if !auth.is_staff() {
        let me = auth.resolve(&state.pool).await?;
        let booking = bookings::get(&state.pool, id).await.map_err(booking_error)?;
        if booking.user_id != me.id {
            return Err(ApiError::forbidden());
        }
    }
    let closed = bookings::cancel(&state.pool, id, OffsetDateTime::now_utc(), &state.config.billing)
        .await
        .map_err(booking_error)?;
    Ok(Json(closed))
}

/// `PUT /api/bookings/{id}/complete`: staff.
pub async fn complete(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Closed>> {
    auth.require_staff()?;
    let closed = bookings::complete(&state.pool, id, OffsetDateTime::now_utc()).await.map_err(booking_error)?;
    Ok(Json(closed))
}

/// `PUT /api/bookings/{id}/no-show`: staff.
pub async fn no_show(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<Closed>> {
    auth.require_staff()?;
    let closed = bookings::mark_no_show(&state.pool, id, OffsetDateTime::now_utc()).await.map_err(booking_error)?;
    Ok(Json(closed))
}

/// `GET /api/bookings/me`
pub async fn list_mine(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<BookingDetails>>> {
    let me = auth.resolve(&state.pool).await?;
    Ok(Json(bookings::list_for_user(&state.pool, me.id).await.map_err(booking_error)?))
}

/// `GET /api/bookings/user/{id}`: admin or the user themself.
pub async fn list_for_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<BookingDetails>>> {
    if !auth.is_admin() && auth.resolve(&state.pool).await?.id != user_id {
        return Err(ApiError::forbidden());
    }
    Ok(Json(bookings::list_for_user(&state.pool, user_id).await.map_err(booking_error)?))
}

/// `GET /api/bookings/class/{id}`: staff, or the trainer leading the class.
pub async fn list_for_class(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(class_id): Path<Uuid>,
) -> ApiResult<Json<Vec<BookingDetails>>> {
    if !auth.is_staff() {
        let me = auth.resolve(&state.pool).await?;
        let class = classes::get(&state.pool, class_id).await.map_err(class_error)?;
        if class.trainer_id != me.id {
            return Err(ApiError::forbidden());
        }
    }
    Ok(Json(bookings::list_for_class(&state.pool, class_id).await.map_err(booking_error)?))
}

#[derive(Serialize)]
pub struct BookedCount {
    pub class_id: Uuid,
    pub count: i64,
}

/// `GET /api/bookings/class/{id}/count`: public.
pub async fn count_for_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> ApiResult<Json<BookedCount>> {
    classes::get(&state.pool, class_id).await.map_err(class_error)?;
    let count = classes::count_active_bookings(&state.pool, class_id).await.map_err(class_error)?;
    Ok(Json(BookedCount { class_id, count }))
}
