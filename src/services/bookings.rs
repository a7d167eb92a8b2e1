//! Bookings service: reserving, cancelling and closing out class seats.
//!
//! DESIGN
//! ======
//! Each state change runs in one transaction. Creating a booking locks the
//! class row so two members racing for the last seat serialize on it; the
//! partial unique index on `(user_id, class_id) WHERE status = 'BOOKED'`
//! backs up the duplicate check. Cancelling and closing lock the booking
//! row, then the member row, then (inside billing) the subscription row.
//!
//! Only BOOKED bookings move. Every transition out of BOOKED is final.
//!
//! ERROR HANDLING
//! ==============
//! Validation failures are distinct variants so the route layer can map
//! them to 400/404/409 and clients can tell "class full" from "no funds".

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::models::{BOOKING_COLUMNS, BillingEvent, Booking, BookingStatus, ClassStatus, GYM_CLASS_SELECT, GymClass};
use crate::services::billing::{self, BillingError};
use crate::services::classes::{self, ClassError};
use crate::services::pricing::{BaseCosts, Funding, funding_for_booking, resolve_base_cost};
use crate::services::users::{self, UserError, can_book};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("booking not found: {0}")]
    NotFound(Uuid),
    #[error("user is not allowed to book")]
    UserNotAllowed,
    #[error("staff cannot book themselves into classes; book on behalf of a member instead")]
    StaffCannotBook,
    #[error("this class has been cancelled")]
    ClassCancelled,
    #[error("class has already started")]
    ClassInPast,
    #[error("class is fully booked")]
    ClassFull,
    #[error("user already has a booking for this class")]
    AlreadyBooked,
    #[error("insufficient funds: wallet={wallet_cents} bonus_days={bonus_days} required={required_cents}")]
    InsufficientFunds { required_cents: i64, wallet_cents: i64, bonus_days: i32 },
    #[error("booking is {0}, expected BOOKED")]
    NotBooked(BookingStatus),
    #[error(transparent)]
    Class(#[from] ClassError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for BookingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_BOOKING_NOT_FOUND",
            Self::UserNotAllowed => "E_BOOKING_BLOCKED",
            Self::StaffCannotBook => "E_STAFF_CANNOT_BOOK",
            Self::ClassCancelled => "E_CLASS_CANCELLED",
            Self::ClassInPast => "E_CLASS_IN_PAST",
            Self::ClassFull => "E_CLASS_FULL",
            Self::AlreadyBooked => "E_ALREADY_BOOKED",
            Self::InsufficientFunds { .. } => "E_INSUFFICIENT_FUNDS",
            Self::NotBooked(_) => "E_BOOKING_NOT_ACTIVE",
            Self::Class(e) => crate::error::ErrorCode::error_code(e),
            Self::User(e) => crate::error::ErrorCode::error_code(e),
            Self::Billing(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// A booking that left BOOKED, with the charge it produced (if any).
#[derive(Debug, Clone, Serialize)]
pub struct Closed {
    pub booking: Booking,
    pub charge: Option<BillingEvent>,
}

/// Booking joined with the member and class it refers to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookingDetails {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub class_id: Uuid,
    pub class_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub class_start: OffsetDateTime,
    pub status: BookingStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub attended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub booked_at: OffsetDateTime,
}

const DETAILS_SELECT: &str = "SELECT b.id, b.user_id, u.name AS user_name, b.class_id, t.name AS class_name, \
     c.start_time AS class_start, b.status, b.cancelled_at, b.attended_at, b.created_at AS booked_at \
     FROM bookings b \
     JOIN users u ON u.id = b.user_id \
     JOIN class_instances c ON c.id = b.class_id \
     LEFT JOIN class_types t ON t.id = c.class_type_id";

// =============================================================================
// ROW HELPERS
// =============================================================================

async fn lock_class(conn: &mut PgConnection, class_id: Uuid) -> Result<GymClass, BookingError> {
    let sql = format!("{GYM_CLASS_SELECT} WHERE c.id = $1 FOR UPDATE OF c");
    sqlx::query_as::<_, GymClass>(&sql)
        .bind(class_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BookingError::Class(ClassError::NotFound(class_id)))
}

async fn fetch_class(conn: &mut PgConnection, class_id: Uuid) -> Result<GymClass, BookingError> {
    let sql = format!("{GYM_CLASS_SELECT} WHERE c.id = $1");
    sqlx::query_as::<_, GymClass>(&sql)
        .bind(class_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BookingError::Class(ClassError::NotFound(class_id)))
}

async fn lock_booked(conn: &mut PgConnection, id: Uuid) -> Result<Booking, BookingError> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
    let booking = sqlx::query_as::<_, Booking>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(BookingError::NotFound(id))?;
    if booking.status != BookingStatus::Booked {
        return Err(BookingError::NotBooked(booking.status));
    }
    Ok(booking)
}

async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: BookingStatus,
    cancelled_at: Option<OffsetDateTime>,
    attended_at: Option<OffsetDateTime>,
) -> Result<Booking, sqlx::Error> {
    let sql = format!(
        "UPDATE bookings SET status = $2, cancelled_at = $3, attended_at = $4, updated_at = now()
         WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
    );
    sqlx::query_as::<_, Booking>(&sql)
        .bind(id)
        .bind(status)
        .bind(cancelled_at)
        .bind(attended_at)
        .fetch_one(conn)
        .await
}

// =============================================================================
// CREATE
// =============================================================================

/// Book `user_id` into `class_id`.
///
/// # Errors
///
/// The first failed check, in order: `User(NotFound)`, `UserNotAllowed`,
/// `StaffCannotBook`, `Class(NotFound)`, `ClassCancelled`, `ClassInPast`,
/// `ClassFull`, `AlreadyBooked`, `InsufficientFunds`.
pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    class_id: Uuid,
    now: OffsetDateTime,
) -> Result<Booking, BookingError> {
    let mut tx = pool.begin().await?;
    // Lock order is class then user; user errors still surface first.
    let class = lock_class(&mut tx, class_id).await;
    let user = users::lock(&mut tx, user_id).await?;
    if !can_book(&user) {
        return Err(BookingError::UserNotAllowed);
    }
    if user.role.is_staff() {
        return Err(BookingError::StaffCannotBook);
    }

    let class = class?;
    if class.is_cancelled || class.status == ClassStatus::Cancelled {
        return Err(BookingError::ClassCancelled);
    }
    if class.start_time < now {
        return Err(BookingError::ClassInPast);
    }

    let booked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE class_id = $1 AND status = 'BOOKED'")
        .bind(class_id)
        .fetch_one(&mut *tx)
        .await?;
    if booked >= i64::from(class.capacity) {
        return Err(BookingError::ClassFull);
    }

    let duplicate: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM bookings WHERE class_id = $1 AND user_id = $2 AND status = 'BOOKED')",
    )
    .bind(class_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if duplicate {
        return Err(BookingError::AlreadyBooked);
    }

    let has_subscription: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM subscriptions WHERE user_id = $1 AND status = 'ACTIVE')",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    let required_cents = resolve_base_cost(&BaseCosts::from(&user), class.kind);
    let funding = funding_for_booking(required_cents, user.wallet_balance_cents, user.bonus_days, has_subscription);
    if funding == Funding::Insufficient {
        return Err(BookingError::InsufficientFunds {
            required_cents,
            wallet_cents: user.wallet_balance_cents,
            bonus_days: user.bonus_days,
        });
    }

    let sql = format!(
        "INSERT INTO bookings (id, user_id, class_id, status) VALUES ($1, $2, $3, 'BOOKED')
         RETURNING {BOOKING_COLUMNS}"
    );
    let booking = match sqlx::query_as::<_, Booking>(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(class_id)
        .fetch_one(&mut *tx)
        .await
    {
        Ok(booking) => booking,
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => return Err(BookingError::AlreadyBooked),
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    info!(booking_id = %booking.id, %user_id, %class_id, ?funding, "class booked");
    Ok(booking)
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Member-initiated cancellation; late ones are billed.
///
/// # Errors
///
/// `NotFound`, `NotBooked`, `ClassInPast`, or a billing/database error.
pub async fn cancel(
    pool: &PgPool,
    id: Uuid,
    now: OffsetDateTime,
    config: &BillingConfig,
) -> Result<Closed, BookingError> {
    let mut tx = pool.begin().await?;
    let booking = lock_booked(&mut tx, id).await?;
    let class = fetch_class(&mut tx, booking.class_id).await?;
    if class.start_time < now {
        return Err(BookingError::ClassInPast);
    }

    let booking = set_status(&mut tx, id, BookingStatus::CancelledByUser, Some(now), None).await?;
    let user = users::lock(&mut tx, booking.user_id).await?;
    let charge = billing::create_cancellation_charge(&mut tx, &booking, &class, &user, now, config, now.date()).await?;
    tx.commit().await?;

    info!(booking_id = %id, user_id = %booking.user_id, charged = charge.is_some(), "booking cancelled by user");
    Ok(Closed { booking, charge })
}

async fn close_attended(
    pool: &PgPool,
    id: Uuid,
    now: OffsetDateTime,
    status: BookingStatus,
    reason_prefix: &str,
) -> Result<Closed, BookingError> {
    let mut tx = pool.begin().await?;
    let booking = lock_booked(&mut tx, id).await?;
    let class = fetch_class(&mut tx, booking.class_id).await?;

    let attended_at = (status == BookingStatus::Completed).then_some(now);
    let booking = set_status(&mut tx, id, status, None, attended_at).await?;
    let user = users::lock(&mut tx, booking.user_id).await?;
    let charge = billing::create_attendance_charge(&mut tx, &booking, &class, &user, reason_prefix, now.date()).await?;
    tx.commit().await?;

    info!(booking_id = %id, user_id = %booking.user_id, %status, charged = charge.is_some(), "booking closed");
    Ok(Closed { booking, charge })
}

/// Mark attendance and bill the class.
///
/// # Errors
///
/// `NotFound`, `NotBooked`, or a billing/database error.
pub async fn complete(pool: &PgPool, id: Uuid, now: OffsetDateTime) -> Result<Closed, BookingError> {
    close_attended(pool, id, now, BookingStatus::Completed, "Class attended").await
}

/// Mark a no-show; billed exactly like attendance.
///
/// # Errors
///
/// `NotFound`, `NotBooked`, or a billing/database error.
pub async fn mark_no_show(pool: &PgPool, id: Uuid, now: OffsetDateTime) -> Result<Closed, BookingError> {
    close_attended(pool, id, now, BookingStatus::NoShow, "No-show").await
}

/// Cancel every BOOKED seat of a class on the gym's behalf. Never billed.
///
/// # Errors
///
/// Returns a database error if the update fails.
pub async fn cancel_by_gym_for_class(conn: &mut PgConnection, class_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE bookings SET status = 'CANCELLED_BY_GYM', cancelled_at = now(), updated_at = now()
         WHERE class_id = $1 AND status = 'BOOKED'",
    )
    .bind(class_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn count_booked(pool: &PgPool, class_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE class_id = $1 AND status = 'BOOKED'")
        .bind(class_id)
        .fetch_one(pool)
        .await
}

/// # Errors
///
/// `NotFound` when missing.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<Booking, BookingError> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
    sqlx::query_as::<_, Booking>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(BookingError::NotFound(id))
}

/// Newest first.
///
/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<BookingDetails>, BookingError> {
    users::get(pool, user_id).await?;
    let sql = format!("{DETAILS_SELECT} WHERE b.user_id = $1 ORDER BY c.start_time DESC");
    Ok(sqlx::query_as::<_, BookingDetails>(&sql).bind(user_id).fetch_all(pool).await?)
}

/// Attendee list in booking order.
///
/// # Errors
///
/// `Class(NotFound)` for unknown classes.
pub async fn list_for_class(pool: &PgPool, class_id: Uuid) -> Result<Vec<BookingDetails>, BookingError> {
    classes::get(pool, class_id).await?;
    let sql = format!("{DETAILS_SELECT} WHERE b.class_id = $1 ORDER BY b.created_at");
    Ok(sqlx::query_as::<_, BookingDetails>(&sql).bind(class_id).fetch_all(pool).await?)
}

#[cfg(test)]
#[path = "bookings_test.rs"]
mod tests;
