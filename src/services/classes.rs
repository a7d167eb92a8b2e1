//! Class instance service: scheduling, edits and gym-side cancellation.
//!
//! DESIGN
//! ======
//! A class instance is one bookable session with a trainer, a capacity and
//! a kind (the kind drives per-member pricing). Deleting a class that
//! nobody booked removes it outright; deleting one with attendees turns it
//! into a cancelled class and cancels every booking on the gym's behalf, so
//! members are never billed for a session the gym called off.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::models::{ClassKind, GYM_CLASS_SELECT, GymClass};
use crate::services::bookings;
use crate::services::users::{self, UserError};

const DEFAULT_CAPACITY: i32 = 5;
const DEFAULT_DURATION_MINUTES: i32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ClassError {
    #[error("class not found: {0}")]
    NotFound(Uuid),
    #[error("user {0} cannot lead classes")]
    NotATrainer(Uuid),
    #[error("{0}")]
    Invalid(&'static str),
    #[error("capacity {capacity} is below the {booked} active bookings")]
    CapacityBelowBookings { capacity: i32, booked: i64 },
    #[error(transparent)]
    User(#[from] UserError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for ClassError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CLASS_NOT_FOUND",
            Self::NotATrainer(_) => "E_NOT_A_TRAINER",
            Self::Invalid(_) => "E_INVALID_INPUT",
            Self::CapacityBelowBookings { .. } => "E_CAPACITY_BELOW_BOOKINGS",
            Self::User(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInput {
    pub class_type_id: Option<Uuid>,
    pub description: Option<String>,
    pub capacity: Option<i32>,
    pub duration_minutes: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub location: Option<String>,
    pub kind: Option<ClassKind>,
    /// Staff may schedule on behalf of another trainer.
    pub trainer_id: Option<Uuid>,
}

/// Validated, defaulted class fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassShape {
    pub capacity: i32,
    pub duration_minutes: i32,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub kind: ClassKind,
}

impl ClassInput {
    /// Apply defaults and check bounds. `end_time` defaults to start + duration.
    ///
    /// # Errors
    ///
    /// `Invalid` for non-positive capacity/duration or an end before start.
    pub fn shape(&self) -> Result<ClassShape, ClassError> {
        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY);
        if capacity <= 0 {
            return Err(ClassError::Invalid("capacity must be positive"));
        }
        let duration_minutes = self.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        if duration_minutes <= 0 {
            return Err(ClassError::Invalid("duration must be positive"));
        }
        let end_time = self
            .end_time
            .unwrap_or(self.start_time + Duration::minutes(i64::from(duration_minutes)));
        if end_time <= self.start_time {
            return Err(ClassError::Invalid("end time must be after start time"));
        }
        Ok(ClassShape {
            capacity,
            duration_minutes,
            start_time: self.start_time,
            end_time,
            kind: self.kind.unwrap_or(ClassKind::Group),
        })
    }
}

/// # Errors
///
/// `NotFound` when missing.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<GymClass, ClassError> {
    let sql = format!("{GYM_CLASS_SELECT} WHERE c.id = $1");
    sqlx::query_as::<_, GymClass>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ClassError::NotFound(id))
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list(pool: &PgPool) -> Result<Vec<GymClass>, ClassError> {
    let sql = format!("{GYM_CLASS_SELECT} ORDER BY c.start_time");
    Ok(sqlx::query_as::<_, GymClass>(&sql).fetch_all(pool).await?)
}

/// # Errors
///
/// `User(NotFound)` for an unknown trainer.
pub async fn list_by_trainer(pool: &PgPool, trainer_id: Uuid) -> Result<Vec<GymClass>, ClassError> {
    users::get(pool, trainer_id).await?;
    let sql = format!("{GYM_CLASS_SELECT} WHERE c.trainer_id = $1 ORDER BY c.start_time");
    Ok(sqlx::query_as::<_, GymClass>(&sql).bind(trainer_id).fetch_all(pool).await?)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn count_active_bookings(pool: &PgPool, class_id: Uuid) -> Result<i64, ClassError> {
    Ok(bookings::count_booked(pool, class_id).await?)
}

/// Schedule a new class led by `trainer_id` (must be TRAINER or ADMIN).
///
/// # Errors
///
/// `NotATrainer`, `Invalid`, or a database error.
pub async fn create(pool: &PgPool, input: &ClassInput, trainer_id: Uuid) -> Result<GymClass, ClassError> {
    let shape = input.shape()?;
    let trainer = users::get(pool, trainer_id).await?;
    if !trainer.role.is_staff() {
        return Err(ClassError::NotATrainer(trainer_id));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO class_instances
            (id, class_type_id, description, capacity, duration_minutes, trainer_id,
             start_time, end_time, location, kind)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(id)
    .bind(input.class_type_id)
    .bind(input.description.as_deref())
    .bind(shape.capacity)
    .bind(shape.duration_minutes)
    .bind(trainer_id)
    .bind(shape.start_time)
    .bind(shape.end_time)
    .bind(input.location.as_deref())
    .bind(shape.kind)
    .execute(pool)
    .await?;

    info!(class_id = %id, %trainer_id, kind = %shape.kind, "class scheduled");
    get(pool, id).await
}

/// Replace the editable fields of a class.
///
/// # Errors
///
/// `NotFound`, `Invalid`, `CapacityBelowBookings`, or a database error.
pub async fn update(pool: &PgPool, id: Uuid, input: &ClassInput) -> Result<GymClass, ClassError> {
    let shape = input.shape()?;
    let mut tx = pool.begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM class_instances WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ClassError::NotFound(id));
    }

    let booked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE class_id = $1 AND status = 'BOOKED'")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if i64::from(shape.capacity) < booked {
        return Err(ClassError::CapacityBelowBookings { capacity: shape.capacity, booked });
    }

    sqlx::query(
        "UPDATE class_instances
         SET description = $2, capacity = $3, duration_minutes = $4, start_time = $5, end_time = $6,
             location = $7, kind = $8, class_type_id = COALESCE($9, class_type_id), updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(input.description.as_deref())
    .bind(shape.capacity)
    .bind(shape.duration_minutes)
    .bind(shape.start_time)
    .bind(shape.end_time)
    .bind(input.location.as_deref())
    .bind(shape.kind)
    .bind(input.class_type_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    get(pool, id).await
}

/// What `delete` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    Cancelled { bookings_cancelled: u64 },
}

/// Hard-delete an unbooked class; otherwise cancel it and its bookings.
///
/// # Errors
///
/// `NotFound` when missing.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<DeleteOutcome, ClassError> {
    let mut tx = pool.begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM class_instances WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ClassError::NotFound(id));
    }

    let booked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE class_id = $1 AND status = 'BOOKED'")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    let outcome = if booked == 0 {
        sqlx::query("DELETE FROM class_instances WHERE id = $1").bind(id).execute(&mut *tx).await?;
        DeleteOutcome::Deleted
    } else {
        sqlx::query(
            "UPDATE class_instances SET status = 'CANCELLED', is_cancelled = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let bookings_cancelled = bookings::cancel_by_gym_for_class(&mut tx, id).await?;
        DeleteOutcome::Cancelled { bookings_cancelled }
    };
    tx.commit().await?;

    info!(class_id = %id, ?outcome, "class removed");
    Ok(outcome)
}

#[cfg(test)]
#[path = "classes_test.rs"]
mod tests;
