//! Recurring schedule slots for class instances.
//!
//! A schedule is a dated occurrence of a class; its end time always follows
//! from the class duration. Cancelling only flips a flag, and only before
//! the slot starts.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::Schedule;
use crate::services::classes::{self, ClassError};

const SCHEDULE_COLUMNS: &str = "s.id, s.class_id, s.start_time, s.end_time, s.is_cancelled, s.created_at";

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule not found: {0}")]
    NotFound(Uuid),
    #[error("cannot cancel a schedule that has already started")]
    AlreadyStarted,
    #[error("range end must be after range start")]
    InvalidRange,
    #[error(transparent)]
    Class(#[from] ClassError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for ScheduleError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SCHEDULE_NOT_FOUND",
            Self::AlreadyStarted => "E_SCHEDULE_STARTED",
            Self::InvalidRange => "E_INVALID_RANGE",
            Self::Class(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// # Errors
///
/// `Class(NotFound)` when the class is unknown.
pub async fn create(pool: &PgPool, class_id: Uuid, start_time: OffsetDateTime) -> Result<Schedule, ScheduleError> {
    let class = classes::get(pool, class_id).await?;
    let end_time = start_time + Duration::minutes(i64::from(class.duration_minutes));
    let schedule = sqlx::query_as::<_, Schedule>(
        "INSERT INTO schedules (id, class_id, start_time, end_time)
         VALUES ($1, $2, $3, $4)
         RETURNING id, class_id, start_time, end_time, is_cancelled, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(class_id)
    .bind(start_time)
    .bind(end_time)
    .fetch_one(pool)
    .await?;
    Ok(schedule)
}

/// # Errors
///
/// `NotFound` when missing.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<Schedule, ScheduleError> {
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules s WHERE s.id = $1");
    sqlx::query_as::<_, Schedule>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleError::NotFound(id))
}

/// # Errors
///
/// `AlreadyStarted` when `now` is past the slot start, `NotFound` when missing.
pub async fn cancel(pool: &PgPool, id: Uuid, now: OffsetDateTime) -> Result<Schedule, ScheduleError> {
    let schedule = get(pool, id).await?;
    if schedule.start_time < now {
        return Err(ScheduleError::AlreadyStarted);
    }
    let schedule = sqlx::query_as::<_, Schedule>(
        "UPDATE schedules SET is_cancelled = TRUE WHERE id = $1
         RETURNING id, class_id, start_time, end_time, is_cancelled, created_at",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(schedule)
}

fn check_range(start: OffsetDateTime, end: OffsetDateTime) -> Result<(), ScheduleError> {
    if end <= start { Err(ScheduleError::InvalidRange) } else { Ok(()) }
}

/// Non-cancelled schedules with `start <= start_time < end`.
///
/// # Errors
///
/// `InvalidRange` when `end <= start`.
pub async fn list_between(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<Schedule>, ScheduleError> {
    check_range(start, end)?;
    let sql = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules s
         WHERE NOT s.is_cancelled AND s.start_time >= $1 AND s.start_time < $2
         ORDER BY s.start_time"
    );
    Ok(sqlx::query_as::<_, Schedule>(&sql).bind(start).bind(end).fetch_all(pool).await?)
}

/// # Errors
///
/// `InvalidRange` when `end <= start`.
pub async fn list_for_trainer_between(
    pool: &PgPool,
    trainer_id: Uuid,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<Schedule>, ScheduleError> {
    check_range(start, end)?;
    let sql = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules s
         JOIN class_instances c ON c.id = s.class_id
         WHERE c.trainer_id = $1 AND NOT s.is_cancelled AND s.start_time >= $2 AND s.start_time < $3
         ORDER BY s.start_time"
    );
    Ok(sqlx::query_as::<_, Schedule>(&sql)
        .bind(trainer_id)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?)
}

/// # Errors
///
/// `Class(NotFound)` when the class is unknown.
pub async fn list_for_class(pool: &PgPool, class_id: Uuid) -> Result<Vec<Schedule>, ScheduleError> {
    classes::get(pool, class_id).await?;
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules s WHERE s.class_id = $1 ORDER BY s.start_time");
    Ok(sqlx::query_as::<_, Schedule>(&sql).bind(class_id).fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn empty_or_backwards_range_is_rejected() {
        let t = datetime!(2025-01-01 00:00 UTC);
        assert!(matches!(check_range(t, t), Err(ScheduleError::InvalidRange)));
        assert!(matches!(check_range(t, t - Duration::hours(1)), Err(ScheduleError::InvalidRange)));
        assert!(check_range(t, t + Duration::hours(1)).is_ok());
    }

    #[cfg(feature = "live-db-tests")]
    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn schedule_end_follows_duration_and_started_slots_cannot_cancel() {
        use crate::db::test_db::{integration_pool, seed_class, seed_user};
        use crate::models::Role;

        let pool = integration_pool().await;
        let trainer = seed_user(&pool, Role::Trainer, 0, 0).await;
        let class_id = seed_class(&pool, trainer, 5, 24).await;
        let now = OffsetDateTime::now_utc();

        let future = create(&pool, class_id, now + Duration::days(2)).await.unwrap();
        assert_eq!(future.end_time - future.start_time, Duration::minutes(60));
        let past = create(&pool, class_id, now - Duration::hours(1)).await.unwrap();

        assert!(matches!(cancel(&pool, past.id, now).await, Err(ScheduleError::AlreadyStarted)));
        let cancelled = cancel(&pool, future.id, now).await.unwrap();
        assert!(cancelled.is_cancelled);
        assert_eq!(cancelled.created_at, future.created_at);
        assert!(future.created_at >= now - Duration::minutes(1));

        let listed = list_between(&pool, now - Duration::days(1), now + Duration::days(3)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, past.id);
    }
}
