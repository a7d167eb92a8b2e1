//! Subscription service: monthly passes, late-cancellation strikes, expiry.
//!
//! DESIGN
//! ======
//! A member holds at most one ACTIVE and at most one PENDING subscription
//! (enforced by partial unique indexes). A new subscription starts at once
//! when the member's wallet is empty; otherwise it waits as PENDING and
//! starts the moment a wallet charge drains the balance to zero, so
//! prepaid credit is used up before the pass begins.
//!
//! Every state change writes a `subscription_history` row in the same
//! transaction as the change itself.
//!
//! SYSTEM CONTEXT
//! ==============
//! `spawn_expiry_task` runs `expire_due` on an interval so passes whose end
//! date has passed stop covering bookings without any request touching them.

use std::time::Duration;

use sqlx::{PgConnection, PgPool};
use time::{Date, Month, OffsetDateTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{SUBSCRIPTION_COLUMNS, Subscription, SubscriptionHistory, SubscriptionStatus};
use crate::services::users::{self, UserError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("subscription not found: {0}")]
    NotFound(Uuid),
    #[error("user already has an active or pending subscription")]
    AlreadySubscribed,
    #[error("subscription is already {0}")]
    NotCancellable(SubscriptionStatus),
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    User(#[from] UserError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for SubscriptionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SUBSCRIPTION_NOT_FOUND",
            Self::AlreadySubscribed => "E_ALREADY_SUBSCRIBED",
            Self::NotCancellable(_) => "E_SUBSCRIPTION_NOT_CANCELLABLE",
            Self::Invalid(_) => "E_INVALID_INPUT",
            Self::User(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Result of counting one more late cancellation against a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeOutcome {
    Counted { late_cancellations: i32 },
    /// The limit was reached: the pass is cancelled and the member blocked.
    AutoCancelled { late_cancellations: i32 },
}

// =============================================================================
// PURE RULES
// =============================================================================

/// Calendar month arithmetic; the day is clamped to the target month's length.
#[must_use]
pub fn add_months(date: Date, months: i32) -> Date {
    let zero_based = date.year() * 12 + i32::from(u8::from(date.month())) - 1 + months;
    let year = zero_based.div_euclid(12);
    let month_index = u8::try_from(zero_based.rem_euclid(12) + 1).unwrap_or(1);
    let month = Month::try_from(month_index).unwrap_or(Month::January);
    let day = date.day().min(month.length(year));
    Date::from_calendar_date(year, month, day).unwrap_or(date)
}

/// A new pass starts immediately only when there is no prepaid wallet credit.
#[must_use]
pub fn initial_status(wallet_cents: i64) -> SubscriptionStatus {
    if wallet_cents <= 0 { SubscriptionStatus::Active } else { SubscriptionStatus::Pending }
}

#[must_use]
pub fn strike_outcome(late_cancellations_after: i32, max_late_cancellations: i32) -> StrikeOutcome {
    if late_cancellations_after >= max_late_cancellations {
        StrikeOutcome::AutoCancelled { late_cancellations: late_cancellations_after }
    } else {
        StrikeOutcome::Counted { late_cancellations: late_cancellations_after }
    }
}

// =============================================================================
// HISTORY
// =============================================================================

async fn write_history(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    event_type: &str,
    event_data: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO subscription_history (id, subscription_id, event_type, event_data)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(subscription_id)
    .bind(event_type)
    .bind(event_data)
    .execute(conn)
    .await?;
    Ok(())
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn history(pool: &PgPool, subscription_id: Uuid) -> Result<Vec<SubscriptionHistory>, SubscriptionError> {
    Ok(sqlx::query_as::<_, SubscriptionHistory>(
        "SELECT id, subscription_id, event_type, event_data, created_at
         FROM subscription_history WHERE subscription_id = $1
         ORDER BY created_at DESC",
    )
    .bind(subscription_id)
    .fetch_all(pool)
    .await?)
}

/// History across every subscription the user ever held, newest first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn history_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<SubscriptionHistory>, SubscriptionError> {
    Ok(sqlx::query_as::<_, SubscriptionHistory>(
        "SELECT h.id, h.subscription_id, h.event_type, h.event_data, h.created_at
         FROM subscription_history h JOIN subscriptions s ON s.id = h.subscription_id
         WHERE s.user_id = $1
         ORDER BY h.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// `NotFound` when missing.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<Subscription, SubscriptionError> {
    let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1");
    sqlx::query_as::<_, Subscription>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(SubscriptionError::NotFound(id))
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn active_for_user(pool: &PgPool, user_id: Uuid) -> Result<Option<Subscription>, SubscriptionError> {
    let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 AND status = 'ACTIVE'");
    Ok(sqlx::query_as::<_, Subscription>(&sql).bind(user_id).fetch_optional(pool).await?)
}

/// Lock the user's ACTIVE subscription, if any.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn lock_active_for_user(conn: &mut PgConnection, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 AND status = 'ACTIVE' FOR UPDATE"
    );
    sqlx::query_as::<_, Subscription>(&sql).bind(user_id).fetch_optional(conn).await
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Subscription>, SubscriptionError> {
    let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC");
    Ok(sqlx::query_as::<_, Subscription>(&sql).bind(user_id).fetch_all(pool).await?)
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Open a new pass for `user_id`.
///
/// # Errors
///
/// `AlreadySubscribed` when an ACTIVE or PENDING pass exists; `Invalid` for
/// non-positive months or a negative payment.
pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    initial_payment_cents: i64,
    months: i32,
    today: Date,
) -> Result<Subscription, SubscriptionError> {
    if months <= 0 {
        return Err(SubscriptionError::Invalid("months must be positive"));
    }
    if initial_payment_cents < 0 {
        return Err(SubscriptionError::Invalid("initial payment must not be negative"));
    }

    let mut tx = pool.begin().await?;
    let user = users::lock(&mut tx, user_id).await?;

    let open: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM subscriptions WHERE user_id = $1 AND status IN ('ACTIVE', 'PENDING'))",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if open {
        return Err(SubscriptionError::AlreadySubscribed);
    }

    let status = initial_status(user.wallet_balance_cents);
    let (start_date, end_date) = match status {
        SubscriptionStatus::Active => (Some(today), Some(add_months(today, months))),
        _ => (None, None),
    };

    let sql = format!(
        "INSERT INTO subscriptions (id, user_id, initial_payment_cents, months, start_date, end_date, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {SUBSCRIPTION_COLUMNS}"
    );
    let subscription = sqlx::query_as::<_, Subscription>(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(initial_payment_cents)
        .bind(months)
        .bind(start_date)
        .bind(end_date)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;

    let data = format!("initialPaymentCents={initial_payment_cents}, months={months}, status={status}");
    write_history(&mut tx, subscription.id, "CREATED", &data).await?;
    tx.commit().await?;

    info!(subscription_id = %subscription.id, %user_id, %status, months, "subscription created");
    Ok(subscription)
}

/// Cancel an ACTIVE or PENDING pass, ending it today.
///
/// # Errors
///
/// `NotFound`, or `NotCancellable` when already cancelled or expired.
pub async fn cancel(
    pool: &PgPool,
    id: Uuid,
    reason: Option<&str>,
    today: Date,
) -> Result<Subscription, SubscriptionError> {
    let mut tx = pool.begin().await?;
    let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 FOR UPDATE");
    let current = sqlx::query_as::<_, Subscription>(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SubscriptionError::NotFound(id))?;
    if !matches!(current.status, SubscriptionStatus::Active | SubscriptionStatus::Pending) {
        return Err(SubscriptionError::NotCancellable(current.status));
    }

    let sql = format!(
        "UPDATE subscriptions SET status = 'CANCELLED', end_date = $2, updated_at = now()
         WHERE id = $1 RETURNING {SUBSCRIPTION_COLUMNS}"
    );
    let subscription = sqlx::query_as::<_, Subscription>(&sql).bind(id).bind(today).fetch_one(&mut *tx).await?;
    write_history(&mut tx, id, "CANCELLED", reason.unwrap_or_default()).await?;
    tx.commit().await?;

    info!(subscription_id = %id, "subscription cancelled");
    Ok(subscription)
}

/// Count one late cancellation against a locked ACTIVE pass. At the limit
/// the pass is cancelled and the member is blocked from booking.
///
/// # Errors
///
/// Returns a database error if a write fails.
pub async fn record_late_cancellation(
    conn: &mut PgConnection,
    subscription: &Subscription,
    max_late_cancellations: i32,
    today: Date,
) -> Result<StrikeOutcome, sqlx::Error> {
    let outcome = strike_outcome(subscription.late_cancellations + 1, max_late_cancellations);
    match outcome {
        StrikeOutcome::Counted { late_cancellations } => {
            sqlx::query("UPDATE subscriptions SET late_cancellations = $2, updated_at = now() WHERE id = $1")
                .bind(subscription.id)
                .bind(late_cancellations)
                .execute(&mut *conn)
                .await?;
            let data = format!("lateCancellations={late_cancellations}");
            write_history(conn, subscription.id, "LATE_CANCELLATION_INCREMENT", &data).await?;
        }
        StrikeOutcome::AutoCancelled { late_cancellations } => {
            sqlx::query(
                "UPDATE subscriptions
                 SET late_cancellations = $2, status = 'CANCELLED', end_date = $3, updated_at = now()
                 WHERE id = $1",
            )
            .bind(subscription.id)
            .bind(late_cancellations)
            .bind(today)
            .execute(&mut *conn)
            .await?;
            sqlx::query("UPDATE users SET booking_blocked = TRUE, updated_at = now() WHERE id = $1")
                .bind(subscription.user_id)
                .execute(&mut *conn)
                .await?;
            let data = format!("lateCancellations={late_cancellations}");
            write_history(conn, subscription.id, "AUTO_CANCEL_MAX_LATE_CANCELLATIONS", &data).await?;
            info!(
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                late_cancellations,
                "subscription auto-cancelled, member blocked"
            );
        }
    }
    Ok(outcome)
}

/// Start the user's PENDING pass from `today`, if there is one.
///
/// # Errors
///
/// Returns a database error if a write fails.
pub async fn start_pending(
    conn: &mut PgConnection,
    user_id: Uuid,
    today: Date,
) -> Result<Option<Subscription>, sqlx::Error> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 AND status = 'PENDING' FOR UPDATE"
    );
    let Some(pending) = sqlx::query_as::<_, Subscription>(&sql).bind(user_id).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };

    let sql = format!(
        "UPDATE subscriptions SET status = 'ACTIVE', start_date = $2, end_date = $3, updated_at = now()
         WHERE id = $1 RETURNING {SUBSCRIPTION_COLUMNS}"
    );
    let started = sqlx::query_as::<_, Subscription>(&sql)
        .bind(pending.id)
        .bind(today)
        .bind(add_months(today, pending.months))
        .fetch_one(&mut *conn)
        .await?;
    write_history(conn, pending.id, "STARTED", "started after wallet drained").await?;

    info!(subscription_id = %pending.id, %user_id, "pending subscription started");
    Ok(Some(started))
}

/// Mark ACTIVE passes whose end date is before `today` as EXPIRED.
///
/// # Errors
///
/// Returns a database error if the sweep fails; nothing is committed then.
pub async fn expire_due(pool: &PgPool, today: Date) -> Result<u64, SubscriptionError> {
    let mut tx = pool.begin().await?;
    let expired: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE subscriptions SET status = 'EXPIRED', updated_at = now()
         WHERE status = 'ACTIVE' AND end_date IS NOT NULL AND end_date < $1
         RETURNING id",
    )
    .bind(today)
    .fetch_all(&mut *tx)
    .await?;
    for id in &expired {
        write_history(&mut tx, *id, "EXPIRED", &format!("expired on {today}")).await?;
    }
    tx.commit().await?;
    Ok(expired.len() as u64)
}

// =============================================================================
// BACKGROUND SWEEPER
// =============================================================================

/// Spawn the periodic expiry sweep. Returns a handle for shutdown.
pub fn spawn_expiry_task(pool: PgPool, every_secs: u64) -> JoinHandle<()> {
    info!(every_secs, "subscription expiry sweeper configured");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let today = OffsetDateTime::now_utc().date();
            match expire_due(&pool, today).await {
                Ok(0) => {}
                Ok(count) => info!(count, "subscriptions expired"),
                Err(e) => error!(error = %e, "subscription expiry sweep failed"),
            }
        }
    })
}

#[cfg(test)]
#[path = "subscriptions_test.rs"]
mod tests;
