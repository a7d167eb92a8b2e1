//! Billing service: charge events, settlement and member reports.
//!
//! DESIGN
//! ======
//! A billing event is a record of something a member owes (or owed) for a
//! booking. Events are created inside the booking transaction that caused
//! them, so a cancelled or completed booking and its charge commit together.
//! Settlement locks the event row and follows `SettlementType::transition`;
//! the `settled` column is always derived from the settlement type.
//!
//! SYSTEM CONTEXT
//! ==============
//! Called by the bookings service (cancellation and attendance charges) and
//! by the admin routes (reports and settlement).

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::info;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::models::{
    BILLING_EVENT_COLUMNS, BillingEvent, Booking, ClassKind, GymClass, Role, SettlementType, User,
};
use crate::services::pricing::{BaseCosts, SettlementError, Transition, cancellation_charge, resolve_base_cost};
use crate::services::subscriptions;
use crate::services::users::{self, UserError};
use crate::services::wallet::{self, WalletError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("billing event not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error("user has no bonus days available")]
    NoBonusDays,
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for BillingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_BILLING_EVENT_NOT_FOUND",
            Self::Settlement(SettlementError::AlreadySettled { .. }) => "E_ALREADY_SETTLED",
            Self::Settlement(SettlementError::InvalidTarget) => "E_INVALID_SETTLEMENT",
            Self::NoBonusDays => "E_NO_BONUS_DAYS",
            Self::InvalidDate(_) => "E_INVALID_DATE",
            Self::User(e) => crate::error::ErrorCode::error_code(e),
            Self::Wallet(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Inclusive event-date window; `None` bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

impl DateRange {
    /// Parse report query bounds. A bare `YYYY-MM-DD` start means the start
    /// of that day and a bare end means its last second; timestamps are
    /// taken as given (RFC 3339, or UTC when no offset is present).
    ///
    /// # Errors
    ///
    /// `InvalidDate` when a bound is neither form.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, BillingError> {
        Ok(Self { start: parse_bound(start, Bound::Start)?, end: parse_bound(end, Bound::End)? })
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn parse_bound(raw: Option<&str>, bound: Bound) -> Result<Option<OffsetDateTime>, BillingError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = Date::parse(raw, format_description!("[year]-[month]-[day]")) {
        let at = match bound {
            Bound::Start => Time::MIDNIGHT,
            Bound::End => time::macros::time!(23:59:59),
        };
        return Ok(Some(PrimitiveDateTime::new(date, at).assume_utc()));
    }
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(Some(ts));
    }
    PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"))
        .map(|ts| Some(ts.assume_utc()))
        .map_err(|_| BillingError::InvalidDate(raw.to_owned()))
}

/// One line of a member billing report.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventSummary {
    pub id: Uuid,
    pub booking_id: Option<Uuid>,
    pub class_name: Option<String>,
    pub class_kind: Option<ClassKind>,
    pub trainer_name: Option<String>,
    pub amount_cents: i64,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub event_date: OffsetDateTime,
    pub settled: bool,
    pub settlement_type: SettlementType,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberReport {
    pub user_id: Uuid,
    pub user_name: String,
    pub base_cost_cents: Option<i64>,
    pub bonus_days: i32,
    pub total_owed_cents: i64,
    pub events: Vec<EventSummary>,
}

// =============================================================================
// CHARGES
// =============================================================================

async fn insert_event(
    conn: &mut PgConnection,
    user_id: Uuid,
    booking_id: Uuid,
    amount_cents: i64,
    reason: &str,
    settlement: SettlementType,
) -> Result<BillingEvent, sqlx::Error> {
    let sql = format!(
        "INSERT INTO billing_events (id, user_id, booking_id, amount_cents, reason, settled, settlement_type)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {BILLING_EVENT_COLUMNS}"
    );
    sqlx::query_as::<_, BillingEvent>(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(booking_id)
        .bind(amount_cents)
        .bind(reason)
        .bind(settlement.is_settled())
        .bind(settlement)
        .fetch_one(conn)
        .await
}

/// Bill a user cancellation when it falls inside the late window.
///
/// With an ACTIVE subscription the event is recorded already settled and a
/// strike is counted against the subscription; otherwise the base cost is
/// left owing. Free classes outside a subscription produce no event.
///
/// # Errors
///
/// Returns a database error if a write fails.
pub async fn create_cancellation_charge(
    conn: &mut PgConnection,
    booking: &Booking,
    class: &GymClass,
    user: &User,
    cancelled_at: OffsetDateTime,
    config: &BillingConfig,
    today: Date,
) -> Result<Option<BillingEvent>, BillingError> {
    let Some(late) = cancellation_charge(class.start_time, cancelled_at, config.late_cancel_threshold_hours) else {
        return Ok(None);
    };
    let amount_cents = resolve_base_cost(&BaseCosts::from(user), class.kind);
    let reason = late.reason();

    if let Some(subscription) = subscriptions::lock_active_for_user(conn, user.id).await? {
        let event =
            insert_event(conn, user.id, booking.id, amount_cents, &reason, SettlementType::Subscription).await?;
        let outcome =
            subscriptions::record_late_cancellation(conn, &subscription, config.max_late_cancellations, today).await?;
        info!(booking_id = %booking.id, user_id = %user.id, ?outcome, "late cancellation counted against subscription");
        return Ok(Some(event));
    }

    if amount_cents == 0 {
        return Ok(None);
    }
    let event = insert_event(conn, user.id, booking.id, amount_cents, &reason, SettlementType::None).await?;
    info!(
        booking_id = %booking.id,
        user_id = %user.id,
        amount_cents,
        hours_before = late.hours_before,
        "late cancellation charged"
    );
    Ok(Some(event))
}

/// Bill an attended (or no-show) booking.
///
/// An ACTIVE subscription covers it outright. Otherwise the wallet charge
/// plan runs and the event records how it was paid, or the remainder still
/// owed when neither the wallet nor a bonus day covered it.
///
/// # Errors
///
/// Returns a database error if a write fails.
pub async fn create_attendance_charge(
    conn: &mut PgConnection,
    booking: &Booking,
    class: &GymClass,
    user: &User,
    reason_prefix: &str,
    today: Date,
) -> Result<Option<BillingEvent>, BillingError> {
    let amount_cents = resolve_base_cost(&BaseCosts::from(user), class.kind);
    let label = class.name.as_deref().unwrap_or_else(|| class.kind.as_str());
    let reason = format!("{reason_prefix}: {label}");

    if subscriptions::lock_active_for_user(conn, user.id).await?.is_some() {
        let event =
            insert_event(conn, user.id, booking.id, amount_cents, &reason, SettlementType::Subscription).await?;
        return Ok(Some(event));
    }
    if amount_cents == 0 {
        return Ok(None);
    }

    let charge = wallet::charge_for_booking(conn, user.id, amount_cents, booking.id, today).await?;
    let settlement = charge.plan.settlement_type();
    let billed = if settlement.is_settled() { amount_cents } else { charge.plan.remainder_cents(amount_cents) };
    let event = insert_event(conn, user.id, booking.id, billed, &reason, settlement).await?;

    info!(
        booking_id = %booking.id,
        user_id = %user.id,
        amount_cents = billed,
        settlement = %settlement,
        "attendance charged"
    );
    Ok(Some(event))
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn unsettled_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<BillingEvent>, BillingError> {
    users::get(pool, user_id).await?;
    let sql = format!(
        "SELECT {BILLING_EVENT_COLUMNS} FROM billing_events
         WHERE user_id = $1 AND NOT settled ORDER BY event_date"
    );
    Ok(sqlx::query_as::<_, BillingEvent>(&sql).bind(user_id).fetch_all(pool).await?)
}

/// Sum of every unsettled event for the user, in cents.
///
/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn total_owed(pool: &PgPool, user_id: Uuid) -> Result<i64, BillingError> {
    users::get(pool, user_id).await?;
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM billing_events WHERE user_id = $1 AND NOT settled",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(total)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn events_between(pool: &PgPool, range: DateRange) -> Result<Vec<BillingEvent>, BillingError> {
    let sql = format!(
        "SELECT {BILLING_EVENT_COLUMNS} FROM billing_events
         WHERE ($1::timestamptz IS NULL OR event_date >= $1)
           AND ($2::timestamptz IS NULL OR event_date <= $2)
         ORDER BY event_date DESC"
    );
    Ok(sqlx::query_as::<_, BillingEvent>(&sql).bind(range.start).bind(range.end).fetch_all(pool).await?)
}

/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn user_events_between(
    pool: &PgPool,
    user_id: Uuid,
    range: DateRange,
) -> Result<Vec<BillingEvent>, BillingError> {
    users::get(pool, user_id).await?;
    let sql = format!(
        "SELECT {BILLING_EVENT_COLUMNS} FROM billing_events
         WHERE user_id = $1
           AND ($2::timestamptz IS NULL OR event_date >= $2)
           AND ($3::timestamptz IS NULL OR event_date <= $3)
         ORDER BY event_date DESC"
    );
    Ok(sqlx::query_as::<_, BillingEvent>(&sql)
        .bind(user_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(pool)
        .await?)
}

// =============================================================================
// SETTLEMENT
// =============================================================================

async fn lock_event(conn: &mut PgConnection, id: Uuid) -> Result<BillingEvent, BillingError> {
    let sql = format!("SELECT {BILLING_EVENT_COLUMNS} FROM billing_events WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, BillingEvent>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(BillingError::NotFound(id))
}

async fn apply(
    conn: &mut PgConnection,
    event: BillingEvent,
    transition: Transition,
) -> Result<BillingEvent, sqlx::Error> {
    let Transition::Settle(settlement) = transition else {
        return Ok(event);
    };
    let sql = format!(
        "UPDATE billing_events SET settled = TRUE, settlement_type = $2 WHERE id = $1
         RETURNING {BILLING_EVENT_COLUMNS}"
    );
    let settled = sqlx::query_as::<_, BillingEvent>(&sql).bind(event.id).bind(settlement).fetch_one(conn).await?;
    info!(event_id = %settled.id, user_id = %settled.user_id, settlement = %settlement, "billing event settled");
    Ok(settled)
}

/// Mark an event settled; open events become PAYMENT, settled ones are left alone.
///
/// # Errors
///
/// `NotFound` when missing.
pub async fn mark_settled(pool: &PgPool, id: Uuid) -> Result<BillingEvent, BillingError> {
    let mut tx = pool.begin().await?;
    let event = lock_event(&mut tx, id).await?;
    let transition = event.settlement_type.mark_settled();
    let event = apply(&mut tx, event, transition).await?;
    tx.commit().await?;
    Ok(event)
}

/// Settle a batch in one transaction. Returns the ids of the events that
/// actually changed; already-settled ones are skipped.
///
/// # Errors
///
/// `NotFound` for any unknown id; nothing is settled then.
pub async fn mark_settled_bulk(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Uuid>, BillingError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut tx = pool.begin().await?;
    let mut changed = Vec::new();
    for id in ids {
        let event = lock_event(&mut tx, *id).await?;
        let transition = event.settlement_type.mark_settled();
        if transition != Transition::Unchanged {
            changed.push(event.id);
        }
        apply(&mut tx, event, transition).await?;
    }
    tx.commit().await?;
    Ok(changed)
}

/// # Errors
///
/// `NotFound` when missing; `Settlement(AlreadySettled)` when settled another way.
pub async fn settle_as_payment(pool: &PgPool, id: Uuid) -> Result<BillingEvent, BillingError> {
    let mut tx = pool.begin().await?;
    let event = lock_event(&mut tx, id).await?;
    let transition = event.settlement_type.transition(SettlementType::Payment)?;
    let event = apply(&mut tx, event, transition).await?;
    tx.commit().await?;
    Ok(event)
}

/// Settle an event with one of the member's bonus days.
///
/// # Errors
///
/// `NoBonusDays` when the member has none left; `NotFound` /
/// `Settlement(AlreadySettled)` as for payments.
pub async fn settle_as_bonus(pool: &PgPool, id: Uuid) -> Result<BillingEvent, BillingError> {
    let mut tx = pool.begin().await?;
    let event = lock_event(&mut tx, id).await?;
    let transition = event.settlement_type.transition(SettlementType::Bonus)?;
    if transition == Transition::Unchanged {
        return Ok(event);
    }

    let user = users::lock(&mut tx, event.user_id).await?;
    if user.bonus_days <= 0 {
        return Err(BillingError::NoBonusDays);
    }
    sqlx::query("UPDATE users SET bonus_days = bonus_days - 1, updated_at = now() WHERE id = $1")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    let event = apply(&mut tx, event, transition).await?;
    tx.commit().await?;
    Ok(event)
}

// =============================================================================
// REPORTS
// =============================================================================

async fn event_summaries(pool: &PgPool, user_id: Uuid, range: DateRange) -> Result<Vec<EventSummary>, sqlx::Error> {
    sqlx::query_as::<_, EventSummary>(
        "SELECT e.id, e.booking_id, t.name AS class_name, c.kind AS class_kind, tr.name AS trainer_name,
                e.amount_cents, e.reason, e.event_date, e.settled, e.settlement_type
         FROM billing_events e
         LEFT JOIN bookings b ON b.id = e.booking_id
         LEFT JOIN class_instances c ON c.id = b.class_id
         LEFT JOIN class_types t ON t.id = c.class_type_id
         LEFT JOIN users tr ON tr.id = c.trainer_id
         WHERE e.user_id = $1
           AND ($2::timestamptz IS NULL OR e.event_date >= $2)
           AND ($3::timestamptz IS NULL OR e.event_date <= $3)
         ORDER BY e.event_date DESC",
    )
    .bind(user_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await
}

async fn report_for(pool: &PgPool, user: User, range: DateRange) -> Result<MemberReport, BillingError> {
    let events = event_summaries(pool, user.id, range).await?;
    let total_owed_cents = total_owed(pool, user.id).await?;
    Ok(MemberReport {
        user_id: user.id,
        user_name: user.name,
        base_cost_cents: user.base_cost_cents,
        bonus_days: user.bonus_days,
        total_owed_cents,
        events,
    })
}

/// Events in range plus the member's all-time amount owed.
///
/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn member_report(pool: &PgPool, user_id: Uuid, range: DateRange) -> Result<MemberReport, BillingError> {
    let user = users::get(pool, user_id).await?;
    report_for(pool, user, range).await
}

/// One report per MEMBER, in member name order.
///
/// # Errors
///
/// Returns a database error if any query fails.
pub async fn all_member_reports(pool: &PgPool, range: DateRange) -> Result<Vec<MemberReport>, BillingError> {
    let members = users::list_by_role(pool, Role::Member).await?;
    let mut reports = Vec::with_capacity(members.len());
    for member in members {
        reports.push(report_for(pool, member, range).await?);
    }
    Ok(reports)
}

#[cfg(test)]
#[path = "billing_test.rs"]
mod tests;
