use super::*;
use crate::error::ErrorCode;
use time::macros::datetime;

// =============================================================================
// DateRange::parse
// =============================================================================

#[test]
fn date_only_bounds_cover_whole_days() {
    let range = DateRange::parse(Some("2025-03-01"), Some("2025-03-31")).unwrap();
    assert_eq!(range.start, Some(datetime!(2025-03-01 00:00:00 UTC)));
    assert_eq!(range.end, Some(datetime!(2025-03-31 23:59:59 UTC)));
}

#[test]
fn rfc3339_bounds_are_taken_verbatim() {
    let range = DateRange::parse(Some("2025-03-01T10:30:00+02:00"), None).unwrap();
    assert_eq!(range.start, Some(datetime!(2025-03-01 10:30:00 +02:00)));
    assert_eq!(range.end, None);
}

#[test]
fn offsetless_timestamps_are_utc() {
    let range = DateRange::parse(None, Some("2025-03-01T18:00:00")).unwrap();
    assert_eq!(range.end, Some(datetime!(2025-03-01 18:00:00 UTC)));
}

#[test]
fn blank_bounds_are_open() {
    assert_eq!(DateRange::parse(Some("  "), None).unwrap(), DateRange::default());
}

#[test]
fn garbage_bound_is_rejected() {
    let err = DateRange::parse(Some("last tuesday"), None).unwrap_err();
    assert!(matches!(&err, BillingError::InvalidDate(raw) if raw == "last tuesday"));
    assert_eq!(err.error_code(), "E_INVALID_DATE");
}

#[test]
fn settlement_errors_have_distinct_codes() {
    let already = BillingError::from(SettlementError::AlreadySettled { current: SettlementType::Bonus });
    assert_eq!(already.error_code(), "E_ALREADY_SETTLED");
    assert_eq!(BillingError::from(SettlementError::InvalidTarget).error_code(), "E_INVALID_SETTLEMENT");
    assert_eq!(BillingError::NoBonusDays.error_code(), "E_NO_BONUS_DAYS");
}

// =============================================================================
// live database
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::db::test_db::{integration_pool, seed_class, seed_user};
    use crate::services::{bookings, classes};

    async fn unsettled_event(pool: &PgPool, user_id: Uuid, amount_cents: i64) -> BillingEvent {
        sqlx::query_as::<_, BillingEvent>(&format!(
            "INSERT INTO billing_events (id, user_id, amount_cents, reason)
             VALUES ($1, $2, $3, 'manual') RETURNING {BILLING_EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount_cents)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn settle_as_bonus_consumes_a_day_once() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 1).await;
        let event = unsettled_event(&pool, member, 1000).await;
        assert_eq!(total_owed(&pool, member).await.unwrap(), 1000);

        let settled = settle_as_bonus(&pool, event.id).await.unwrap();
        assert!(settled.settled);
        assert_eq!(settled.settlement_type, SettlementType::Bonus);

        // idempotent: same type again is a no-op and keeps the day count
        settle_as_bonus(&pool, event.id).await.unwrap();
        assert_eq!(users::get(&pool, member).await.unwrap().bonus_days, 0);
        assert_eq!(total_owed(&pool, member).await.unwrap(), 0);

        let err = settle_as_payment(&pool, event.id).await.unwrap_err();
        assert!(matches!(err, BillingError::Settlement(SettlementError::AlreadySettled { .. })));
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn settle_as_bonus_without_days_is_rejected() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 0).await;
        let event = unsettled_event(&pool, member, 1000).await;
        assert!(matches!(settle_as_bonus(&pool, event.id).await, Err(BillingError::NoBonusDays)));
        assert_eq!(unsettled_for_user(&pool, member).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn bulk_settle_skips_already_settled() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 1).await;
        let a = unsettled_event(&pool, member, 500).await;
        let b = unsettled_event(&pool, member, 700).await;
        settle_as_bonus(&pool, a.id).await.unwrap();

        assert_eq!(mark_settled_bulk(&pool, &[a.id, b.id]).await.unwrap(), vec![b.id]);
        let events = user_events_between(&pool, member, DateRange::default()).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| (e.id, e.settlement_type)).collect();
        assert!(types.contains(&(a.id, SettlementType::Bonus)));
        assert!(types.contains(&(b.id, SettlementType::Payment)));
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn member_report_joins_class_details() {
        let pool = integration_pool().await;
        let trainer = seed_user(&pool, Role::Trainer, 0, 0).await;
        let member = seed_user(&pool, Role::Member, 1000, 0).await;
        let class_id = seed_class(&pool, trainer, 5, 24).await;
        let now = OffsetDateTime::now_utc();
        let booking = bookings::create(&pool, member, class_id, now).await.unwrap();
        bookings::complete(&pool, booking.id, now).await.unwrap();

        let report = member_report(&pool, member, DateRange::default()).await.unwrap();
        assert_eq!(report.total_owed_cents, 0);
        assert_eq!(report.events.len(), 1);
        let line = &report.events[0];
        assert_eq!(line.booking_id, Some(booking.id));
        assert_eq!(line.class_kind, Some(classes::get(&pool, class_id).await.unwrap().kind));
        assert_eq!(line.settlement_type, SettlementType::Payment);
        assert!(line.trainer_name.is_some());
    }
}
