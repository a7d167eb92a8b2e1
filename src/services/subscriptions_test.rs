use super::*;
use time::macros::date;

// =============================================================================
// add_months
// =============================================================================

#[test]
fn add_months_keeps_day_when_it_exists() {
    assert_eq!(add_months(date!(2025 - 03 - 15), 1), date!(2025 - 04 - 15));
    assert_eq!(add_months(date!(2025 - 03 - 15), 12), date!(2026 - 03 - 15));
}

#[test]
fn add_months_clamps_to_month_end() {
    assert_eq!(add_months(date!(2025 - 01 - 31), 1), date!(2025 - 02 - 28));
    assert_eq!(add_months(date!(2024 - 01 - 31), 1), date!(2024 - 02 - 29));
    assert_eq!(add_months(date!(2025 - 08 - 31), 1), date!(2025 - 09 - 30));
}

#[test]
fn add_months_follows_century_leap_rules() {
    assert_eq!(add_months(date!(2000 - 01 - 31), 1), date!(2000 - 02 - 29));
    assert_eq!(add_months(date!(2100 - 01 - 31), 1), date!(2100 - 02 - 28));
}

#[test]
fn add_months_rolls_over_year() {
    assert_eq!(add_months(date!(2025 - 11 - 10), 3), date!(2026 - 02 - 10));
}

// =============================================================================
// initial_status / strike_outcome
// =============================================================================

#[test]
fn empty_wallet_starts_immediately() {
    assert_eq!(initial_status(0), SubscriptionStatus::Active);
    assert_eq!(initial_status(1), SubscriptionStatus::Pending);
}

#[test]
fn fourth_strike_auto_cancels_with_default_limit() {
    assert_eq!(strike_outcome(3, 4), StrikeOutcome::Counted { late_cancellations: 3 });
    assert_eq!(strike_outcome(4, 4), StrikeOutcome::AutoCancelled { late_cancellations: 4 });
}

#[test]
fn strike_limit_is_configurable() {
    assert_eq!(strike_outcome(1, 1), StrikeOutcome::AutoCancelled { late_cancellations: 1 });
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::db::test_db::{integration_pool, seed_user};
    use crate::models::Role;

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn second_subscription_is_rejected_while_one_is_pending() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 2000, 0).await;
        let today = date!(2025 - 06 - 01);

        let first = create(&pool, member, 5000, 1, today).await.unwrap();
        assert_eq!(first.status, SubscriptionStatus::Pending);
        assert_eq!(first.start_date, None);
        assert!(matches!(create(&pool, member, 5000, 1, today).await, Err(SubscriptionError::AlreadySubscribed)));

        let events = history(&pool, first.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "CREATED");
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn strikes_block_member_at_limit() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 0).await;
        let today = date!(2025 - 06 - 01);
        let sub = create(&pool, member, 5000, 1, today).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.end_date, Some(date!(2025 - 07 - 01)));

        for _ in 0..4 {
            let mut tx = pool.begin().await.unwrap();
            let locked = lock_active_for_user(&mut tx, member).await.unwrap().unwrap();
            record_late_cancellation(&mut tx, &locked, 4, today).await.unwrap();
            tx.commit().await.unwrap();
        }

        let sub = get(&pool, sub.id).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.late_cancellations, 4);
        assert!(users::get(&pool, member).await.unwrap().booking_blocked);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn expiry_sweep_only_touches_past_end_dates() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 0).await;
        let sub = create(&pool, member, 0, 1, date!(2025 - 01 - 01)).await.unwrap();

        assert_eq!(expire_due(&pool, date!(2025 - 02 - 01)).await.unwrap(), 0);
        assert_eq!(expire_due(&pool, date!(2025 - 02 - 02)).await.unwrap(), 1);
        assert_eq!(get(&pool, sub.id).await.unwrap().status, SubscriptionStatus::Expired);
    }
}
