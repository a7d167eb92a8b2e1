use super::*;
use time::macros::datetime;

fn input() -> ClassInput {
    ClassInput {
        class_type_id: None,
        description: None,
        capacity: None,
        duration_minutes: Some(45),
        start_time: datetime!(2025-05-01 09:00 UTC),
        end_time: None,
        location: None,
        kind: None,
        trainer_id: None,
    }
}

#[test]
fn shape_defaults_capacity_kind_and_end_time() {
    let shape = input().shape().unwrap();
    assert_eq!(shape.capacity, 5);
    assert_eq!(shape.kind, ClassKind::Group);
    assert_eq!(shape.end_time, datetime!(2025-05-01 09:45 UTC));
}

#[test]
fn shape_keeps_explicit_end_time() {
    let explicit = ClassInput { end_time: Some(datetime!(2025-05-01 11:00 UTC)), ..input() };
    assert_eq!(explicit.shape().unwrap().end_time, datetime!(2025-05-01 11:00 UTC));
}

#[test]
fn shape_rejects_non_positive_capacity_and_duration() {
    let zero_capacity = ClassInput { capacity: Some(0), ..input() };
    assert!(matches!(zero_capacity.shape(), Err(ClassError::Invalid(_))));
    let zero_duration = ClassInput { duration_minutes: Some(0), ..input() };
    assert!(matches!(zero_duration.shape(), Err(ClassError::Invalid(_))));
}

#[test]
fn shape_rejects_end_before_start() {
    let backwards = ClassInput { end_time: Some(datetime!(2025-05-01 08:00 UTC)), ..input() };
    assert!(matches!(backwards.shape(), Err(ClassError::Invalid(_))));
}

#[test]
fn input_deserializes_camel_case() {
    let parsed: ClassInput = serde_json::from_value(serde_json::json!({
        "startTime": "2025-05-01T09:00:00Z",
        "durationMinutes": 30,
        "kind": "SMALL_GROUP",
    }))
    .unwrap();
    assert_eq!(parsed.duration_minutes, Some(30));
    assert_eq!(parsed.kind, Some(ClassKind::SmallGroup));
    assert_eq!(parsed.end_time, None);
}

#[test]
fn delete_outcome_serializes_with_tag() {
    let json = serde_json::to_value(DeleteOutcome::Cancelled { bookings_cancelled: 3 }).unwrap();
    assert_eq!(json, serde_json::json!({ "outcome": "cancelled", "bookings_cancelled": 3 }));
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::db::test_db::{integration_pool, seed_class, seed_user};
    use crate::models::{BookingStatus, ClassStatus, Role};

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn members_cannot_lead_classes() {
        let pool = integration_pool().await;
        let member = seed_user(&pool, Role::Member, 0, 0).await;
        let starts = OffsetDateTime::now_utc() + Duration::days(1);
        let err = create(&pool, &ClassInput { start_time: starts, ..input() }, member).await.unwrap_err();
        assert!(matches!(err, ClassError::NotATrainer(_)));
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn delete_without_bookings_removes_class() {
        let pool = integration_pool().await;
        let trainer = seed_user(&pool, Role::Trainer, 0, 0).await;
        let class_id = seed_class(&pool, trainer, 5, 24).await;
        assert_eq!(delete(&pool, class_id).await.unwrap(), DeleteOutcome::Deleted);
        assert!(matches!(get(&pool, class_id).await, Err(ClassError::NotFound(_))));
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn delete_with_bookings_cancels_without_billing() {
        let pool = integration_pool().await;
        let trainer = seed_user(&pool, Role::Trainer, 0, 0).await;
        let member = seed_user(&pool, Role::Member, 5000, 0).await;
        let class_id = seed_class(&pool, trainer, 5, 2).await;
        let booking = bookings::create(&pool, member, class_id, OffsetDateTime::now_utc()).await.unwrap();

        let outcome = delete(&pool, class_id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Cancelled { bookings_cancelled: 1 });

        let class = get(&pool, class_id).await.unwrap();
        assert_eq!(class.status, ClassStatus::Cancelled);
        assert!(class.is_cancelled);
        let booking = bookings::get(&pool, booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::CancelledByGym);

        let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing_events WHERE user_id = $1")
            .bind(member)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(events, 0);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn capacity_cannot_drop_below_bookings() {
        let pool = integration_pool().await;
        let trainer = seed_user(&pool, Role::Trainer, 0, 0).await;
        let class_id = seed_class(&pool, trainer, 5, 24).await;
        for _ in 0..2 {
            let member = seed_user(&pool, Role::Member, 5000, 0).await;
            bookings::create(&pool, member, class_id, OffsetDateTime::now_utc()).await.unwrap();
        }
        let class = get(&pool, class_id).await.unwrap();
        let shrink = ClassInput { capacity: Some(1), start_time: class.start_time, ..input() };
        let err = update(&pool, class_id, &shrink).await.unwrap_err();
        assert!(matches!(err, ClassError::CapacityBelowBookings { capacity: 1, booked: 2 }));
    }
}
