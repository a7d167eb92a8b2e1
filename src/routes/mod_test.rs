use super::*;
use axum::body::Body;
use axum::http::Request;
use axum::http::header::{AUTHORIZATION, ORIGIN};
use tower::ServiceExt;
use uuid::Uuid;

use crate::models::BookingStatus;
use crate::services::billing::BillingError;
use crate::services::bookings::BookingError;
use crate::services::pricing::SettlementError;
use crate::services::subscriptions::SubscriptionError;
use crate::services::users::UserError;
use crate::services::wallet::WalletError;
use crate::state::test_helpers::{mint_token, test_app_state};

async fn send(method: &str, uri: &str, token: Option<&str>) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    app(test_app_state()).oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// ROUTER
// =============================================================================

#[tokio::test]
async fn healthz_is_ok() {
    let response = send("GET", "/healthz", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let response = send("GET", "/api/nope", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn protected_route_without_token_is_unauthorized() {
    let response = send("GET", "/api/auth/me", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "E_UNAUTHORIZED");
}

#[tokio::test]
async fn admin_routes_reject_member_and_trainer_tokens() {
    let member = mint_token("kc-member", &["MEMBER"]);
    let trainer = mint_token("kc-trainer", &["TRAINER"]);
    let id = Uuid::new_v4();

    for uri in [
        "/api/admin/members".to_string(),
        "/api/admin/trainers".to_string(),
        "/api/admin/audit".to_string(),
        "/api/admin/billing/all".to_string(),
        format!("/api/admin/billing/member/{id}"),
        format!("/api/admin/members/{id}/wallet/transactions"),
    ] {
        for token in [&member, &trainer] {
            let response = send("GET", &uri, Some(token)).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }
}

#[tokio::test]
async fn staff_routes_reject_member_token() {
    let member = mint_token("kc-member", &["MEMBER"]);
    let id = Uuid::new_v4();

    let response = send("GET", "/api/users/members", Some(&member)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send("PUT", &format!("/api/bookings/{id}/complete"), Some(&member)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send("PUT", &format!("/api/bookings/{id}/no-show"), Some(&member)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send("GET", &format!("/api/classes/instructor/{id}"), Some(&member)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn report_with_bad_date_is_bad_request() {
    let admin = mint_token("kc-admin", &["ADMIN"]);
    let uri = format!("/api/admin/billing/member/{}?startDate=yesterday", Uuid::new_v4());

    let response = send("GET", &uri, Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "E_INVALID_DATE");
}

#[tokio::test]
async fn wildcard_cors_echoes_any_origin() {
    let request = Request::builder()
        .uri("/healthz")
        .header(ORIGIN, "https://gym.example")
        .body(Body::empty())
        .unwrap();
    let response = app(test_app_state()).oneshot(request).await.unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

// =============================================================================
// STATUS MAPPING
// =============================================================================

#[test]
fn booking_errors_map_to_statuses() {
    use bookings::booking_error_to_status as status;

    assert_eq!(status(&BookingError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
    assert_eq!(status(&BookingError::UserNotAllowed), StatusCode::FORBIDDEN);
    assert_eq!(status(&BookingError::StaffCannotBook), StatusCode::BAD_REQUEST);
    assert_eq!(status(&BookingError::ClassInPast), StatusCode::BAD_REQUEST);
    assert_eq!(
        status(&BookingError::InsufficientFunds { required_cents: 1000, wallet_cents: 0, bonus_days: 0 }),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(status(&BookingError::ClassFull), StatusCode::CONFLICT);
    assert_eq!(status(&BookingError::AlreadyBooked), StatusCode::CONFLICT);
    assert_eq!(status(&BookingError::NotBooked(BookingStatus::CancelledByUser)), StatusCode::CONFLICT);
    assert_eq!(
        status(&BookingError::User(UserError::NotFound(Uuid::nil()))),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn billing_errors_map_to_statuses() {
    use admin::billing_error_to_status as status;

    assert_eq!(status(&BillingError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
    assert_eq!(
        status(&BillingError::Settlement(SettlementError::AlreadySettled {
            current: crate::models::SettlementType::Payment
        })),
        StatusCode::CONFLICT
    );
    assert_eq!(status(&BillingError::Settlement(SettlementError::InvalidTarget)), StatusCode::BAD_REQUEST);
    assert_eq!(status(&BillingError::NoBonusDays), StatusCode::CONFLICT);
    assert_eq!(status(&BillingError::InvalidDate("x".into())), StatusCode::BAD_REQUEST);
    assert_eq!(status(&BillingError::Wallet(WalletError::NegativeBalance)), StatusCode::BAD_REQUEST);
}

#[test]
fn subscription_errors_map_to_statuses() {
    use members::subscription_error_to_status as status;

    assert_eq!(status(&SubscriptionError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
    assert_eq!(status(&SubscriptionError::AlreadySubscribed), StatusCode::CONFLICT);
}

#[test]
fn server_side_failures_hide_details() {
    let err = admin::billing_error(BillingError::Database(sqlx::Error::PoolTimedOut));
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.message, "internal error");
}

#[test]
fn user_conflicts_map_to_conflict() {
    assert_eq!(users::user_error_to_status(&UserError::TrainerHasClasses), StatusCode::CONFLICT);
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::db::test_db::{integration_pool, seed_class, seed_user};
    use crate::models::Role;
    use crate::services::auth::JwtVerifier;
    use crate::state::test_helpers::test_config;

    async fn live_state() -> AppState {
        let config = test_config();
        let jwt = JwtVerifier::from_config(&config.jwt).unwrap();
        AppState::new(integration_pool().await, config, jwt)
    }

    async fn get_public(state: &AppState, uri: &str) -> axum::response::Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app(state.clone()).oneshot(request).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn catalogue_routes_answer_without_a_token() {
        let state = live_state().await;
        let trainer = seed_user(&state.pool, Role::Trainer, 0, 0).await;
        let class_id = seed_class(&state.pool, trainer, 5, 24).await;

        let response = get_public(&state, "/api/classes").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.as_array().unwrap().iter().any(|c| c["id"] == class_id.to_string()));

        let response = get_public(&state, &format!("/api/classes/{class_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_public(&state, &format!("/api/bookings/class/{class_id}/count")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["count"], 0);

        let response = get_public(&state, "/api/class-types/active").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn seed_event(state: &AppState, user_id: Uuid, settlement: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO billing_events (id, user_id, amount_cents, reason, settled, settlement_type)
             VALUES ($1, $2, 900, 'manual', $3 <> 'NONE', $3)",
        )
        .bind(id)
        .bind(user_id)
        .bind(settlement)
        .execute(&state.pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn bulk_settle_audits_only_changed_events() {
        use crate::services::audit::{self, AuditFilter};

        let state = live_state().await;
        let member = seed_user(&state.pool, Role::Member, 0, 0).await;
        let paid = seed_event(&state, member, "PAYMENT").await;
        let open = seed_event(&state, member, "NONE").await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/admin/billing/settle")
            .header(AUTHORIZATION, format!("Bearer {}", mint_token("kc-admin", &["ADMIN"])))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&[paid, open]).unwrap()))
            .unwrap();
        let response = app(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["settled"], 1);

        let filter = AuditFilter { action: Some("BILLING_SETTLED".into()), ..AuditFilter::default() };
        let rows = audit::list(&state.pool, &filter).await.unwrap();
        let targets: Vec<_> = rows.iter().map(|r| r.target_id).collect();
        assert_eq!(targets, vec![Some(open)]);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn unknown_class_count_is_not_found() {
        let state = live_state().await;
        let response = get_public(&state, &format!("/api/bookings/class/{}/count", Uuid::new_v4())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
