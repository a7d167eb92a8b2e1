//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds every REST endpoint under a single Axum router. Reads
//! of the class catalogue are public; everything else requires a bearer
//! token, and the admin surface lives under `/api/admin`. Role checks
//! happen inside each handler through `AuthUser`, so the router itself is a
//! flat table of paths.

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod class_types;
pub mod classes;
pub mod members;
pub mod schedules;
pub mod users;
pub mod wallet;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{delete, get, post, put};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth/me", get(auth::me))
        // users
        .route("/api/users", post(users::create_user))
        .route("/api/users/me", get(users::get_me).put(users::update_me))
        .route("/api/users/me/billing", get(users::my_billing))
        .route("/api/users/me/wallet", get(wallet::my_wallet))
        .route("/api/users/trainers", get(users::list_trainers))
        .route("/api/users/members", get(users::list_members))
        .route("/api/users/{id}", put(users::update_user).delete(users::delete_user))
        // class types
        .route("/api/class-types", get(class_types::list).post(class_types::create))
        .route("/api/class-types/active", get(class_types::list_active))
        .route("/api/class-types/trainer/{id}", get(class_types::list_by_trainer))
        .route(
            "/api/class-types/{id}",
            get(class_types::get).put(class_types::update).delete(class_types::delete),
        )
        // classes
        .route("/api/classes", get(classes::list).post(classes::create))
        .route("/api/classes/trainer/{id}", get(classes::list_by_trainer))
        .route("/api/classes/instructor/{id}", get(classes::list_by_trainer))
        .route("/api/classes/{id}", get(classes::get).put(classes::update).delete(classes::delete))
        // schedules
        .route("/api/schedules", get(schedules::list_between).post(schedules::create))
        .route("/api/schedules/{id}/cancel", put(schedules::cancel))
        .route("/api/schedules/class/{id}", get(schedules::list_for_class))
        .route("/api/schedules/trainer/{id}", get(schedules::list_for_trainer))
        // bookings
        .route("/api/bookings", post(bookings::create))
        .route("/api/bookings/me", get(bookings::list_mine))
        .route("/api/bookings/user/{id}", get(bookings::list_for_user))
        .route("/api/bookings/class/{id}", get(bookings::list_for_class))
        .route("/api/bookings/class/{id}/count", get(bookings::count_for_class))
        .route("/api/bookings/{id}/cancel", put(bookings::cancel))
        .route("/api/bookings/{id}/complete", put(bookings::complete))
        .route("/api/bookings/{id}/no-show", put(bookings::no_show))
        // member self service
        .route("/api/members/me/subscription", get(members::my_subscription))
        .route("/api/members/me/subscription/history", get(members::my_subscription_history))
        .nest("/api/admin", admin_routes())
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/members", get(admin::list_members))
        .route("/members/{id}/base-cost", post(admin::set_base_cost))
        .route("/members/{id}/base-costs", post(admin::set_base_costs))
        .route("/members/{id}/bonus-days", post(admin::set_bonus_days))
        .route("/members/{id}/promote-to-trainer", post(admin::promote_to_trainer))
        .route(
            "/members/{id}/subscription",
            get(members::list_for_member).post(members::create_for_member),
        )
        .route("/members/{id}/subscription/history", get(members::history_for_member))
        .route("/members/{id}/subscription/{sid}/cancel", post(members::cancel_for_member))
        .route("/members/{id}/wallet/topup", post(wallet::top_up))
        .route("/members/{id}/wallet/set", post(wallet::set_balance))
        .route("/members/{id}/wallet/transactions", get(wallet::transactions))
        .route("/users/{id}", delete(admin::delete_user))
        .route("/users/search", get(admin::search_users))
        .route("/trainers", get(admin::list_trainers))
        .route("/billing/member/{id}", get(admin::member_report))
        .route("/billing/member/{id}/events", get(admin::member_events))
        .route("/billing/all", get(admin::all_reports))
        .route("/billing/events", get(admin::events_between))
        .route("/billing/settle", post(admin::settle_bulk))
        .route("/billing/events/{id}/settle/payment", post(admin::settle_payment))
        .route("/billing/events/{id}/settle/bonus", post(admin::settle_bonus))
        .route("/audit", get(admin::list_audit))
}

/// `*` (or an empty list) allows any origin; otherwise only the listed ones.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
