//! Admin routes under `/api/admin`: member pricing, billing reports and
//! settlement, user search and the audit trail.
//!
//! Every handler requires an ADMIN token. Mutations write an audit row
//! after they succeed; a failed audit write is logged and never fails the
//! request.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::AuthUser;
use super::users::{user_error, user_error_to_status};
use super::wallet::wallet_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuditLog, BillingEvent, Role, User};
use crate::services::audit::{self, AuditEntry, AuditFilter};
use crate::services::billing::{self, BillingError, DateRange, MemberReport};
use crate::services::pricing::SettlementError;
use crate::services::users::{self, BaseCostsUpdate};
use crate::state::AppState;

pub(crate) fn billing_error_to_status(err: &BillingError) -> StatusCode {
    match err {
        BillingError::NotFound(_) => StatusCode::NOT_FOUND,
        BillingError::Settlement(SettlementError::AlreadySettled { .. }) | BillingError::NoBonusDays => {
            StatusCode::CONFLICT
        }
        BillingError::Settlement(SettlementError::InvalidTarget) | BillingError::InvalidDate(_) => {
            StatusCode::BAD_REQUEST
        }
        BillingError::User(e) => user_error_to_status(e),
        BillingError::Wallet(e) => wallet_error_to_status(e),
        BillingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn billing_error(err: BillingError) -> ApiError {
    ApiError::from_error(billing_error_to_status(&err), &err)
}

/// Run the admin check and load the admin's user row for audit attribution.
async fn admin_user(state: &AppState, auth: &AuthUser) -> ApiResult<User> {
    auth.require_admin()?;
    auth.resolve(&state.pool).await
}

// =============================================================================
// MEMBERS
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseCostQuery {
    pub base_cost_cents: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusDaysQuery {
    pub bonus_days: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

/// `GET /api/admin/members`
pub async fn list_members(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<User>>> {
    auth.require_admin()?;
    Ok(Json(users::list_by_role(&state.pool, Role::Member).await.map_err(user_error)?))
}

/// `GET /api/admin/trainers`
pub async fn list_trainers(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<User>>> {
    auth.require_admin()?;
    Ok(Json(users::list_by_role(&state.pool, Role::Trainer).await.map_err(user_error)?))
}

/// `GET /api/admin/users/search?query`: name or email substring, capped.
pub async fn search_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<User>>> {
    auth.require_admin()?;
    Ok(Json(users::search(&state.pool, &query.query).await.map_err(user_error)?))
}

/// `POST /api/admin/members/{id}/base-cost?baseCostCents`
pub async fn set_base_cost(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Query(query): Query<BaseCostQuery>,
) -> ApiResult<Json<User>> {
    let admin = admin_user(&state, &auth).await?;
    let user = users::set_base_cost(&state.pool, member_id, query.base_cost_cents).await.map_err(user_error)?;
    let entry = AuditEntry::new(admin.id, "BASE_COST_SET", "USER", member_id)
        .with_metadata(serde_json::json!({ "baseCostCents": query.base_cost_cents }));
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(user))
}

/// `POST /api/admin/members/{id}/base-costs`: per class kind.
pub async fn set_base_costs(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Json(input): Json<BaseCostsUpdate>,
) -> ApiResult<Json<User>> {
    let admin = admin_user(&state, &auth).await?;
    let user = users::set_base_costs(&state.pool, member_id, &input).await.map_err(user_error)?;
    let entry = AuditEntry::new(admin.id, "BASE_COSTS_SET", "USER", member_id).with_metadata(serde_json::json!({
        "group": user.group_base_cost_cents,
        "smallGroup": user.small_group_base_cost_cents,
        "personal": user.personal_base_cost_cents,
        "openGym": user.open_gym_base_cost_cents,
    }));
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(user))
}

/// `POST /api/admin/members/{id}/bonus-days?bonusDays`
pub async fn set_bonus_days(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Query(query): Query<BonusDaysQuery>,
) -> ApiResult<Json<User>> {
    let admin = admin_user(&state, &auth).await?;
    let user = users::set_bonus_days(&state.pool, member_id, query.bonus_days).await.map_err(user_error)?;
    let entry = AuditEntry::new(admin.id, "BONUS_DAYS_SET", "USER", member_id)
        .with_metadata(serde_json::json!({ "bonusDays": query.bonus_days }));
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(user))
}

/// `POST /api/admin/members/{id}/promote-to-trainer`
pub async fn promote_to_trainer(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let admin = admin_user(&state, &auth).await?;
    let user = users::promote_to_trainer(&state.pool, member_id).await.map_err(user_error)?;
    audit::record_best_effort(&state.pool, &AuditEntry::new(admin.id, "PROMOTED_TO_TRAINER", "USER", member_id))
        .await;
    Ok(Json(user))
}

/// `DELETE /api/admin/users/{id}`: refuses admins and trainers still leading classes.
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let admin = admin_user(&state, &auth).await?;
    users::delete_user_checked(&state.pool, user_id).await.map_err(user_error)?;
    audit::record_best_effort(&state.pool, &AuditEntry::new(admin.id, "USER_DELETED", "USER", user_id)).await;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// BILLING
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ReportQuery {
    fn range(&self) -> ApiResult<DateRange> {
        DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref()).map_err(billing_error)
    }
}

#[derive(Serialize)]
pub struct SettledCount {
    pub settled: usize,
}

/// `GET /api/admin/billing/member/{id}?startDate&endDate`
pub async fn member_report(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<MemberReport>> {
    auth.require_admin()?;
    let range = query.range()?;
    Ok(Json(billing::member_report(&state.pool, member_id, range).await.map_err(billing_error)?))
}

/// `GET /api/admin/billing/all?startDate&endDate`: one report per member.
pub async fn all_reports(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<MemberReport>>> {
    auth.require_admin()?;
    let range = query.range()?;
    Ok(Json(billing::all_member_reports(&state.pool, range).await.map_err(billing_error)?))
}

/// `GET /api/admin/billing/events?startDate&endDate`: raw events, every member.
pub async fn events_between(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<BillingEvent>>> {
    auth.require_admin()?;
    let range = query.range()?;
    Ok(Json(billing::events_between(&state.pool, range).await.map_err(billing_error)?))
}

/// `GET /api/admin/billing/member/{id}/events?startDate&endDate`
pub async fn member_events(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<BillingEvent>>> {
    auth.require_admin()?;
    let range = query.range()?;
    Ok(Json(billing::user_events_between(&state.pool, member_id, range).await.map_err(billing_error)?))
}

/// `POST /api/admin/billing/settle`: body is a JSON array of event ids.
pub async fn settle_bulk(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(ids): Json<Vec<Uuid>>,
) -> ApiResult<Json<SettledCount>> {
    let admin = admin_user(&state, &auth).await?;
    let changed = billing::mark_settled_bulk(&state.pool, &ids).await.map_err(billing_error)?;
    for id in &changed {
        let entry = AuditEntry::new(admin.id, "BILLING_SETTLED", "BILLING_EVENT", *id);
        audit::record_best_effort(&state.pool, &entry).await;
    }
    Ok(Json(SettledCount { settled: changed.len() }))
}

/// `POST /api/admin/billing/events/{id}/settle/payment`
pub async fn settle_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<BillingEvent>> {
    let admin = admin_user(&state, &auth).await?;
    let event = billing::settle_as_payment(&state.pool, event_id).await.map_err(billing_error)?;
    let entry = AuditEntry::new(admin.id, "BILLING_SETTLED_PAYMENT", "BILLING_EVENT", event_id);
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(event))
}

/// `POST /api/admin/billing/events/{id}/settle/bonus`: consumes a bonus day.
pub async fn settle_bonus(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<BillingEvent>> {
    let admin = admin_user(&state, &auth).await?;
    let event = billing::settle_as_bonus(&state.pool, event_id).await.map_err(billing_error)?;
    let entry = AuditEntry::new(admin.id, "BILLING_SETTLED_BONUS", "BILLING_EVENT", event_id)
        .with_metadata(serde_json::json!({ "userId": event.user_id }));
    audit::record_best_effort(&state.pool, &entry).await;
    Ok(Json(event))
}

// =============================================================================
// AUDIT
// =============================================================================

/// `GET /api/admin/audit?actor&action&targetType&targetId&page&size`
pub async fn list_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<AuditFilter>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    auth.require_admin()?;
    Ok(Json(audit::list(&state.pool, &filter).await?))
}
