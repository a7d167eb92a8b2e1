//! Wallet routes: the caller's own balance, and admin top-up / set.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::auth::AuthUser;
use super::users::user_error_to_status;
use crate::error::{ApiError, ApiResult};
use crate::models::WalletTransaction;
use crate::services::audit::{self, AuditEntry};
use crate::services::wallet::{self, WalletError};
use crate::state::AppState;

pub(crate) fn wallet_error_to_status(err: &WalletError) -> StatusCode {
    match err {
        WalletError::NonPositiveTopUp | WalletError::NegativeBalance => StatusCode::BAD_REQUEST,
        WalletError::User(e) => user_error_to_status(e),
        WalletError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn wallet_error(err: WalletError) -> ApiError {
    ApiError::from_error(wallet_error_to_status(&err), &err)
}

#[derive(Serialize)]
pub struct WalletView {
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub bonus_days: i32,
    pub transactions: Vec<WalletTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletChange {
    pub amount_cents: i64,
    pub reference: Option<String>,
}

/// `GET /api/users/me/wallet`
pub async fn my_wallet(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<WalletView>> {
    let me = auth.resolve(&state.pool).await?;
    let transactions = wallet::transactions(&state.pool, me.id).await.map_err(wallet_error)?;
    Ok(Json(WalletView {
        user_id: me.id,
        balance_cents: me.wallet_balance_cents,
        bonus_days: me.bonus_days,
        transactions,
    }))
}

/// `POST /api/admin/members/{id}/wallet/topup`
pub async fn top_up(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Json(input): Json<WalletChange>,
) -> ApiResult<Json<WalletTransaction>> {
    auth.require_admin()?;
    let admin = auth.resolve(&state.pool).await?;
    let entry = wallet::top_up(&state.pool, member_id, input.amount_cents, input.reference.as_deref())
        .await
        .map_err(wallet_error)?;
    let audit_entry = AuditEntry::new(admin.id, "WALLET_TOPUP", "USER", member_id)
        .with_metadata(serde_json::json!({ "amountCents": input.amount_cents, "reference": input.reference }));
    audit::record_best_effort(&state.pool, &audit_entry).await;
    Ok(Json(entry))
}

/// `POST /api/admin/members/{id}/wallet/set`
pub async fn set_balance(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
    Json(input): Json<WalletChange>,
) -> ApiResult<Json<WalletTransaction>> {
    auth.require_admin()?;
    let admin = auth.resolve(&state.pool).await?;
    let today = OffsetDateTime::now_utc().date();
    let entry = wallet::set_balance(&state.pool, member_id, input.amount_cents, input.reference.as_deref(), today)
        .await
        .map_err(wallet_error)?;
    let audit_entry = AuditEntry::new(admin.id, "WALLET_SET", "USER", member_id).with_metadata(
        serde_json::json!({ "amountCents": input.amount_cents, "deltaCents": entry.amount_cents }),
    );
    audit::record_best_effort(&state.pool, &audit_entry).await;
    Ok(Json(entry))
}

/// `GET /api/admin/members/{id}/wallet/transactions`
pub async fn transactions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<Uuid>,
) -> ApiResult<Json<Vec<WalletTransaction>>> {
    auth.require_admin()?;
    Ok(Json(wallet::transactions(&state.pool, member_id).await.map_err(wallet_error)?))
}
