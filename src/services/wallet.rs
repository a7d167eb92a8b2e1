//! Wallet service: prepaid balance, ledger and booking charges.
//!
//! DESIGN
//! ======
//! The balance lives on the user row (`wallet_balance_cents`, never
//! negative); every change also appends a signed `wallet_transactions` row
//! so the ledger explains the balance. All writes lock the user row first,
//! which serializes concurrent top-ups and charges for the same member.
//!
//! A charge that leaves the balance at zero starts the member's pending
//! subscription, if any.

use sqlx::{PgConnection, PgPool};
use time::Date;
use tracing::info;
use uuid::Uuid;

use crate::models::{WalletTransaction, WalletTxKind};
use crate::services::pricing::{ChargePlan, plan_wallet_charge};
use crate::services::subscriptions;
use crate::services::users::{self, UserError};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("top-up amount must be positive")]
    NonPositiveTopUp,
    #[error("balance must not be negative")]
    NegativeBalance,
    #[error(transparent)]
    User(#[from] UserError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for WalletError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NonPositiveTopUp | Self::NegativeBalance => "E_INVALID_AMOUNT",
            Self::User(e) => crate::error::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Outcome of charging a booking against the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletCharge {
    pub plan: ChargePlan,
    pub balance_after_cents: i64,
}

#[must_use]
pub fn booking_reference(booking_id: Uuid) -> String {
    format!("booking:{booking_id}")
}

async fn append_ledger(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount_cents: i64,
    kind: WalletTxKind,
    reference: Option<&str>,
) -> Result<WalletTransaction, sqlx::Error> {
    sqlx::query_as::<_, WalletTransaction>(
        "INSERT INTO wallet_transactions (id, user_id, amount_cents, kind, reference)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, user_id, amount_cents, kind, reference, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(amount_cents)
    .bind(kind)
    .bind(reference)
    .fetch_one(conn)
    .await
}

/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn balance(pool: &PgPool, user_id: Uuid) -> Result<i64, WalletError> {
    Ok(users::get(pool, user_id).await?.wallet_balance_cents)
}

/// Credit the wallet.
///
/// # Errors
///
/// `NonPositiveTopUp` for amounts <= 0, `User(NotFound)` for unknown users.
pub async fn top_up(
    pool: &PgPool,
    user_id: Uuid,
    amount_cents: i64,
    reference: Option<&str>,
) -> Result<WalletTransaction, WalletError> {
    if amount_cents <= 0 {
        return Err(WalletError::NonPositiveTopUp);
    }
    let mut tx = pool.begin().await?;
    users::lock(&mut tx, user_id).await?;
    sqlx::query("UPDATE users SET wallet_balance_cents = wallet_balance_cents + $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;
    let entry = append_ledger(&mut tx, user_id, amount_cents, WalletTxKind::Topup, reference).await?;
    tx.commit().await?;

    info!(%user_id, amount_cents, "wallet topped up");
    Ok(entry)
}

/// Overwrite the balance; the ledger row records the signed delta.
///
/// # Errors
///
/// `NegativeBalance` for amounts < 0, `User(NotFound)` for unknown users.
pub async fn set_balance(
    pool: &PgPool,
    user_id: Uuid,
    amount_cents: i64,
    reference: Option<&str>,
    today: Date,
) -> Result<WalletTransaction, WalletError> {
    if amount_cents < 0 {
        return Err(WalletError::NegativeBalance);
    }
    let mut tx = pool.begin().await?;
    let user = users::lock(&mut tx, user_id).await?;
    sqlx::query("UPDATE users SET wallet_balance_cents = $2, updated_at = now() WHERE id = $1")
        .bind(user_id)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await?;
    let delta = amount_cents - user.wallet_balance_cents;
    let entry = append_ledger(&mut tx, user_id, delta, WalletTxKind::Set, reference).await?;
    if amount_cents == 0 {
        subscriptions::start_pending(&mut tx, user_id, today).await?;
    }
    tx.commit().await?;

    info!(%user_id, amount_cents, delta, "wallet balance set");
    Ok(entry)
}

/// Charge `amount_cents` for a booking inside the caller's transaction:
/// full debit when covered, otherwise drain the balance and fall back to a
/// bonus day.
///
/// # Errors
///
/// `User(NotFound)` for unknown users, or a database error.
pub async fn charge_for_booking(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount_cents: i64,
    booking_id: Uuid,
    today: Date,
) -> Result<WalletCharge, WalletError> {
    let user = users::lock(conn, user_id).await?;
    let plan = plan_wallet_charge(user.wallet_balance_cents, user.bonus_days, amount_cents);

    sqlx::query(
        "UPDATE users
         SET wallet_balance_cents = wallet_balance_cents - $2,
             bonus_days = bonus_days - $3,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(user_id)
    .bind(plan.debit_cents)
    .bind(i32::from(plan.bonus_used))
    .execute(&mut *conn)
    .await?;

    let balance_after_cents = user.wallet_balance_cents.max(0) - plan.debit_cents;
    if plan.debit_cents > 0 {
        let kind = if plan.partial { WalletTxKind::ChargePartial } else { WalletTxKind::Charge };
        let reference = booking_reference(booking_id);
        append_ledger(conn, user_id, -plan.debit_cents, kind, Some(&reference)).await?;
        if balance_after_cents == 0 {
            subscriptions::start_pending(conn, user_id, today).await?;
        }
    }

    info!(
        %user_id,
        %booking_id,
        debit_cents = plan.debit_cents,
        bonus_used = plan.bonus_used,
        fully_settled = plan.fully_settled,
        "wallet charged for booking"
    );
    Ok(WalletCharge { plan, balance_after_cents })
}

/// # Errors
///
/// `User(NotFound)` for unknown users.
pub async fn transactions(pool: &PgPool, user_id: Uuid) -> Result<Vec<WalletTransaction>, WalletError> {
    users::get(pool, user_id).await?;
    Ok(sqlx::query_as::<_, WalletTransaction>(
        "SELECT id, user_id, amount_cents, kind, reference, created_at
         FROM wallet_transactions WHERE user_id = $1
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_reference_format() {
        assert_eq!(booking_reference(Uuid::nil()), "booking:00000000-0000-0000-0000-000000000000");
    }

    #[cfg(feature = "live-db-tests")]
    mod live {
        use super::*;
        use crate::db::test_db::{integration_pool, seed_user};
        use crate::models::{Role, SubscriptionStatus};
        use time::macros::date;

        #[tokio::test]
        #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
        async fn set_balance_records_signed_delta() {
            let pool = integration_pool().await;
            let member = seed_user(&pool, Role::Member, 1500, 0).await;
            let entry = set_balance(&pool, member, 500, Some("correction"), date!(2025 - 06 - 01)).await.unwrap();
            assert_eq!(entry.amount_cents, -1000);
            assert_eq!(entry.kind, WalletTxKind::Set);
            assert_eq!(balance(&pool, member).await.unwrap(), 500);
        }

        #[tokio::test]
        #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
        async fn partial_charge_drains_and_starts_pending_subscription() {
            let pool = integration_pool().await;
            let member = seed_user(&pool, Role::Member, 400, 1).await;
            let today = date!(2025 - 06 - 01);
            let sub = subscriptions::create(&pool, member, 0, 1, today).await.unwrap();
            assert_eq!(sub.status, SubscriptionStatus::Pending);

            let mut tx = pool.begin().await.unwrap();
            let charge = charge_for_booking(&mut tx, member, 1000, Uuid::new_v4(), today).await.unwrap();
            tx.commit().await.unwrap();

            assert!(charge.plan.partial && charge.plan.bonus_used && charge.plan.fully_settled);
            assert_eq!(charge.balance_after_cents, 0);
            let user = users::get(&pool, member).await.unwrap();
            assert_eq!((user.wallet_balance_cents, user.bonus_days), (0, 0));
            assert_eq!(subscriptions::get(&pool, sub.id).await.unwrap().status, SubscriptionStatus::Active);

            let ledger = transactions(&pool, member).await.unwrap();
            assert_eq!(ledger[0].kind, WalletTxKind::ChargePartial);
            assert_eq!(ledger[0].amount_cents, -400);
        }

        #[tokio::test]
        #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
        async fn top_up_rejects_non_positive_amounts() {
            let pool = integration_pool().await;
            let member = seed_user(&pool, Role::Member, 0, 0).await;
            assert!(matches!(top_up(&pool, member, 0, None).await, Err(WalletError::NonPositiveTopUp)));
            top_up(&pool, member, 2500, Some("cash")).await.unwrap();
            assert_eq!(balance(&pool, member).await.unwrap(), 2500);
        }
    }
}
