//! Domain enums and table row types.
//!
//! DESIGN
//! ======
//! Every enum is stored as upper-case TEXT and travels over JSON in the
//! same spelling, so the database, the API and the logs agree on
//! `CANCELLED_BY_GYM` rather than three different renderings. Row structs
//! mirror their tables one-to-one; money is integer cents.

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        #[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Case-insensitive parse of the stored spelling.
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                let raw = raw.trim();
                Self::ALL.iter().copied().find(|v| v.as_str().eq_ignore_ascii_case(raw))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Persisted user role. Ordering is privilege order: `Member < Trainer < Admin`.
    Role {
        Member => "MEMBER",
        Trainer => "TRAINER",
        Admin => "ADMIN",
    }
);

impl Role {
    #[must_use]
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Trainer)
    }
}

text_enum!(UserStatus {
    Active => "ACTIVE",
    Suspended => "SUSPENDED",
    Deleted => "DELETED",
});

text_enum!(
    /// Class format; each kind has its own per-member base cost.
    ClassKind {
        Group => "GROUP",
        SmallGroup => "SMALL_GROUP",
        Personal => "PERSONAL",
        OpenGym => "OPEN_GYM",
    }
);

text_enum!(ClassStatus {
    Scheduled => "SCHEDULED",
    Cancelled => "CANCELLED",
    Completed => "COMPLETED",
});

text_enum!(BookingStatus {
    Booked => "BOOKED",
    Completed => "COMPLETED",
    CancelledByUser => "CANCELLED_BY_USER",
    CancelledByGym => "CANCELLED_BY_GYM",
    NoShow => "NO_SHOW",
});

text_enum!(
    /// How a billing event was settled. `None` means still owed.
    SettlementType {
        None => "NONE",
        Payment => "PAYMENT",
        Bonus => "BONUS",
        Subscription => "SUBSCRIPTION",
    }
);

text_enum!(SubscriptionStatus {
    Pending => "PENDING",
    Active => "ACTIVE",
    Cancelled => "CANCELLED",
    Expired => "EXPIRED",
});

text_enum!(WalletTxKind {
    Topup => "TOPUP",
    Set => "SET",
    Charge => "CHARGE",
    ChargePartial => "CHARGE_PARTIAL",
    Refund => "REFUND",
});

// =============================================================================
// ROWS
// =============================================================================

/// Mirrors the `users` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub subject: Option<String>,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub auth_provider: String,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub base_cost_cents: Option<i64>,
    pub group_base_cost_cents: Option<i64>,
    pub small_group_base_cost_cents: Option<i64>,
    pub personal_base_cost_cents: Option<i64>,
    pub open_gym_base_cost_cents: Option<i64>,
    pub bonus_days: i32,
    pub wallet_balance_cents: i64,
    pub booking_blocked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

pub(crate) const USER_COLUMNS: &str = "id, subject, name, email, role, auth_provider, avatar_url, status, \
     base_cost_cents, group_base_cost_cents, small_group_base_cost_cents, personal_base_cost_cents, \
     open_gym_base_cost_cents, bonus_days, wallet_balance_cents, booking_blocked, created_at, updated_at";

/// Mirrors the `class_types` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClassType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trainer_id: Option<Uuid>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One bookable class instance. `name` is joined in from its class type.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GymClass {
    pub id: Uuid,
    pub class_type_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: i32,
    pub duration_minutes: i32,
    pub trainer_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub location: Option<String>,
    pub status: ClassStatus,
    pub is_cancelled: bool,
    pub kind: ClassKind,
}

pub(crate) const GYM_CLASS_SELECT: &str = "SELECT c.id, c.class_type_id, t.name, c.description, c.capacity, \
     c.duration_minutes, c.trainer_id, c.start_time, c.end_time, c.location, c.status, c.is_cancelled, c.kind \
     FROM class_instances c LEFT JOIN class_types t ON t.id = c.class_type_id";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub class_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub is_cancelled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Mirrors the `bookings` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub class_id: Uuid,
    pub status: BookingStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub attended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub(crate) const BOOKING_COLUMNS: &str = "id, user_id, class_id, status, cancelled_at, attended_at, created_at";

/// Mirrors the `billing_events` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub amount_cents: i64,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub event_date: OffsetDateTime,
    pub settled: bool,
    pub settlement_type: SettlementType,
}

pub(crate) const BILLING_EVENT_COLUMNS: &str =
    "id, user_id, booking_id, amount_cents, reason, event_date, settled, settlement_type";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub kind: WalletTxKind,
    pub reference: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Mirrors the `subscriptions` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub initial_payment_cents: i64,
    pub months: i32,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
    pub late_cancellations: i32,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub(crate) const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, initial_payment_cents, months, start_date, end_date, late_cancellations, status, created_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionHistory {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub event_data: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_parse_is_case_insensitive() {
        assert_eq!(BookingStatus::parse("cancelled_by_gym"), Some(BookingStatus::CancelledByGym));
        assert_eq!(ClassKind::parse(" Small_Group "), Some(ClassKind::SmallGroup));
        assert_eq!(Role::parse("coach"), None);
    }

    #[test]
    fn enum_serde_uses_stored_spelling() {
        let json = serde_json::to_string(&SettlementType::Subscription).unwrap();
        assert_eq!(json, "\"SUBSCRIPTION\"");
        let kind: ClassKind = serde_json::from_str("\"OPEN_GYM\"").unwrap();
        assert_eq!(kind, ClassKind::OpenGym);
        for kind in WalletTxKind::ALL {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn role_ordering_is_privilege_order() {
        assert!(Role::Admin > Role::Trainer);
        assert!(Role::Trainer > Role::Member);
        assert!(Role::Trainer.is_staff());
        assert!(!Role::Member.is_staff());
    }
}
