//! Booking/billing consistency rules.
//!
//! DESIGN
//! ======
//! Everything here is a pure function of its inputs: no clock reads, no
//! database. The booking, billing and wallet services feed these rules with
//! rows they have already locked inside a transaction, so the answer a rule
//! gives is the answer that gets persisted.
//!
//! RULES
//! =====
//! - Base cost: per class kind, falling back to the member's legacy flat
//!   cost, else free.
//! - Late cancellation: whole hours until start (truncated) strictly below
//!   the threshold.
//! - Funding: a booking needs a subscription, enough wallet, or a bonus day,
//!   unless the class is free.
//! - Wallet charge: full debit if covered; otherwise drain what is left and
//!   fall back to one bonus day.
//! - Settlement: an open event settles once; re-settling to the same type is
//!   a no-op, switching type is refused.

use time::OffsetDateTime;

use crate::models::{ClassKind, SettlementType, User};

// =============================================================================
// BASE COST
// =============================================================================

/// Per-member pricing, in cents. `None` means "not configured".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseCosts {
    pub legacy: Option<i64>,
    pub group: Option<i64>,
    pub small_group: Option<i64>,
    pub personal: Option<i64>,
    pub open_gym: Option<i64>,
}

impl From<&User> for BaseCosts {
    fn from(user: &User) -> Self {
        Self {
            legacy: user.base_cost_cents,
            group: user.group_base_cost_cents,
            small_group: user.small_group_base_cost_cents,
            personal: user.personal_base_cost_cents,
            open_gym: user.open_gym_base_cost_cents,
        }
    }
}

/// Resolve what one class of `kind` costs this member.
#[must_use]
pub fn resolve_base_cost(costs: &BaseCosts, kind: ClassKind) -> i64 {
    let per_kind = match kind {
        ClassKind::Group => costs.group,
        ClassKind::SmallGroup => costs.small_group,
        ClassKind::Personal => costs.personal,
        ClassKind::OpenGym => costs.open_gym,
    };
    per_kind.or(costs.legacy).unwrap_or(0).max(0)
}

// =============================================================================
// CANCELLATION WINDOW
// =============================================================================

/// A user cancellation that falls inside the charge window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateCancellation {
    /// Whole hours between cancellation and class start, truncated toward zero.
    pub hours_before: i64,
}

impl LateCancellation {
    #[must_use]
    pub fn reason(&self) -> String {
        format!("Same-day cancellation (cancelled {} hours before class)", self.hours_before)
    }
}

/// Decide whether cancelling at `cancelled_at` is billable.
#[must_use]
pub fn cancellation_charge(
    class_start: OffsetDateTime,
    cancelled_at: OffsetDateTime,
    threshold_hours: i64,
) -> Option<LateCancellation> {
    let hours_before = (class_start - cancelled_at).whole_hours();
    (hours_before < threshold_hours).then_some(LateCancellation { hours_before })
}

// =============================================================================
// FUNDING ELIGIBILITY
// =============================================================================

/// How a prospective booking would be paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funding {
    Free,
    Subscription,
    Wallet,
    BonusDay,
    Insufficient,
}

impl Funding {
    #[must_use]
    pub fn is_bookable(self) -> bool {
        !matches!(self, Self::Insufficient)
    }
}

#[must_use]
pub fn funding_for_booking(
    charge_cents: i64,
    wallet_cents: i64,
    bonus_days: i32,
    has_active_subscription: bool,
) -> Funding {
    if charge_cents <= 0 {
        Funding::Free
    } else if has_active_subscription {
        Funding::Subscription
    } else if wallet_cents >= charge_cents {
        Funding::Wallet
    } else if bonus_days > 0 {
        Funding::BonusDay
    } else {
        Funding::Insufficient
    }
}

// =============================================================================
// WALLET CHARGE PLAN
// =============================================================================

/// What a wallet charge will do to a member's balance and bonus days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargePlan {
    /// Cents taken from the wallet (never more than the balance).
    pub debit_cents: i64,
    /// Whether the debit drained a balance that could not cover the amount.
    pub partial: bool,
    /// Whether one bonus day is consumed to cover the shortfall.
    pub bonus_used: bool,
    /// Whether the class ends up paid for.
    pub fully_settled: bool,
}

impl ChargePlan {
    /// Cents still owed after the plan runs.
    #[must_use]
    pub fn remainder_cents(&self, amount_cents: i64) -> i64 {
        if self.fully_settled { 0 } else { (amount_cents - self.debit_cents).max(0) }
    }

    #[must_use]
    pub fn settlement_type(&self) -> SettlementType {
        if !self.fully_settled {
            SettlementType::None
        } else if self.bonus_used {
            SettlementType::Bonus
        } else {
            SettlementType::Payment
        }
    }
}

#[must_use]
pub fn plan_wallet_charge(balance_cents: i64, bonus_days: i32, amount_cents: i64) -> ChargePlan {
    let balance = balance_cents.max(0);
    if amount_cents <= 0 {
        return ChargePlan { debit_cents: 0, partial: false, bonus_used: false, fully_settled: true };
    }
    if balance >= amount_cents {
        return ChargePlan { debit_cents: amount_cents, partial: false, bonus_used: false, fully_settled: true };
    }
    let bonus_used = bonus_days > 0;
    ChargePlan { debit_cents: balance, partial: balance > 0, bonus_used, fully_settled: bonus_used }
}

// =============================================================================
// SETTLEMENT TRANSITIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("billing event already settled as {current}")]
    AlreadySettled { current: SettlementType },
    #[error("cannot settle a billing event as NONE")]
    InvalidTarget,
}

/// Result of applying a settlement to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event moves from open to `SettlementType`.
    Settle(SettlementType),
    /// The event is already settled the requested way.
    Unchanged,
}

impl SettlementType {
    /// Whether an event carrying this type counts as settled.
    #[must_use]
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Explicitly settle an event currently in `self` as `target`.
    ///
    /// # Errors
    ///
    /// `InvalidTarget` for `NONE`; `AlreadySettled` when the event was settled
    /// some other way.
    pub fn transition(self, target: SettlementType) -> Result<Transition, SettlementError> {
        if !target.is_settled() {
            return Err(SettlementError::InvalidTarget);
        }
        match self {
            Self::None => Ok(Transition::Settle(target)),
            current if current == target => Ok(Transition::Unchanged),
            current => Err(SettlementError::AlreadySettled { current }),
        }
    }

    /// Generic "mark settled": an open event becomes a payment, settled
    /// events keep their type.
    #[must_use]
    pub fn mark_settled(self) -> Transition {
        match self {
            Self::None => Transition::Settle(Self::Payment),
            _ => Transition::Unchanged,
        }
    }
}

#[cfg(test)]
#[path = "pricing_test.rs"]
mod tests;
