use {
    super::error::FlowError,
    super::money::MoneyAmount,
    super::order::Order,
    std::fmt,
    uuid::Uuid,
};

/// Credit kinds a referral rule can produce. Each kind settles at most
/// once per order (signup bonus: at most once per referred buyer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    Percentage,
    FixedPurchase,
    SignupBonus,
}

impl CreditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::FixedPurchase => "fixed_purchase",
            Self::SignupBonus => "signup_bonus",
        }
    }
}

impl fmt::Display for CreditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CreditKind {
    type Error = FlowError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed_purchase" => Ok(Self::FixedPurchase),
            "signup_bonus" => Ok(Self::SignupBonus),
            other => Err(FlowError::Validation(format!(
                "unknown credit kind: {other}"
            ))),
        }
    }
}

/// Which purchase reward a referrer earns. The signup bonus is orthogonal
/// and can accompany either, or stand alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardMode {
    PercentOfPurchase,
    FixedPerPurchase,
    None,
}

/// Referral configuration. Minimum withdrawal and the referred-buyer
/// discount are hooks read by the storefront boundary, not enforced here.
#[derive(Debug, Clone)]
pub struct ReferralPolicy {
    pub enabled: bool,
    pub reward_mode: RewardMode,
    pub percentage: u32,
    pub fixed_amount_minor: i64,
    pub signup_bonus_minor: i64,
    pub min_withdrawal_minor: i64,
    pub referred_discount_percent: u32,
}

impl ReferralPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            reward_mode: RewardMode::None,
            percentage: 0,
            fixed_amount_minor: 0,
            signup_bonus_minor: 0,
            min_withdrawal_minor: 0,
            referred_discount_percent: 0,
        }
    }

    /// Credits this policy owes for one fulfilled order. Zero-amount
    /// credits are not emitted; uniqueness on insert keeps re-settlement
    /// a no-op.
    pub fn credits_for(&self, referrer_id: i64, order: &Order) -> Vec<NewReferralCredit> {
        if !self.enabled {
            return Vec::new();
        }
        let mut credits = Vec::new();
        let purchase_reward = match self.reward_mode {
            RewardMode::PercentOfPurchase => Some((
                CreditKind::Percentage,
                order.amount.amount().percent(self.percentage),
            )),
            RewardMode::FixedPerPurchase => MoneyAmount::new(self.fixed_amount_minor)
                .ok()
                .map(|a| (CreditKind::FixedPurchase, a)),
            RewardMode::None => None,
        };
        if let Some((kind, amount)) = purchase_reward
            && amount.minor() > 0
        {
            credits.push(NewReferralCredit::new(referrer_id, order, kind, amount));
        }
        if self.signup_bonus_minor > 0
            && let Ok(amount) = MoneyAmount::new(self.signup_bonus_minor)
        {
            credits.push(NewReferralCredit::new(
                referrer_id,
                order,
                CreditKind::SignupBonus,
                amount,
            ));
        }
        credits
    }
}

/// For INSERT into the referral ledger.
#[derive(Debug, Clone)]
pub struct NewReferralCredit {
    pub id: Uuid,
    pub referrer_id: i64,
    pub buyer_id: i64,
    pub source_order_id: Uuid,
    pub kind: CreditKind,
    pub amount: MoneyAmount,
    pub currency: String,
}

impl NewReferralCredit {
    fn new(referrer_id: i64, order: &Order, kind: CreditKind, amount: MoneyAmount) -> Self {
        Self {
            id: Uuid::now_v7(),
            referrer_id,
            buyer_id: order.buyer_id,
            source_order_id: order.id,
            kind,
            amount,
            currency: order.amount.currency().as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{
            id::IdempotencyKey,
            money::{Currency, Money, MoneyAmount},
            order::{OrderKind, OrderState},
        },
        chrono::Utc,
    };

    fn order(amount_minor: i64) -> Order {
        Order {
            id: Uuid::now_v7(),
            buyer_id: 1001,
            host_id: "de-1".into(),
            plan_id: "plan-30d".into(),
            plan_days: 30,
            amount: Money::new(MoneyAmount::new(amount_minor).unwrap(), Currency::Rub),
            kind: OrderKind::New,
            renew_ref: None,
            state: OrderState::Fulfilled,
            idempotency_key: IdempotencyKey::derive(1001, "plan-30d", "n"),
            payment_provider: Some("yookassa".into()),
            payment_tx_id: Some("tx-1".into()),
            provisioning_attempts: 1,
            refund_eligible: false,
            settled: false,
            notified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_reward_rounds_down() {
        let policy = ReferralPolicy {
            enabled: true,
            reward_mode: RewardMode::PercentOfPurchase,
            percentage: 15,
            fixed_amount_minor: 0,
            signup_bonus_minor: 0,
            min_withdrawal_minor: 0,
            referred_discount_percent: 0,
        };
        let credits = policy.credits_for(9, &order(999));
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].kind, CreditKind::Percentage);
        assert_eq!(credits[0].amount.minor(), 149);
    }

    #[test]
    fn signup_bonus_accompanies_purchase_reward() {
        let policy = ReferralPolicy {
            enabled: true,
            reward_mode: RewardMode::FixedPerPurchase,
            percentage: 0,
            fixed_amount_minor: 5_000,
            signup_bonus_minor: 10_000,
            min_withdrawal_minor: 0,
            referred_discount_percent: 0,
        };
        let credits = policy.credits_for(9, &order(50_000));
        let kinds: Vec<_> = credits.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CreditKind::FixedPurchase, CreditKind::SignupBonus]);
    }

    #[test]
    fn disabled_policy_emits_nothing() {
        assert!(ReferralPolicy::disabled().credits_for(9, &order(50_000)).is_empty());
    }

    #[test]
    fn zero_percentage_emits_nothing() {
        let policy = ReferralPolicy {
            enabled: true,
            reward_mode: RewardMode::PercentOfPurchase,
            percentage: 0,
            fixed_amount_minor: 0,
            signup_bonus_minor: 0,
            min_withdrawal_minor: 0,
            referred_discount_percent: 0,
        };
        assert!(policy.credits_for(9, &order(50_000)).is_empty());
    }
}
