use {
    super::error::FlowError,
    super::id::IdempotencyKey,
    super::money::{Currency, Money, MoneyAmount},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

/// Order lifecycle. The happy path runs left to right; the side branches
/// are all terminal. An order never moves backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    AwaitingPayment,
    PaymentConfirmed,
    Provisioning,
    Fulfilled,
    Expired,
    Failed,
    Refunded,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingPayment => "awaiting_payment",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::Provisioning => "provisioning",
            Self::Fulfilled => "fulfilled",
            Self::Expired => "expired",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Lifecycle rank — higher means further along. Used to prevent
    /// out-of-order events from regressing state.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::AwaitingPayment => 1,
            Self::PaymentConfirmed => 2,
            Self::Provisioning => 3,
            Self::Fulfilled | Self::Expired | Self::Failed => 4,
            Self::Refunded => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fulfilled | Self::Expired | Self::Failed | Self::Refunded
        )
    }

    /// A payment has been accepted for this order (it is at or past
    /// `payment_confirmed` on the happy path).
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            Self::PaymentConfirmed | Self::Provisioning | Self::Fulfilled | Self::Refunded
        )
    }

    pub fn can_transition_to(&self, next: &OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Created, AwaitingPayment)
                | (Created, PaymentConfirmed)
                | (Created, Expired)
                | (AwaitingPayment, PaymentConfirmed)
                | (AwaitingPayment, Expired)
                | (PaymentConfirmed, Provisioning)
                | (Provisioning, Fulfilled)
                | (Provisioning, Failed)
                | (Fulfilled, Refunded)
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderState {
    type Error = FlowError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "created" => Ok(Self::Created),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "payment_confirmed" => Ok(Self::PaymentConfirmed),
            "provisioning" => Ok(Self::Provisioning),
            "fulfilled" => Ok(Self::Fulfilled),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(FlowError::Validation(format!(
                "unknown order state: {other}"
            ))),
        }
    }
}

/// Fresh credential vs. renewal of an existing one on the same host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    New,
    Extend,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Extend => "extend",
        }
    }
}

impl TryFrom<&str> for OrderKind {
    type Error = FlowError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "new" => Ok(Self::New),
            "extend" => Ok(Self::Extend),
            other => Err(FlowError::Validation(format!(
                "unknown order kind: {other}"
            ))),
        }
    }
}

/// Full order row from the ledger (for reads).
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: i64,
    pub host_id: String,
    pub plan_id: String,
    pub plan_days: i32,
    pub amount: Money,
    pub kind: OrderKind,
    pub renew_ref: Option<String>,
    pub state: OrderState,
    pub idempotency_key: IdempotencyKey,
    pub payment_provider: Option<String>,
    pub payment_tx_id: Option<String>,
    pub provisioning_attempts: i32,
    pub refund_eligible: bool,
    pub settled: bool,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

/// For INSERT — id generated in Rust via `Uuid::now_v7()`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub buyer_id: i64,
    pub host_id: String,
    pub plan_id: String,
    pub plan_days: i32,
    pub amount: Money,
    pub kind: OrderKind,
    pub renew_ref: Option<String>,
    pub idempotency_key: IdempotencyKey,
}

pub struct NewOrderParams {
    pub buyer_id: i64,
    pub host_id: String,
    pub plan_id: String,
    pub plan_days: i32,
    pub amount_minor: i64,
    pub currency: Currency,
    pub kind: OrderKind,
    pub renew_ref: Option<String>,
    pub nonce: String,
}

impl NewOrder {
    pub fn new(p: NewOrderParams) -> Result<Self, FlowError> {
        if p.plan_days <= 0 {
            return Err(FlowError::Validation(format!(
                "plan_days must be positive, got: {}",
                p.plan_days
            )));
        }
        if p.kind == OrderKind::Extend && p.renew_ref.is_none() {
            return Err(FlowError::Validation(
                "extend order requires the credential reference to renew".to_string(),
            ));
        }
        let idempotency_key = IdempotencyKey::derive(p.buyer_id, &p.plan_id, &p.nonce);
        Ok(Self {
            id: Uuid::now_v7(),
            buyer_id: p.buyer_id,
            host_id: p.host_id,
            plan_id: p.plan_id,
            plan_days: p.plan_days,
            amount: Money::new(MoneyAmount::new(p.amount_minor)?, p.currency),
            kind: p.kind,
            renew_ref: p.renew_ref,
            idempotency_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_forward_only() {
        use OrderState::*;
        assert!(Created.can_transition_to(&AwaitingPayment));
        assert!(AwaitingPayment.can_transition_to(&PaymentConfirmed));
        assert!(PaymentConfirmed.can_transition_to(&Provisioning));
        assert!(Provisioning.can_transition_to(&Fulfilled));
        assert!(!Fulfilled.can_transition_to(&Provisioning));
        assert!(!PaymentConfirmed.can_transition_to(&AwaitingPayment));
    }

    #[test]
    fn terminal_states_only_allow_refund_of_fulfilled() {
        use OrderState::*;
        assert!(Fulfilled.can_transition_to(&Refunded));
        for terminal in [Expired, Failed, Refunded] {
            for next in [
                Created,
                AwaitingPayment,
                PaymentConfirmed,
                Provisioning,
                Fulfilled,
                Expired,
                Failed,
                Refunded,
            ] {
                assert!(!terminal.can_transition_to(&next));
            }
        }
    }

    #[test]
    fn extend_without_reference_is_rejected() {
        let err = NewOrder::new(NewOrderParams {
            buyer_id: 7,
            host_id: "de-1".into(),
            plan_id: "plan-30d".into(),
            plan_days: 30,
            amount_minor: 50_000,
            currency: Currency::Rub,
            kind: OrderKind::Extend,
            renew_ref: None,
            nonce: "n".into(),
        });
        assert!(err.is_err());
    }
}
