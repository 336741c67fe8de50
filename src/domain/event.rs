use {
    super::error::FlowError,
    super::id::TxId,
    super::money::Money,
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

/// Closed set of payment back-ends. Selected by the webhook URL path tag,
/// never by sniffing payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Yookassa,
    Cryptobot,
    Heleket,
    Tonapi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yookassa => "yookassa",
            Self::Cryptobot => "cryptobot",
            Self::Heleket => "heleket",
            Self::Tonapi => "tonapi",
        }
    }

}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Provider {
    type Error = FlowError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "yookassa" => Ok(Self::Yookassa),
            "cryptobot" => Ok(Self::Cryptobot),
            "heleket" => Ok(Self::Heleket),
            "tonapi" => Ok(Self::Tonapi),
            other => Err(FlowError::Validation(format!(
                "unknown payment provider: {other}"
            ))),
        }
    }
}

/// How a provider payload points back at an order. Embedded ids resolve
/// directly; reference strings are correlated against the ledger by the
/// ingress service, and fail closed into the orphan queue when nothing
/// matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    ById(Uuid),
    ByPaymentRef(String),
}

/// Provider-agnostic form of one inbound payment notification. Whatever
/// shape the provider sent, the state machine only ever sees this.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub provider: Provider,
    pub tx_id: TxId,
    pub money: Money,
    pub raw: serde_json::Value,
}

/// Disposition of a stored payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Persisted, not yet driven a transition.
    Received,
    /// Drove exactly one order transition (or was absorbed as a duplicate
    /// of the transaction that did).
    Processed,
    /// Failed signature or payload verification.
    Rejected,
    /// No resolvable order; held for manual reconciliation.
    Orphaned,
    /// Amount outside tolerance; held for manual review.
    Mismatch,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processed => "processed",
            Self::Rejected => "rejected",
            Self::Orphaned => "orphaned",
            Self::Mismatch => "mismatch",
        }
    }
}
