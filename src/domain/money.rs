use {
    super::error::FlowError,
    serde::{Deserialize, Serialize},
    std::fmt,
    std::ops::{Add, Sub},
};

/// Amount in minor units: whatever the smallest unit of the carrying
/// currency is (kopeks, cents, nanoton).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub fn new(minor: i64) -> Result<Self, FlowError> {
        if minor < 0 {
            return Err(FlowError::Validation(format!(
                "MoneyAmount cannot be negative, got: {minor}"
            )));
        }
        Ok(Self(minor))
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0.checked_add(other.0).map(MoneyAmount)
    }

    pub fn checked_sub(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0
            .checked_sub(other.0)
            .filter(|&v| v >= 0)
            .map(MoneyAmount)
    }

    pub fn abs_diff(self, other: MoneyAmount) -> i64 {
        (self.0 - other.0).abs()
    }

    /// Integer percentage of this amount, rounded down.
    pub fn percent(self, pct: u32) -> MoneyAmount {
        MoneyAmount(self.0.saturating_mul(i64::from(pct)) / 100)
    }
}

impl Add for MoneyAmount {
    type Output = MoneyAmount;

    fn add(self, rhs: MoneyAmount) -> MoneyAmount {
        self.checked_add(rhs).expect("MoneyAmount overflow")
    }
}

impl Sub for MoneyAmount {
    type Output = MoneyAmount;

    fn sub(self, rhs: MoneyAmount) -> MoneyAmount {
        self.checked_sub(rhs).expect("MoneyAmount underflow")
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Rub,
    Usd,
    Usdt,
    Ton,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rub => "rub",
            Self::Usd => "usd",
            Self::Usdt => "usdt",
            Self::Ton => "ton",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = FlowError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "rub" => Ok(Self::Rub),
            "usd" => Ok(Self::Usd),
            "usdt" => Ok(Self::Usdt),
            "ton" => Ok(Self::Ton),
            other => Err(FlowError::Validation(format!(
                "unknown currency: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// True when `other` is in the same currency and differs from this
    /// amount by no more than `tolerance_minor` units. A currency mismatch
    /// is never within tolerance.
    pub fn matches_within(&self, other: &Money, tolerance_minor: i64) -> bool {
        self.currency == other.currency
            && self.amount.abs_diff(other.amount) <= tolerance_minor
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
