//! Payment-provider adapters. Each back-end is a tagged variant behind one
//! trait: verify the delivery is authentic, normalize the payload into a
//! canonical event, and point it back at an order. The variant is chosen by
//! the webhook route tag; payload shape is never sniffed.

pub mod cryptobot;
pub mod heleket;
pub mod tonapi;
pub mod yookassa;

use {
    crate::config::GatewaySecrets,
    crate::domain::{
        error::FlowError,
        event::{CanonicalEvent, OrderRef, Provider},
    },
    axum::http::HeaderMap,
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    hmac::{Hmac, Mac},
    sha2::{Digest, Sha256},
};

pub use {
    cryptobot::CryptobotGateway, heleket::HeleketGateway, tonapi::TonapiGateway,
    yookassa::YookassaGateway,
};

pub trait Gateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Authenticity check against the raw body and transport headers.
    /// Failure is final for this delivery: the same bytes will never
    /// verify on retry.
    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), FlowError>;

    /// Normalize the payload. `Ok(None)` means the delivery is authentic
    /// but not a payment confirmation (status updates, test pings) and
    /// should be acknowledged without further processing.
    fn parse(&self, raw: &[u8]) -> Result<Option<CanonicalEvent>, FlowError>;

    /// Point the canonical event back at an order. Must fail closed: when
    /// the payload carries nothing resolvable this returns an error and the
    /// event is held as orphaned, never guessed at.
    fn resolve(&self, event: &CanonicalEvent) -> Result<OrderRef, FlowError>;
}

/// All configured gateways, indexed by provider tag.
pub struct GatewayRegistry {
    yookassa: YookassaGateway,
    cryptobot: CryptobotGateway,
    heleket: HeleketGateway,
    tonapi: TonapiGateway,
}

impl GatewayRegistry {
    pub fn new(secrets: &GatewaySecrets) -> Self {
        Self {
            yookassa: YookassaGateway::new(&secrets.yookassa_secret),
            cryptobot: CryptobotGateway::new(&secrets.cryptobot_token),
            heleket: HeleketGateway::new(&secrets.heleket_api_key),
            tonapi: TonapiGateway::new(&secrets.tonapi_token),
        }
    }

    pub fn get(&self, provider: Provider) -> &dyn Gateway {
        match provider {
            Provider::Yookassa => &self.yookassa,
            Provider::Cryptobot => &self.cryptobot,
            Provider::Heleket => &self.heleket,
            Provider::Tonapi => &self.tonapi,
        }
    }
}

// ── Shared verification and parsing helpers ────────────────────────────────

type HmacSha256 = Hmac<Sha256>;

/// Constant-time check of a base64-encoded HMAC-SHA256 signature.
pub(crate) fn verify_hmac_base64(
    key: &[u8],
    body: &[u8],
    provided: &str,
) -> Result<(), FlowError> {
    if key.is_empty() {
        return Err(FlowError::Signature(
            "no webhook secret configured for this provider".to_string(),
        ));
    }
    let sig = BASE64
        .decode(provided.trim())
        .map_err(|e| FlowError::Signature(format!("signature is not valid base64: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| FlowError::Signature(format!("bad hmac key: {e}")))?;
    mac.update(body);
    mac.verify_slice(&sig)
        .map_err(|_| FlowError::Signature("signature mismatch".to_string()))
}

pub(crate) fn header_str<'h>(
    headers: &'h HeaderMap,
    name: &str,
) -> Result<&'h str, FlowError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| FlowError::Signature(format!("missing {name} header")))
}

pub(crate) fn sha256_base64(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

/// Parse a provider decimal amount string ("100.00", "5.5") into minor
/// units at two decimal places. Providers that bill in whole tokens with
/// more precision convert before calling this.
pub(crate) fn parse_decimal_minor(s: &str) -> Result<i64, FlowError> {
    let bad = || FlowError::Validation(format!("malformed amount: {s}"));
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > 2 || whole.is_empty() {
        return Err(bad());
    }
    let whole: i64 = whole.parse().map_err(|_| bad())?;
    if whole < 0 {
        return Err(bad());
    }
    let frac_minor: i64 = if frac.is_empty() {
        0
    } else {
        let f: i64 = frac.parse().map_err(|_| bad())?;
        if frac.len() == 1 { f * 10 } else { f }
    };
    whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_minor))
        .ok_or_else(bad)
}

pub(crate) fn json_str<'v>(value: &'v serde_json::Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(|v| v.as_str())
}
