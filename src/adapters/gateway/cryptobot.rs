use {
    super::{Gateway, header_str, json_str, parse_decimal_minor, verify_hmac_base64},
    crate::domain::{
        error::FlowError,
        event::{CanonicalEvent, OrderRef, Provider},
        id::TxId,
        money::{Currency, Money, MoneyAmount},
    },
    axum::http::HeaderMap,
    sha2::{Digest, Sha256},
};

const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";

/// Telegram crypto processor. Signs the body with SHA-256 of the API token
/// as the HMAC key; the order reference rides in the invoice payload field
/// the storefront set when creating the invoice.
pub struct CryptobotGateway {
    hmac_key: Vec<u8>,
}

impl CryptobotGateway {
    pub fn new(api_token: &str) -> Self {
        let hmac_key = if api_token.is_empty() {
            Vec::new()
        } else {
            Sha256::digest(api_token.as_bytes()).to_vec()
        };
        Self { hmac_key }
    }
}

impl Gateway for CryptobotGateway {
    fn provider(&self) -> Provider {
        Provider::Cryptobot
    }

    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), FlowError> {
        let sig = header_str(headers, SIGNATURE_HEADER)?;
        verify_hmac_base64(&self.hmac_key, raw, sig)
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<CanonicalEvent>, FlowError> {
        let body: serde_json::Value = serde_json::from_slice(raw)?;

        if json_str(&body, "/update_type") != Some("invoice_paid") {
            return Ok(None);
        }

        let invoice_id = body
            .pointer("/payload/invoice_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| FlowError::Validation("invoice has no invoice_id".to_string()))?;
        let amount = json_str(&body, "/payload/amount")
            .ok_or_else(|| FlowError::Validation("invoice has no amount".to_string()))?;
        let currency = match json_str(&body, "/payload/asset") {
            Some("USDT") => Currency::Usdt,
            Some("TON") => Currency::Ton,
            other => {
                return Err(FlowError::Validation(format!(
                    "unsupported cryptobot asset: {other:?}"
                )));
            }
        };

        Ok(Some(CanonicalEvent {
            provider: Provider::Cryptobot,
            tx_id: TxId::new(invoice_id.to_string())?,
            money: Money::new(MoneyAmount::new(parse_decimal_minor(amount)?)?, currency),
            raw: body,
        }))
    }

    fn resolve(&self, event: &CanonicalEvent) -> Result<OrderRef, FlowError> {
        let reference = json_str(&event.raw, "/payload/payload")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                FlowError::Validation("paid invoice carries no order reference".to_string())
            })?;
        Ok(OrderRef::ByPaymentRef(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
        hmac::{Hmac, Mac},
    };

    const TOKEN: &str = "12345:AAtoken";

    fn signed(body: &str) -> HeaderMap {
        let key = Sha256::digest(TOKEN.as_bytes());
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(body.as_bytes());
        let sig = BASE64.encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());
        headers
    }

    const PAID: &str = r#"{"update_id":7,"update_type":"invoice_paid",
        "payload":{"invoice_id":4432,"status":"paid","asset":"USDT",
        "amount":"5.00","payload":"ref-abc123"}}"#;

    #[test]
    fn accepts_valid_signature_and_resolves_reference() {
        let gw = CryptobotGateway::new(TOKEN);
        gw.verify(PAID.as_bytes(), &signed(PAID)).unwrap();

        let event = gw.parse(PAID.as_bytes()).unwrap().unwrap();
        assert_eq!(event.tx_id.as_str(), "4432");
        assert_eq!(event.money.amount().minor(), 500);
        assert_eq!(
            gw.resolve(&event).unwrap(),
            OrderRef::ByPaymentRef("ref-abc123".to_string())
        );
    }

    #[test]
    fn rejects_wrong_token() {
        let gw = CryptobotGateway::new("other-token");
        assert!(gw.verify(PAID.as_bytes(), &signed(PAID)).is_err());
    }

    #[test]
    fn empty_reference_fails_closed() {
        let gw = CryptobotGateway::new(TOKEN);
        let body = r#"{"update_type":"invoice_paid",
            "payload":{"invoice_id":1,"asset":"USDT","amount":"5.00","payload":""}}"#;
        let event = gw.parse(body.as_bytes()).unwrap().unwrap();
        assert!(gw.resolve(&event).is_err());
    }

    #[test]
    fn other_updates_are_ignored() {
        let gw = CryptobotGateway::new(TOKEN);
        let body = r#"{"update_type":"invoice_expired","payload":{"invoice_id":1}}"#;
        assert!(gw.parse(body.as_bytes()).unwrap().is_none());
    }
}
