use {
    super::{Gateway, json_str, parse_decimal_minor, sha256_base64},
    crate::domain::{
        error::FlowError,
        event::{CanonicalEvent, OrderRef, Provider},
        id::TxId,
        money::{Currency, Money, MoneyAmount},
    },
    axum::http::HeaderMap,
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    uuid::Uuid,
};

/// Crypto invoice processor. The signature travels inside the body: the
/// `sign` field is the digest of the remaining payload (serialized with
/// sorted keys, base64-encoded) concatenated with the merchant API key.
pub struct HeleketGateway {
    api_key: String,
}

impl HeleketGateway {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
        }
    }

    fn expected_sign(&self, body_without_sign: &serde_json::Value) -> Result<String, FlowError> {
        // serde_json object keys are ordered, so this serialization is
        // canonical for any field order the provider sent.
        let compact = serde_json::to_string(body_without_sign)?;
        let mut data = BASE64.encode(compact.as_bytes());
        data.push_str(&self.api_key);
        Ok(sha256_base64(data.as_bytes()))
    }
}

impl Gateway for HeleketGateway {
    fn provider(&self) -> Provider {
        Provider::Heleket
    }

    fn verify(&self, raw: &[u8], _headers: &HeaderMap) -> Result<(), FlowError> {
        if self.api_key.is_empty() {
            return Err(FlowError::Signature(
                "no heleket api key configured".to_string(),
            ));
        }
        let mut body: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| FlowError::Signature(format!("unparseable body: {e}")))?;
        let provided = body
            .as_object_mut()
            .and_then(|o| o.remove("sign"))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| FlowError::Signature("missing sign field".to_string()))?;

        let expected = self.expected_sign(&body)?;
        if expected.as_bytes() != provided.as_bytes() {
            return Err(FlowError::Signature("signature mismatch".to_string()));
        }
        Ok(())
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<CanonicalEvent>, FlowError> {
        let body: serde_json::Value = serde_json::from_slice(raw)?;

        // paid_over: buyer sent more than the invoice asked. Still a
        // confirmation; the amount check downstream applies the tolerance.
        if !matches!(json_str(&body, "/status"), Some("paid") | Some("paid_over")) {
            return Ok(None);
        }

        let tx_uuid = json_str(&body, "/uuid")
            .ok_or_else(|| FlowError::Validation("payment has no uuid".to_string()))?;
        let amount = json_str(&body, "/amount")
            .ok_or_else(|| FlowError::Validation("payment has no amount".to_string()))?;
        let currency = match json_str(&body, "/currency") {
            Some("USDT") => Currency::Usdt,
            Some("USD") => Currency::Usd,
            other => {
                return Err(FlowError::Validation(format!(
                    "unsupported heleket currency: {other:?}"
                )));
            }
        };

        Ok(Some(CanonicalEvent {
            provider: Provider::Heleket,
            tx_id: TxId::new(tx_uuid)?,
            money: Money::new(MoneyAmount::new(parse_decimal_minor(amount)?)?, currency),
            raw: body,
        }))
    }

    fn resolve(&self, event: &CanonicalEvent) -> Result<OrderRef, FlowError> {
        let order_id = json_str(&event.raw, "/order_id").ok_or_else(|| {
            FlowError::Validation("payment carries no order_id".to_string())
        })?;
        match Uuid::parse_str(order_id) {
            Ok(id) => Ok(OrderRef::ById(id)),
            Err(_) => Ok(OrderRef::ByPaymentRef(order_id.to_string())),
        }
    }
}
