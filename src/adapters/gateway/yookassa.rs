use {
    super::{Gateway, header_str, json_str, parse_decimal_minor, verify_hmac_base64},
    crate::domain::{
        error::FlowError,
        event::{CanonicalEvent, OrderRef, Provider},
        id::TxId,
        money::{Currency, Money, MoneyAmount},
    },
    axum::http::HeaderMap,
    uuid::Uuid,
};

const SIGNATURE_HEADER: &str = "x-api-signature";

/// Card/SBP processor. Signs the body with the shop secret; the order id
/// travels embedded in `object.metadata.order_id`.
pub struct YookassaGateway {
    secret: Vec<u8>,
}

impl YookassaGateway {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }
}

impl Gateway for YookassaGateway {
    fn provider(&self) -> Provider {
        Provider::Yookassa
    }

    fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), FlowError> {
        let sig = header_str(headers, SIGNATURE_HEADER)?;
        verify_hmac_base64(&self.secret, raw, sig)
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<CanonicalEvent>, FlowError> {
        let body: serde_json::Value = serde_json::from_slice(raw)?;

        // Only a succeeded payment confirms an order; waiting_for_capture,
        // canceled etc. are acknowledged and ignored.
        if json_str(&body, "/event") != Some("payment.succeeded") {
            return Ok(None);
        }

        let tx_id = json_str(&body, "/object/id")
            .ok_or_else(|| FlowError::Validation("payment object has no id".to_string()))?;
        let value = json_str(&body, "/object/amount/value")
            .ok_or_else(|| FlowError::Validation("payment object has no amount".to_string()))?;
        let currency = match json_str(&body, "/object/amount/currency") {
            Some("RUB") => Currency::Rub,
            Some("USD") => Currency::Usd,
            other => {
                return Err(FlowError::Validation(format!(
                    "unsupported yookassa currency: {other:?}"
                )));
            }
        };

        Ok(Some(CanonicalEvent {
            provider: Provider::Yookassa,
            tx_id: TxId::new(tx_id)?,
            money: Money::new(MoneyAmount::new(parse_decimal_minor(value)?)?, currency),
            raw: body,
        }))
    }

    fn resolve(&self, event: &CanonicalEvent) -> Result<OrderRef, FlowError> {
        let order_id = json_str(&event.raw, "/object/metadata/order_id").ok_or_else(|| {
            FlowError::Validation("no order_id in payment metadata".to_string())
        })?;
        let id = Uuid::parse_str(order_id).map_err(|_| {
            FlowError::Validation(format!("metadata order_id is not a uuid: {order_id}"))
        })?;
        Ok(OrderRef::ById(id))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
        hmac::{Hmac, Mac},
        sha2::Sha256,
    };

    fn signed(secret: &str, body: &str) -> HeaderMap {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let sig = BASE64.encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());
        headers
    }

    fn body(order_id: &str) -> String {
        format!(
            r#"{{"type":"notification","event":"payment.succeeded",
                "object":{{"id":"2e4b-000f-5000-9000","status":"succeeded",
                "amount":{{"value":"500.00","currency":"RUB"}},
                "metadata":{{"order_id":"{order_id}"}}}}}}"#
        )
    }

    #[test]
    fn accepts_valid_signature_and_resolves_embedded_id() {
        let gw = YookassaGateway::new("shop-secret");
        let order_id = Uuid::now_v7();
        let body = body(&order_id.to_string());

        gw.verify(body.as_bytes(), &signed("shop-secret", &body))
            .unwrap();
        let event = gw.parse(body.as_bytes()).unwrap().unwrap();
        assert_eq!(event.tx_id.as_str(), "2e4b-000f-5000-9000");
        assert_eq!(event.money.amount().minor(), 50_000);
        assert_eq!(gw.resolve(&event).unwrap(), OrderRef::ById(order_id));
    }

    #[test]
    fn rejects_tampered_body() {
        let gw = YookassaGateway::new("shop-secret");
        let body = body(&Uuid::now_v7().to_string());
        let headers = signed("shop-secret", &body);
        let tampered = body.replace("500.00", "1.00");
        assert!(gw.verify(tampered.as_bytes(), &headers).is_err());
    }

    #[test]
    fn non_success_events_are_ignored() {
        let gw = YookassaGateway::new("shop-secret");
        let body = r#"{"event":"payment.waiting_for_capture","object":{"id":"x"}}"#;
        assert!(gw.parse(body.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn missing_metadata_fails_closed() {
        let gw = YookassaGateway::new("shop-secret");
        let body = r#"{"event":"payment.succeeded",
            "object":{"id":"tx-9","amount":{"value":"10.00","currency":"RUB"},"metadata":{}}}"#;
        let event = gw.parse(body.as_bytes()).unwrap().unwrap();
        assert!(gw.resolve(&event).is_err());
    }
}
