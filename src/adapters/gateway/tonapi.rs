use {
    super::{Gateway, header_str, json_str},
    crate::domain::{
        error::FlowError,
        event::{CanonicalEvent, OrderRef, Provider},
        id::TxId,
        money::{Currency, Money, MoneyAmount},
    },
    axum::http::HeaderMap,
};

/// On-chain TON transfers, relayed by an account-watch API. Transfers carry
/// no merchant signature. The webhook itself is gated by a bearer token,
/// and authenticity of the payment is established by correlating the
/// transfer comment and amount against a pending order in the ledger.
pub struct TonapiGateway {
    token: String,
}

impl TonapiGateway {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

impl Gateway for TonapiGateway {
    fn provider(&self) -> Provider {
        Provider::Tonapi
    }

    fn verify(&self, _raw: &[u8], headers: &HeaderMap) -> Result<(), FlowError> {
        if self.token.is_empty() {
            return Err(FlowError::Signature(
                "no tonapi webhook token configured".to_string(),
            ));
        }
        let auth = header_str(headers, "authorization")?;
        let bearer = auth
            .strip_prefix("Bearer ")
            .ok_or_else(|| FlowError::Signature("authorization is not a bearer".to_string()))?;
        if bearer.as_bytes() != self.token.as_bytes() {
            return Err(FlowError::Signature("bad webhook token".to_string()));
        }
        Ok(())
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<CanonicalEvent>, FlowError> {
        let body: serde_json::Value = serde_json::from_slice(raw)?;

        // One notification may batch several transactions; the first one
        // with a decoded comment is the payment. Comment-less transfers
        // cannot be attributed and are ignored here.
        let txs = body.pointer("/txs").and_then(|v| v.as_array());
        let Some(txs) = txs else { return Ok(None) };

        let Some(tx) = txs
            .iter()
            .find(|tx| json_str(tx, "/in_msg/decoded_comment").is_some_and(|c| !c.is_empty()))
        else {
            return Ok(None);
        };

        let hash = json_str(tx, "/hash")
            .ok_or_else(|| FlowError::Validation("transaction has no hash".to_string()))?;
        let nanoton = tx
            .pointer("/in_msg/value")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| FlowError::Validation("transfer has no value".to_string()))?;

        Ok(Some(CanonicalEvent {
            provider: Provider::Tonapi,
            tx_id: TxId::new(hash)?,
            money: Money::new(MoneyAmount::new(nanoton)?, Currency::Ton),
            raw: body.clone(),
        }))
    }

    fn resolve(&self, event: &CanonicalEvent) -> Result<OrderRef, FlowError> {
        let comment = event
            .raw
            .pointer("/txs")
            .and_then(|v| v.as_array())
            .and_then(|txs| {
                txs.iter()
                    .find_map(|tx| json_str(tx, "/in_msg/decoded_comment"))
            })
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                FlowError::Validation("transfer has no decoded comment".to_string())
            })?;
        Ok(OrderRef::ByPaymentRef(comment.to_string()))
    }
}
