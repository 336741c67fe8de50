use derive_more::Display;
use serde::{Deserialize, Serialize};

use {
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    sha2::{Digest, Sha256},
};

use super::error::FlowError;

/// Provider-assigned transaction identifier. Dedup key together with the
/// provider tag. The shape is provider-specific, so only non-emptiness is
/// enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Result<Self, FlowError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(FlowError::Validation(
                "TxId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Deterministic key preventing duplicate order creation from repeated
/// client submissions. Also used as the client reference on remote panels,
/// which is what makes provisioning retries safe.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(buyer_id: i64, plan_id: &str, nonce: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(buyer_id.to_be_bytes());
        hasher.update(b"\x1f");
        hasher.update(plan_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(nonce.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    /// Wrap a key read back from the ledger.
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
