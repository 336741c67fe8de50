use {
    chrono::{DateTime, Utc},
    thiserror::Error,
    uuid::Uuid,
};

/// Classified outcome of a remote panel call. Only `Unreachable` is worth
/// retrying; the other two need an operator.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("host rejected request: {0}")]
    Rejected(String),

    #[error("host authentication failed: {0}")]
    AuthFailed(String),
}

impl ProvisionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// What the state machine asks a panel to do. `client_ref` is the order's
/// idempotency key, the panel-side identity that makes repeat calls
/// converge on one credential.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub client_ref: String,
    pub label: String,
    pub days: i32,
    /// For renewals: the remote credential to extend instead of creating.
    pub renew_ref: Option<String>,
}

/// What a panel hands back. Persistence is the state machine's job.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub client_ref: String,
    pub access_url: String,
    pub expires_at: DateTime<Utc>,
}

/// For INSERT into the provisioning record store.
#[derive(Debug, Clone)]
pub struct NewProvisioningRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub host_id: String,
    pub client_ref: String,
    pub access_url: String,
    pub expires_at: DateTime<Utc>,
}

impl NewProvisioningRecord {
    pub fn from_credential(order_id: Uuid, host_id: &str, cred: &IssuedCredential) -> Self {
        Self {
            id: Uuid::now_v7(),
            order_id,
            host_id: host_id.to_string(),
            client_ref: cred.client_ref.clone(),
            access_url: cred.access_url.clone(),
            expires_at: cred.expires_at,
        }
    }
}
