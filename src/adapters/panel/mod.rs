//! Remote VPN-panel clients. Each host row configures one panel instance
//! behind the `PanelClient` trait; a per-host semaphore bounds concurrent
//! calls so one slow panel queues its own work instead of rejecting it.

pub mod remnawave;
pub mod xui;

use {
    crate::domain::provisioning::{IssueRequest, IssuedCredential, ProvisionError},
    crate::infra::postgres::host_repo::HostRow,
    reqwest::StatusCode,
    std::collections::HashMap,
    std::sync::Arc,
    std::time::Duration,
    std::{future::Future, pin::Pin},
    tokio::sync::Semaphore,
};

pub use {remnawave::RemnawavePanel, xui::XuiPanel};

pub trait PanelClient: Send + Sync {
    /// Create or renew the credential identified by `req.client_ref` on
    /// this panel. Safe to call repeatedly for the same order: the client
    /// reference is looked up first and an existing credential is updated
    /// in place, never duplicated.
    fn issue_credential(
        &self,
        req: &IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Result<IssuedCredential, ProvisionError>> + Send + '_>>;

    /// Withdraw a credential (operator refund flow). Succeeds when the
    /// credential is already gone.
    fn revoke_credential(
        &self,
        client_ref: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send + '_>>;
}

/// One configured host: its client plus the concurrency gate for calls to
/// it. Calls to different hosts never contend.
pub struct HostHandle {
    pub host_id: String,
    client: Arc<dyn PanelClient>,
    limiter: Arc<Semaphore>,
}

impl HostHandle {
    pub async fn issue_credential(
        &self,
        req: &IssueRequest,
    ) -> Result<IssuedCredential, ProvisionError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ProvisionError::Unreachable("host limiter closed".to_string()))?;
        self.client.issue_credential(req).await
    }

    pub async fn revoke_credential(&self, client_ref: &str) -> Result<(), ProvisionError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ProvisionError::Unreachable("host limiter closed".to_string()))?;
        self.client.revoke_credential(client_ref).await
    }
}

#[derive(Default)]
pub struct HostRegistry {
    hosts: HashMap<String, HostHandle>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build clients for every configured host row.
    pub fn from_rows(rows: &[HostRow]) -> Result<Self, ProvisionError> {
        let http = build_http_client();
        let mut registry = Self::new();
        for row in rows {
            let client: Arc<dyn PanelClient> = match row.panel_kind.as_str() {
                "xui" => Arc::new(XuiPanel::from_row(row, http.clone())),
                "remnawave" => Arc::new(RemnawavePanel::from_row(row, http.clone())),
                other => {
                    return Err(ProvisionError::Rejected(format!(
                        "host {} has unknown panel kind: {other}",
                        row.host_id
                    )));
                }
            };
            registry.register(&row.host_id, client, row.max_concurrent.max(1) as usize);
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        host_id: &str,
        client: Arc<dyn PanelClient>,
        max_concurrent: usize,
    ) {
        self.hosts.insert(
            host_id.to_string(),
            HostHandle {
                host_id: host_id.to_string(),
                client,
                limiter: Arc::new(Semaphore::new(max_concurrent)),
            },
        );
    }

    pub fn get(&self, host_id: &str) -> Option<&HostHandle> {
        self.hosts.get(host_id)
    }
}

pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
}

// ── Failure classification ─────────────────────────────────────────────────

pub(crate) fn classify_transport(e: reqwest::Error) -> ProvisionError {
    if e.is_timeout() || e.is_connect() {
        ProvisionError::Unreachable(e.to_string())
    } else if e.is_status() {
        match e.status() {
            Some(s) => classify_status(s, &e.to_string()),
            None => ProvisionError::Unreachable(e.to_string()),
        }
    } else {
        ProvisionError::Unreachable(e.to_string())
    }
}

pub(crate) fn classify_status(status: StatusCode, detail: &str) -> ProvisionError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProvisionError::AuthFailed(format!("{status}: {detail}"))
    } else if status.is_client_error() {
        ProvisionError::Rejected(format!("{status}: {detail}"))
    } else {
        ProvisionError::Unreachable(format!("{status}: {detail}"))
    }
}
