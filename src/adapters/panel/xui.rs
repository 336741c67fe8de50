use {
    super::{PanelClient, classify_status, classify_transport},
    crate::domain::provisioning::{IssueRequest, IssuedCredential, ProvisionError},
    crate::infra::postgres::host_repo::HostRow,
    chrono::{DateTime, Duration, Utc},
    serde::Deserialize,
    serde_json::json,
    std::{future::Future, pin::Pin},
    uuid::Uuid,
};

/// Client for 3x-ui style panels. Session auth via the login form, then the
/// inbound's client list is searched for the reference before anything is
/// created, so repeat calls for the same order converge on one client entry.
pub struct XuiPanel {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    inbound_id: i32,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    msg: String,
    obj: Option<T>,
}

#[derive(Deserialize)]
struct InboundObj {
    id: i32,
    settings: String,
}

#[derive(Deserialize)]
struct InboundSettings {
    #[serde(default)]
    clients: Vec<PanelClientEntry>,
}

#[derive(Deserialize)]
struct PanelClientEntry {
    id: String,
    email: String,
    #[serde(rename = "expiryTime", default)]
    expiry_time: i64,
}

impl XuiPanel {
    pub fn from_row(row: &HostRow, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: row.base_url.trim_end_matches('/').to_string(),
            username: row.panel_user.clone(),
            password: row.panel_pass.clone(),
            inbound_id: row.inbound_id,
        }
    }

    async fn login(&self) -> Result<String, ProvisionError> {
        let resp = self
            .http
            .post(format!("{}/login", self.base_url))
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "panel login failed"));
        }
        resp.headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .and_then(|c| c.split(';').next())
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::AuthFailed("panel login returned no session cookie".to_string())
            })
    }

    async fn fetch_inbound(&self, cookie: &str) -> Result<InboundObj, ProvisionError> {
        let resp = self
            .http
            .get(format!(
                "{}/panel/api/inbounds/get/{}",
                self.base_url, self.inbound_id
            ))
            .header("cookie", cookie)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "inbound fetch failed"));
        }
        let envelope: ApiEnvelope<InboundObj> =
            resp.json().await.map_err(classify_transport)?;
        if !envelope.success {
            return Err(ProvisionError::Rejected(envelope.msg));
        }
        envelope
            .obj
            .ok_or_else(|| ProvisionError::Rejected("inbound not found".to_string()))
    }

    fn find_existing(inbound: &InboundObj, client_ref: &str) -> Option<PanelClientEntry> {
        let settings: InboundSettings = serde_json::from_str(&inbound.settings).ok()?;
        settings.clients.into_iter().find(|c| c.email == client_ref)
    }

    async fn upsert_client(
        &self,
        cookie: &str,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let resp = self
            .http
            .post(format!("{}/panel/api/inbounds/{path}", self.base_url))
            .header("cookie", cookie)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "client upsert failed"));
        }
        let envelope: ApiEnvelope<serde_json::Value> =
            resp.json().await.map_err(classify_transport)?;
        if !envelope.success {
            return Err(ProvisionError::Rejected(envelope.msg));
        }
        Ok(())
    }

    async fn issue_inner(&self, req: &IssueRequest) -> Result<IssuedCredential, ProvisionError> {
        let cookie = self.login().await?;
        let inbound = self.fetch_inbound(&cookie).await?;

        // Renewals target the credential the original purchase created;
        // fresh orders are keyed by their own reference.
        let panel_ref = req.renew_ref.as_deref().unwrap_or(&req.client_ref);
        let existing = Self::find_existing(&inbound, panel_ref);

        // Renewals stack onto an unexpired credential; everything else
        // starts counting from now.
        let now = Utc::now();
        let base = existing
            .as_ref()
            .and_then(|c| DateTime::from_timestamp_millis(c.expiry_time))
            .filter(|t| *t > now)
            .unwrap_or(now);
        let expires_at = base + Duration::days(i64::from(req.days));

        let client_uuid = existing
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let client_json = json!({
            "id": client_uuid,
            "email": panel_ref,
            "enable": true,
            "flow": "xtls-rprx-vision",
            "expiryTime": expires_at.timestamp_millis(),
        });
        let payload = json!({
            "id": inbound.id,
            "settings": json!({ "clients": [client_json] }).to_string(),
        });

        if existing.is_some() {
            self.upsert_client(&cookie, &format!("updateClient/{client_uuid}"), payload)
                .await?;
        } else {
            self.upsert_client(&cookie, "addClient", payload).await?;
        }

        Ok(IssuedCredential {
            client_ref: client_uuid.clone(),
            access_url: format!("{}/sub/{}", self.base_url, client_uuid),
            expires_at,
        })
    }

    async fn revoke_inner(&self, client_ref: &str) -> Result<(), ProvisionError> {
        let cookie = self.login().await?;
        let resp = self
            .http
            .post(format!(
                "{}/panel/api/inbounds/{}/delClient/{client_ref}",
                self.base_url, self.inbound_id
            ))
            .header("cookie", cookie)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        // An already-deleted client is a successful revoke.
        if status == reqwest::StatusCode::NOT_FOUND || status.is_success() {
            return Ok(());
        }
        Err(classify_status(status, "client delete failed"))
    }
}

impl PanelClient for XuiPanel {
    fn issue_credential(
        &self,
        req: &IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Result<IssuedCredential, ProvisionError>> + Send + '_>> {
        let req = req.clone();
        Box::pin(async move { self.issue_inner(&req).await })
    }

    fn revoke_credential(
        &self,
        client_ref: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send + '_>> {
        let client_ref = client_ref.to_string();
        Box::pin(async move { self.revoke_inner(&client_ref).await })
    }
}
