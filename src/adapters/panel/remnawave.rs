use {
    super::{PanelClient, classify_status, classify_transport},
    crate::domain::provisioning::{IssueRequest, IssuedCredential, ProvisionError},
    crate::infra::postgres::host_repo::HostRow,
    chrono::{DateTime, Duration, Utc},
    serde::Deserialize,
    serde_json::json,
    std::{future::Future, pin::Pin},
};

/// Client for Remnawave panels: a plain bearer-token REST API. The panel
/// keys users by username, which is where the order's client reference
/// goes; lookup before create keeps the call idempotent.
pub struct RemnawavePanel {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct UserResponse {
    response: RemnaUser,
}

#[derive(Deserialize)]
struct UserListResponse {
    response: Vec<RemnaUser>,
}

#[derive(Deserialize)]
struct RemnaUser {
    uuid: String,
    #[serde(rename = "expireAt")]
    expire_at: DateTime<Utc>,
    #[serde(rename = "subscriptionUrl")]
    subscription_url: String,
}

impl RemnawavePanel {
    pub fn from_row(row: &HostRow, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: row.base_url.trim_end_matches('/').to_string(),
            // The panel password column carries the API token for this
            // panel kind.
            token: row.panel_pass.clone(),
        }
    }

    async fn find_user(&self, client_ref: &str) -> Result<Option<RemnaUser>, ProvisionError> {
        let resp = self
            .http
            .get(format!(
                "{}/api/users/by-username/{client_ref}",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify_status(status, "user lookup failed"));
        }
        let body: UserListResponse = resp.json().await.map_err(classify_transport)?;
        Ok(body.response.into_iter().next())
    }

    async fn create_user(
        &self,
        client_ref: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RemnaUser, ProvisionError> {
        let resp = self
            .http
            .post(format!("{}/api/users", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({
                "username": client_ref,
                "expireAt": expires_at,
                "status": "ACTIVE",
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "user create failed"));
        }
        let body: UserResponse = resp.json().await.map_err(classify_transport)?;
        Ok(body.response)
    }

    async fn update_expiry(
        &self,
        uuid: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RemnaUser, ProvisionError> {
        let resp = self
            .http
            .patch(format!("{}/api/users", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({
                "uuid": uuid,
                "expireAt": expires_at,
                "status": "ACTIVE",
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "user update failed"));
        }
        let body: UserResponse = resp.json().await.map_err(classify_transport)?;
        Ok(body.response)
    }

    async fn issue_inner(&self, req: &IssueRequest) -> Result<IssuedCredential, ProvisionError> {
        // Renewals target the credential the original purchase created;
        // fresh orders are keyed by their own reference.
        let panel_ref = req.renew_ref.as_deref().unwrap_or(&req.client_ref);
        let existing = self.find_user(panel_ref).await?;

        let now = Utc::now();
        let base = existing
            .as_ref()
            .map(|u| u.expire_at)
            .filter(|t| *t > now)
            .unwrap_or(now);
        let expires_at = base + Duration::days(i64::from(req.days));

        let user = match existing {
            Some(user) => self.update_expiry(&user.uuid, expires_at).await?,
            None => self.create_user(panel_ref, expires_at).await?,
        };

        Ok(IssuedCredential {
            client_ref: user.uuid,
            access_url: user.subscription_url,
            expires_at: user.expire_at,
        })
    }

    async fn revoke_inner(&self, client_ref: &str) -> Result<(), ProvisionError> {
        let resp = self
            .http
            .delete(format!("{}/api/users/{client_ref}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND || status.is_success() {
            return Ok(());
        }
        Err(classify_status(status, "user delete failed"))
    }
}

impl PanelClient for RemnawavePanel {
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
