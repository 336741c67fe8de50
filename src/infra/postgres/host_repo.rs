use {
    crate::domain::error::FlowError,
    sqlx::{FromRow, PgPool},
};

/// One remote VPN-panel host as configured by the operator.
#[derive(Debug, Clone, FromRow)]
pub struct HostRow {
    pub host_id: String,
    pub panel_kind: String,
    pub base_url: String,
    pub panel_user: String,
    pub panel_pass: String,
    pub inbound_id: i32,
    pub max_concurrent: i32,
    pub healthy: bool,
}

const HOST_COLUMNS: &str = "host_id, panel_kind, base_url, panel_user, panel_pass, \
     inbound_id, max_concurrent, healthy";

pub async fn get(pool: &PgPool, host_id: &str) -> Result<Option<HostRow>, FlowError> {
    let row = sqlx::query_as(&format!(
        "SELECT {HOST_COLUMNS} FROM hosts WHERE host_id = $1"
    ))
    .bind(host_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn all(pool: &PgPool) -> Result<Vec<HostRow>, FlowError> {
    let rows = sqlx::query_as(&format!("SELECT {HOST_COLUMNS} FROM hosts ORDER BY host_id"))
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Auth failures take a host out of rotation for future orders until an
/// operator fixes the panel credentials.
pub async fn mark_unhealthy(pool: &PgPool, host_id: &str) -> Result<(), FlowError> {
    sqlx::query("UPDATE hosts SET healthy = false WHERE host_id = $1")
        .bind(host_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_healthy(pool: &PgPool, host_id: &str) -> Result<(), FlowError> {
    sqlx::query("UPDATE hosts SET healthy = true WHERE host_id = $1")
        .bind(host_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn upsert(pool: &PgPool, host: &HostRow) -> Result<(), FlowError> {
    sqlx::query(
        r#"
        INSERT INTO hosts
            (host_id, panel_kind, base_url, panel_user, panel_pass,
             inbound_id, max_concurrent, healthy)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (host_id) DO UPDATE
        SET panel_kind = EXCLUDED.panel_kind,
            base_url = EXCLUDED.base_url,
            panel_user = EXCLUDED.panel_user,
            panel_pass = EXCLUDED.panel_pass,
            inbound_id = EXCLUDED.inbound_id,
            max_concurrent = EXCLUDED.max_concurrent,
            healthy = EXCLUDED.healthy
        "#,
    )
    .bind(&host.host_id)
    .bind(&host.panel_kind)
    .bind(&host.base_url)
    .bind(&host.panel_user)
    .bind(&host.panel_pass)
    .bind(host.inbound_id)
    .bind(host.max_concurrent)
    .bind(host.healthy)
    .execute(pool)
    .await?;
    Ok(())
}
