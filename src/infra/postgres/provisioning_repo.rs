use {
    crate::domain::{error::FlowError, provisioning::NewProvisioningRecord},
    chrono::{DateTime, Utc},
    sqlx::{FromRow, PgPool, Postgres, Transaction},
    uuid::Uuid,
};

#[derive(Debug, Clone, FromRow)]
pub struct ProvisioningRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub host_id: String,
    pub client_ref: String,
    pub access_url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_renewal_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

/// Persist the credential a host issued. The partial unique index keeps one
/// live record per order, so a replayed fulfillment attempt is a no-op.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    record: &NewProvisioningRecord,
) -> Result<bool, FlowError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO provisioning_records
            (id, order_id, host_id, client_ref, access_url, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (order_id) WHERE NOT revoked DO NOTHING
        RETURNING true
        "#,
    )
    .bind(record.id)
    .bind(record.order_id)
    .bind(&record.host_id)
    .bind(&record.client_ref)
    .bind(&record.access_url)
    .bind(record.expires_at)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(inserted.is_some())
}

pub async fn get_live_by_order(
    pool: &PgPool,
    order_id: Uuid,
) -> Result<Option<ProvisioningRow>, FlowError> {
    let row = sqlx::query_as(
        "SELECT id, order_id, host_id, client_ref, access_url, issued_at, expires_at, \
         last_renewal_at, revoked \
         FROM provisioning_records WHERE order_id = $1 AND NOT revoked",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn touch_renewal(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<(), FlowError> {
    sqlx::query(
        "UPDATE provisioning_records SET expires_at = $2, last_renewal_at = now() \
         WHERE order_id = $1 AND NOT revoked",
    )
    .bind(order_id)
    .bind(expires_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Operator refund flow: the credential is withdrawn on the host first,
/// then the record is marked here.
pub async fn revoke(pool: &PgPool, order_id: Uuid) -> Result<bool, FlowError> {
    let result = sqlx::query(
        "UPDATE provisioning_records SET revoked = true WHERE order_id = $1 AND NOT revoked",
    )
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
