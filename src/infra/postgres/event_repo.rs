use {
    crate::domain::{
        error::FlowError,
        event::{CanonicalEvent, EventStatus},
    },
    sqlx::{PgPool, Postgres, Transaction},
    uuid::Uuid,
};

/// Record an inbound event. Returns `true` if this is the first delivery of
/// (provider, tx_id), `false` on a duplicate, in which case nothing else
/// may run for this delivery.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    event: &CanonicalEvent,
    payload_hash: &str,
) -> Result<bool, FlowError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO payment_events (id, provider, tx_id, amount, currency, payload_hash, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (provider, tx_id) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(event.provider.as_str())
    .bind(event.tx_id.as_str())
    .bind(event.money.amount().minor())
    .bind(event.money.currency().as_str())
    .bind(payload_hash)
    .bind(&event.raw)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(inserted.is_some())
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    event: &CanonicalEvent,
    status: EventStatus,
    order_id: Option<Uuid>,
) -> Result<(), FlowError> {
    sqlx::query(
        "UPDATE payment_events SET status = $1, order_id = $2 WHERE provider = $3 AND tx_id = $4",
    )
    .bind(status.as_str())
    .bind(order_id)
    .bind(event.provider.as_str())
    .bind(event.tx_id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Record a delivery that failed signature or payload verification. Keyed
/// by the payload hash so that the provider retrying the same broken body
/// does not accumulate rows.
pub async fn record_rejected(
    pool: &PgPool,
    provider: &str,
    payload_hash: &str,
    payload: &serde_json::Value,
) -> Result<(), FlowError> {
    sqlx::query(
        r#"
        INSERT INTO payment_events (id, provider, tx_id, amount, currency, payload_hash, payload, status)
        VALUES ($1, $2, $3, 0, 'rub', $3, $4, 'rejected')
        ON CONFLICT (provider, tx_id) DO NOTHING
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(provider)
    .bind(payload_hash)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}
