use {
    crate::domain::{
        error::FlowError,
        id::IdempotencyKey,
        money::{Currency, Money, MoneyAmount},
        order::{NewOrder, Order, OrderKind, OrderState},
    },
    chrono::{DateTime, Utc},
    sqlx::{FromRow, PgPool, Postgres, Transaction},
    uuid::Uuid,
};

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    buyer_id: i64,
    host_id: String,
    plan_id: String,
    plan_days: i32,
    amount: i64,
    currency: String,
    kind: String,
    renew_ref: Option<String>,
    state: String,
    idempotency_key: String,
    payment_provider: Option<String>,
    payment_tx_id: Option<String>,
    provisioning_attempts: i32,
    refund_eligible: bool,
    settled: bool,
    notified: bool,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, FlowError> {
        Ok(Order {
            id: self.id,
            buyer_id: self.buyer_id,
            host_id: self.host_id,
            plan_id: self.plan_id,
            plan_days: self.plan_days,
            amount: Money::new(
                MoneyAmount::new(self.amount)?,
                Currency::try_from(self.currency.as_str())?,
            ),
            kind: OrderKind::try_from(self.kind.as_str())?,
            renew_ref: self.renew_ref,
            state: OrderState::try_from(self.state.as_str())?,
            idempotency_key: IdempotencyKey::from_stored(self.idempotency_key),
            payment_provider: self.payment_provider,
            payment_tx_id: self.payment_tx_id,
            provisioning_attempts: self.provisioning_attempts,
            refund_eligible: self.refund_eligible,
            settled: self.settled,
            notified: self.notified,
            created_at: self.created_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, buyer_id, host_id, plan_id, plan_days, amount, currency, kind, \
     renew_ref, state, idempotency_key, payment_provider, payment_tx_id, \
     provisioning_attempts, refund_eligible, settled, notified, created_at";

/// Serialize every transition for one order. Advisory lock works even when
/// competing writers race on the same row: the second acquirer observes
/// whatever the first committed.
pub async fn lock_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<(), FlowError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(order_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Insert a new order; a resubmission with the same idempotency key returns
/// the already-created order instead. The bool is `true` when this call
/// created the row.
pub async fn insert(pool: &PgPool, order: &NewOrder) -> Result<(Order, bool), FlowError> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO orders
            (id, buyer_id, host_id, plan_id, plan_days, amount, currency,
             kind, renew_ref, state, idempotency_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'awaiting_payment', $10)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(order.id)
    .bind(order.buyer_id)
    .bind(&order.host_id)
    .bind(&order.plan_id)
    .bind(order.plan_days)
    .bind(order.amount.amount().minor())
    .bind(order.amount.currency().as_str())
    .bind(order.kind.as_str())
    .bind(&order.renew_ref)
    .bind(order.idempotency_key.as_str())
    .fetch_optional(pool)
    .await?;

    let created = inserted.is_some();
    let row: OrderRow = sqlx::query_as(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = $1"
    ))
    .bind(order.idempotency_key.as_str())
    .fetch_one(pool)
    .await?;

    Ok((row.into_order()?, created))
}

pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<Option<Order>, FlowError> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
    row.map(OrderRow::into_order).transpose()
}

pub async fn get_pool(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>, FlowError> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(pool)
            .await?;
    row.map(OrderRow::into_order).transpose()
}

/// Correlate a provider-supplied reference (transfer comment, invoice
/// payload) with an order still waiting for its payment.
pub async fn find_awaiting_by_reference(
    tx: &mut Transaction<'_, Postgres>,
    reference: &str,
) -> Result<Option<Order>, FlowError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE idempotency_key = $1 AND state IN ('created', 'awaiting_payment')"
    ))
    .bind(reference)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(OrderRow::into_order).transpose()
}

/// Accept a payment: record the provider reference, land on
/// `payment_confirmed`, and schedule the first provisioning attempt — one
/// write, so the transition and its side-effect intent commit together. A
/// crash after this commit is recovered by the retry sweep.
pub async fn confirm_payment(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    provider: &str,
    tx_id: &str,
) -> Result<bool, FlowError> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET state = 'payment_confirmed',
            payment_provider = $2,
            payment_tx_id = $3,
            next_attempt_at = now(),
            updated_at = now()
        WHERE id = $1 AND state IN ('created', 'awaiting_payment')
        "#,
    )
    .bind(order_id)
    .bind(provider)
    .bind(tx_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Enter `provisioning` at the start of an attempt. From here the buyer
/// can no longer cancel. Returns `false` when the order is no longer
/// eligible (already fulfilled or failed by another actor).
pub async fn begin_provisioning(pool: &PgPool, order_id: Uuid) -> Result<bool, FlowError> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET state = 'provisioning', updated_at = now()
        WHERE id = $1 AND state IN ('payment_confirmed', 'provisioning')
        "#,
    )
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Compare-and-set state change. Returns `false` when the order was not in
/// the expected state (the caller lost the race or the world moved on).
pub async fn set_state_if(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    expected: &OrderState,
    next: &OrderState,
) -> Result<bool, FlowError> {
    let result = sqlx::query(
        "UPDATE orders SET state = $3, updated_at = now() WHERE id = $1 AND state = $2",
    )
    .bind(order_id)
    .bind(expected.as_str())
    .bind(next.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Push the next provisioning attempt out by `delay_secs` and count the
/// failed one.
pub async fn schedule_retry(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    delay_secs: i64,
) -> Result<(), FlowError> {
    sqlx::query(
        r#"
        UPDATE orders
        SET provisioning_attempts = provisioning_attempts + 1,
            next_attempt_at = now() + make_interval(secs => $2),
            updated_at = now()
        WHERE id = $1 AND state = 'provisioning'
        "#,
    )
    .bind(order_id)
    .bind(delay_secs as f64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Terminal provisioning failure: operator review queue + refund flag.
pub async fn mark_failed(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<bool, FlowError> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET state = 'failed',
            refund_eligible = true,
            next_attempt_at = NULL,
            updated_at = now()
        WHERE id = $1 AND state = 'provisioning'
        "#,
    )
    .bind(order_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_fulfilled(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<bool, FlowError> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET state = 'fulfilled',
            provisioning_attempts = provisioning_attempts + 1,
            next_attempt_at = NULL,
            updated_at = now()
        WHERE id = $1 AND state = 'provisioning'
        "#,
    )
    .bind(order_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_settled(pool: &PgPool, order_id: Uuid) -> Result<(), FlowError> {
    sqlx::query("UPDATE orders SET settled = true, updated_at = now() WHERE id = $1")
        .bind(order_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_notified(pool: &PgPool, order_id: Uuid) -> Result<(), FlowError> {
    sqlx::query("UPDATE orders SET notified = true, updated_at = now() WHERE id = $1")
        .bind(order_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Manual operator action, only valid from `fulfilled`.
pub async fn mark_refunded(pool: &PgPool, order_id: Uuid) -> Result<bool, FlowError> {
    let result = sqlx::query(
        "UPDATE orders SET state = 'refunded', updated_at = now() \
         WHERE id = $1 AND state = 'fulfilled'",
    )
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ── Sweep queries ──────────────────────────────────────────────────────────

/// Expire unpaid orders older than the cutoff. Bounded batch; the
/// conditional state filter keeps this from ever touching a paid order.
pub async fn expire_stale(
    pool: &PgPool,
    older_than_secs: i64,
    batch: i64,
) -> Result<Vec<(Uuid, i64)>, FlowError> {
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        r#"
        UPDATE orders
        SET state = 'expired', updated_at = now()
        WHERE id IN (
            SELECT id FROM orders
            WHERE state IN ('created', 'awaiting_payment')
              AND created_at < now() - make_interval(secs => $1)
            ORDER BY created_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, buyer_id
        "#,
    )
    .bind(older_than_secs as f64)
    .bind(batch)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Claim orders due for a provisioning (re)attempt. Claiming leases the
/// order by pushing `next_attempt_at` out, so a crashed attempt surfaces
/// again on its own; SKIP LOCKED keeps concurrent sweeps off each other.
pub async fn claim_provision_due(
    pool: &PgPool,
    batch: i64,
    lease_secs: i64,
) -> Result<Vec<Uuid>, FlowError> {
    let ids: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE orders
        SET next_attempt_at = now() + make_interval(secs => $2), updated_at = now()
        WHERE id IN (
            SELECT id FROM orders
            WHERE state IN ('payment_confirmed', 'provisioning')
              AND next_attempt_at <= now()
            ORDER BY next_attempt_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id
        "#,
    )
    .bind(batch)
    .bind(lease_secs as f64)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Fulfilled orders whose financial or notification side effects have not
/// landed yet.
pub async fn unsettled_fulfilled(pool: &PgPool, batch: i64) -> Result<Vec<Uuid>, FlowError> {
    let ids: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM orders
        WHERE state = 'fulfilled' AND (settled = false OR notified = false)
        ORDER BY updated_at
        LIMIT $1
        "#,
    )
    .bind(batch)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}
