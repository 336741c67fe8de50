use {
    crate::domain::{error::FlowError, referral::NewReferralCredit},
    sqlx::{PgPool, Postgres, Transaction},
};

/// Who referred this buyer, if anyone.
pub async fn referrer_of(pool: &PgPool, buyer_id: i64) -> Result<Option<i64>, FlowError> {
    let row: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT referred_by FROM buyers WHERE buyer_id = $1")
            .bind(buyer_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(referred_by,)| referred_by))
}

/// Insert one credit; the uniqueness keys — (source_order_id, kind), and
/// buyer_id for signup bonuses — turn every re-settlement into a no-op.
/// Returns `true` when the credit was actually written.
pub async fn insert_credit(
    tx: &mut Transaction<'_, Postgres>,
    credit: &NewReferralCredit,
) -> Result<bool, FlowError> {
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO referral_credits
            (id, referrer_id, buyer_id, source_order_id, kind, amount, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT DO NOTHING
        RETURNING true
        "#,
    )
    .bind(credit.id)
    .bind(credit.referrer_id)
    .bind(credit.buyer_id)
    .bind(credit.source_order_id)
    .bind(credit.kind.as_str())
    .bind(credit.amount.minor())
    .bind(&credit.currency)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(inserted.is_some())
}

/// Sum of all credits for a referrer, in minor units. Read by the admin
/// panel and the withdrawal hook.
pub async fn balance(pool: &PgPool, referrer_id: i64) -> Result<i64, FlowError> {
    let total: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(amount)::bigint FROM referral_credits WHERE referrer_id = $1",
    )
    .bind(referrer_id)
    .fetch_one(pool)
    .await?;
    Ok(total.unwrap_or(0))
}

pub async fn credits_for_order(
    pool: &PgPool,
    order_id: uuid::Uuid,
) -> Result<i64, FlowError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM referral_credits WHERE source_order_id = $1")
            .bind(order_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Register or update a buyer record from the storefront boundary. The
/// referral link is written once; a later conflicting claim does not
/// rewrite history.
pub async fn upsert_buyer(
    pool: &PgPool,
    buyer_id: i64,
    username: Option<&str>,
    referred_by: Option<i64>,
) -> Result<(), FlowError> {
    sqlx::query(
        r#"
        INSERT INTO buyers (buyer_id, username, referred_by)
        VALUES ($1, $2, $3)
        ON CONFLICT (buyer_id) DO UPDATE
        SET username = COALESCE(EXCLUDED.username, buyers.username)
        "#,
    )
    .bind(buyer_id)
    .bind(username)
    .bind(referred_by)
    .execute(pool)
    .await?;
    Ok(())
}
