use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            error::FlowError,
            money::Currency,
            order::{NewOrder, NewOrderParams, OrderKind},
        },
        infra::postgres::referral_repo,
        services::order_flow,
    },
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    uuid::Uuid,
};

/// What the chat-bot sends when a buyer confirms intent to pay.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub buyer_id: i64,
    pub username: Option<String>,
    pub referred_by: Option<i64>,
    pub host_id: String,
    pub plan_id: String,
    pub plan_days: i32,
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub extend: bool,
    pub renew_ref: Option<String>,
    /// Client-supplied; makes resubmission of the same purchase idempotent.
    pub nonce: String,
}

/// `POST /orders`, the storefront boundary. The response carries the payment
/// reference the bot embeds in the provider invoice (metadata, invoice
/// payload, or transfer comment, per provider).
pub async fn create_order_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    referral_repo::upsert_buyer(
        &state.pool,
        req.buyer_id,
        req.username.as_deref(),
        req.referred_by,
    )
    .await?;

    let order = NewOrder::new(NewOrderParams {
        buyer_id: req.buyer_id,
        host_id: req.host_id,
        plan_id: req.plan_id,
        plan_days: req.plan_days,
        amount_minor: req.amount_minor,
        currency: Currency::try_from(req.currency.as_str())?,
        kind: if req.extend {
            OrderKind::Extend
        } else {
            OrderKind::New
        },
        renew_ref: req.renew_ref,
        nonce: req.nonce,
    })?;

    let (order, created) = order_flow::create_order(&state, &order).await?;
    Ok(Json(serde_json::json!({
        "order_id": order.id,
        "state": order.state.as_str(),
        "payment_reference": order.idempotency_key.as_str(),
        "created": created,
    })))
}

/// `POST /orders/{id}/refund`: operator action, valid only from
/// `fulfilled`.
pub async fn refund_order_handler(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let refunded = order_flow::refund_order(&state, order_id).await?;
    if !refunded {
        return Err(FlowError::Validation(
            "only fulfilled orders can be refunded".to_string(),
        )
        .into());
    }
    Ok(Json(serde_json::json!({ "order_id": order_id, "status": "refunded" })))
}

/// `GET /referrals/{buyer_id}/balance`: read API for the admin panel.
pub async fn referral_balance_handler(
    State(state): State<AppState>,
    Path(buyer_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let balance = referral_repo::balance(&state.pool, buyer_id).await?;
    Ok(Json(serde_json::json!({
        "buyer_id": buyer_id,
        "balance_minor": balance,
    })))
}
