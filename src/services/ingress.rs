use {
    crate::AppState,
    crate::adapters::gateway::sha256_base64,
    crate::domain::error::FlowError,
    crate::domain::event::{CanonicalEvent, EventStatus, Provider},
    crate::infra::postgres::event_repo,
    crate::services::order_flow::{self, ConfirmOutcome},
    axum::http::HeaderMap,
    uuid::Uuid,
};

#[derive(Debug)]
pub enum IngestOutcome {
    /// Payment accepted and the order driven forward.
    Confirmed(Uuid),
    /// Redelivery of something already absorbed.
    Duplicate,
    /// Authentic, but not a payment confirmation.
    Ignored,
    /// Held for manual reconciliation.
    Orphaned,
    /// Held for manual review; order left awaiting payment.
    AmountMismatch(Uuid),
}

/// One inbound provider callback, end to end: authenticate, normalize,
/// resolve, and drive the order state machine. The durable event write and
/// the state transition commit together inside `confirm_payment`; anything
/// after that never changes the acknowledgement.
pub async fn ingest(
    state: &AppState,
    provider: Provider,
    raw: &[u8],
    headers: &HeaderMap,
) -> Result<IngestOutcome, FlowError> {
    let gateway = state.gateways.get(provider);
    let payload_hash = sha256_base64(raw);

    if let Err(e) = gateway.verify(raw, headers) {
        // Record the rejection so the review queue sees it, then bounce the
        // delivery; the same bytes will never verify on a retry.
        let payload = serde_json::from_slice(raw)
            .unwrap_or_else(|_| serde_json::json!({ "unparseable": true }));
        event_repo::record_rejected(&state.pool, provider.as_str(), &payload_hash, &payload)
            .await?;
        tracing::warn!(provider = %provider, error = %e, "webhook rejected");
        return Err(e);
    }

    let Some(event) = gateway.parse(raw)? else {
        tracing::debug!(provider = %provider, "authentic non-payment event ignored");
        return Ok(IngestOutcome::Ignored);
    };

    let outcome = match gateway.resolve(&event) {
        Ok(order_ref) => {
            order_flow::confirm_payment(state, &order_ref, &event, &payload_hash).await?
        }
        Err(e) => {
            tracing::warn!(provider = %provider, tx_id = %event.tx_id, error = %e, "unresolvable payment event");
            hold_orphan(state, &event, &payload_hash).await?
        }
    };

    match outcome {
        ConfirmOutcome::Confirmed(order_id) => {
            // Synchronous first attempt. Its failure is the retry sweep's
            // business, not the provider's. The payment stays accepted.
            if let Err(e) = order_flow::run_provisioning(state, order_id).await {
                tracing::error!(order_id = %order_id, error = %e, "provisioning attempt errored, sweep will retry");
            }
            Ok(IngestOutcome::Confirmed(order_id))
        }
        ConfirmOutcome::Duplicate => Ok(IngestOutcome::Duplicate),
        ConfirmOutcome::Orphaned => Ok(IngestOutcome::Orphaned),
        ConfirmOutcome::AmountMismatch(order_id) => Ok(IngestOutcome::AmountMismatch(order_id)),
    }
}

/// Persist an event that cannot point at any order. Duplicate-safe like the
/// main path.
async fn hold_orphan(
    state: &AppState,
    event: &CanonicalEvent,
    payload_hash: &str,
) -> Result<ConfirmOutcome, FlowError> {
    let mut tx = state.pool.begin().await?;
    let inserted = event_repo::insert(&mut tx, event, payload_hash).await?;
    if !inserted {
        tx.commit().await?;
        return Ok(ConfirmOutcome::Duplicate);
    }
    event_repo::set_status(&mut tx, event, EventStatus::Orphaned, None).await?;
    tx.commit().await?;
    Ok(ConfirmOutcome::Orphaned)
}
