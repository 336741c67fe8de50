use {
    crate::AppState,
    crate::domain::error::FlowError,
    crate::infra::postgres::order_repo,
    crate::services::order_flow,
    tokio::sync::watch,
};

/// Lease granted to an in-flight provisioning attempt before its outcome
/// writes back; a crashed attempt resurfaces after this long.
const ATTEMPT_LEASE_SECS: i64 = 120;

/// Periodic recovery loop: expire unpaid orders, re-drive provisioning
/// retries, and reconcile fulfilled orders with pending side effects. Every
/// pass is a bounded batch, and every touched order goes through the same
/// per-order locking as the live webhook path.
pub async fn run_sweeper(state: AppState, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(state.config.sweep_interval) => {}
        }

        if let Err(e) = sweep_once(&state).await {
            tracing::error!(error = %e, "sweep pass error");
        }
    }
}

pub async fn sweep_once(state: &AppState) -> Result<(), FlowError> {
    expire_unpaid(state).await?;
    retry_provisioning(state).await?;
    reconcile_side_effects(state).await?;
    Ok(())
}

async fn expire_unpaid(state: &AppState) -> Result<(), FlowError> {
    let expired = order_repo::expire_stale(
        &state.pool,
        state.config.order_expiry.as_secs() as i64,
        state.config.sweep_batch,
    )
    .await?;

    for (order_id, buyer_id) in expired {
        tracing::info!(order_id = %order_id, "unpaid order expired");
        let result = state
            .notifier
            .notify(
                buyer_id,
                "Your order expired before payment arrived. Start over any time.",
                serde_json::json!({ "order_id": order_id, "outcome": "expired" }),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(order_id = %order_id, error = %e, "expiry notice undelivered");
        }
    }
    Ok(())
}

async fn retry_provisioning(state: &AppState) -> Result<(), FlowError> {
    let due =
        order_repo::claim_provision_due(&state.pool, state.config.sweep_batch, ATTEMPT_LEASE_SECS)
            .await?;

    for order_id in due {
        tracing::info!(order_id = %order_id, "re-driving provisioning");
        if let Err(e) = order_flow::run_provisioning(state, order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "provisioning retry errored");
        }
    }
    Ok(())
}

async fn reconcile_side_effects(state: &AppState) -> Result<(), FlowError> {
    let pending = order_repo::unsettled_fulfilled(&state.pool, state.config.sweep_batch).await?;

    for order_id in pending {
        if let Err(e) = order_flow::reconcile_fulfilled(state, order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "settlement reconcile errored");
        }
    }
    Ok(())
}
