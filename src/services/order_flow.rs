use {
    crate::AppState,
    crate::domain::error::FlowError,
    crate::domain::event::{CanonicalEvent, EventStatus, OrderRef},
    crate::domain::order::{NewOrder, Order, OrderKind, OrderState},
    crate::domain::provisioning::{IssueRequest, NewProvisioningRecord, ProvisionError},
    crate::infra::postgres::{
        event_repo, host_repo, order_repo, provisioning_repo, referral_repo,
    },
    uuid::Uuid,
};

#[derive(Debug)]
pub enum ConfirmOutcome {
    /// Payment accepted; the order moved into `provisioning`.
    Confirmed(Uuid),
    /// This (provider, tx_id) was already absorbed; redelivery is a no-op.
    Duplicate,
    /// Amount outside tolerance; order untouched, event held for review.
    AmountMismatch(Uuid),
    /// No resolvable order; event held for manual reconciliation.
    Orphaned,
}

/// Register a purchase intent. Resubmitting the same (buyer, plan, nonce)
/// returns the order already created for it.
pub async fn create_order(state: &AppState, order: &NewOrder) -> Result<(Order, bool), FlowError> {
    let (order, created) = order_repo::insert(&state.pool, order).await?;
    if created {
        tracing::info!(order_id = %order.id, buyer_id = order.buyer_id, host_id = %order.host_id, "order created");
    } else {
        tracing::info!(order_id = %order.id, "order resubmission absorbed by idempotency key");
    }
    Ok((order, created))
}

/// Apply one canonical payment event: dedup, per-order advisory lock, then
/// the state transition. Everything here commits atomically — including the
/// scheduling of the provisioning attempt — so a crash right after this
/// function is recovered by the sweep re-reading ledger state.
pub async fn confirm_payment(
    state: &AppState,
    order_ref: &OrderRef,
    event: &CanonicalEvent,
    payload_hash: &str,
) -> Result<ConfirmOutcome, FlowError> {
    let mut tx = state.pool.begin().await?;

    sqlx::query("SET LOCAL lock_timeout = '5s'")
        .execute(&mut *tx)
        .await?;

    // Resolve before locking. Reference correlation needs a read, and the
    // state checks are re-done under the lock anyway.
    let resolved = match order_ref {
        OrderRef::ById(id) => order_repo::get(&mut tx, *id).await?,
        OrderRef::ByPaymentRef(reference) => {
            order_repo::find_awaiting_by_reference(&mut tx, reference).await?
        }
    };

    let Some(order) = resolved else {
        // Keep the event; a human sorts it out. Dedup still applies so the
        // provider retrying an orphan does not grow the review queue.
        let inserted = event_repo::insert(&mut tx, event, payload_hash).await?;
        if !inserted {
            tx.commit().await?;
            return Ok(ConfirmOutcome::Duplicate);
        }
        event_repo::set_status(&mut tx, event, EventStatus::Orphaned, None).await?;
        tx.commit().await?;
        tracing::warn!(
            provider = %event.provider,
            tx_id = %event.tx_id,
            "payment event resolves to no order, held as orphaned"
        );
        return Ok(ConfirmOutcome::Orphaned);
    };

    // Serialize every transition for this order. Duplicate deliveries and
    // racing sweeps queue here and then observe whatever won.
    order_repo::lock_order(&mut tx, order.id).await?;

    let inserted = event_repo::insert(&mut tx, event, payload_hash).await?;
    if !inserted {
        tx.commit().await?;
        return Ok(ConfirmOutcome::Duplicate);
    }

    // Re-read now that we hold the lock; the pre-lock snapshot may be stale.
    let order = order_repo::get(&mut tx, order.id)
        .await?
        .ok_or(FlowError::OrderNotFound(order.id))?;

    if order.state.is_paid() {
        if order.payment_tx_id.as_deref() == Some(event.tx_id.as_str()) {
            // The provider redelivered the transaction that already paid
            // this order, under a fresh delivery id. Absorb it.
            event_repo::set_status(&mut tx, event, EventStatus::Processed, Some(order.id)).await?;
            tx.commit().await?;
            return Ok(ConfirmOutcome::Duplicate);
        }
        // A *different* transaction against a paid order is money without
        // an order, never auto-resolved.
        event_repo::set_status(&mut tx, event, EventStatus::Orphaned, Some(order.id)).await?;
        tx.commit().await?;
        tracing::warn!(
            order_id = %order.id,
            tx_id = %event.tx_id,
            "second distinct payment for an already-paid order, held as orphaned"
        );
        return Ok(ConfirmOutcome::Orphaned);
    }

    if order.state.is_terminal() {
        event_repo::set_status(&mut tx, event, EventStatus::Orphaned, Some(order.id)).await?;
        tx.commit().await?;
        tracing::warn!(
            order_id = %order.id,
            state = %order.state,
            "payment arrived for a terminal order, held as orphaned"
        );
        return Ok(ConfirmOutcome::Orphaned);
    }

    if !event
        .money
        .matches_within(&order.amount, state.config.amount_tolerance_minor)
    {
        event_repo::set_status(&mut tx, event, EventStatus::Mismatch, Some(order.id)).await?;
        tx.commit().await?;
        tracing::warn!(
            order_id = %order.id,
            expected = %order.amount,
            received = %event.money,
            "amount mismatch, order left awaiting payment"
        );
        return Ok(ConfirmOutcome::AmountMismatch(order.id));
    }

    let advanced = order_repo::confirm_payment(
        &mut tx,
        order.id,
        event.provider.as_str(),
        event.tx_id.as_str(),
    )
    .await?;
    if !advanced {
        // Unreachable under the lock, but never guess: hold for review.
        event_repo::set_status(&mut tx, event, EventStatus::Orphaned, Some(order.id)).await?;
        tx.commit().await?;
        return Ok(ConfirmOutcome::Orphaned);
    }

    event_repo::set_status(&mut tx, event, EventStatus::Processed, Some(order.id)).await?;
    tx.commit().await?;

    tracing::info!(
        order_id = %order.id,
        provider = %event.provider,
        tx_id = %event.tx_id,
        "payment confirmed, provisioning scheduled"
    );
    Ok(ConfirmOutcome::Confirmed(order.id))
}

/// One provisioning attempt for an order in `provisioning`. Invoked
/// synchronously after confirmation and again by the retry sweep. The
/// remote call happens outside any transaction; the fulfillment write is a
/// compare-and-set, and the panel-side client reference makes the remote
/// call itself converge, so replays cannot double-issue.
pub async fn run_provisioning(state: &AppState, order_id: Uuid) -> Result<(), FlowError> {
    let Some(order) = order_repo::get_pool(&state.pool, order_id).await? else {
        return Err(FlowError::OrderNotFound(order_id));
    };
    if !matches!(
        order.state,
        OrderState::PaymentConfirmed | OrderState::Provisioning
    ) {
        return Ok(());
    }

    // Point of no return for the buyer: once provisioning starts, the
    // in-flight remote call runs to completion or timeout.
    if !order_repo::begin_provisioning(&state.pool, order_id).await? {
        return Ok(());
    }

    let Some(host) = state.hosts.get(&order.host_id) else {
        tracing::error!(order_id = %order.id, host_id = %order.host_id, "order references an unconfigured host");
        fail_order(state, &order, "selected server is not available").await?;
        return Ok(());
    };

    let request = IssueRequest {
        client_ref: order.idempotency_key.as_str().to_string(),
        label: format!("buyer-{}", order.buyer_id),
        days: order.plan_days,
        renew_ref: match order.kind {
            OrderKind::Extend => order.renew_ref.clone(),
            OrderKind::New => None,
        },
    };

    match host.issue_credential(&request).await {
        Ok(credential) => {
            let mut tx = state.pool.begin().await?;
            order_repo::lock_order(&mut tx, order.id).await?;

            let fulfilled = order_repo::mark_fulfilled(&mut tx, order.id).await?;
            if !fulfilled {
                // Lost the race to a concurrent attempt; the credential on
                // the panel is the same one either way.
                tx.commit().await?;
                return Ok(());
            }
            let record = NewProvisioningRecord::from_credential(order.id, &order.host_id, &credential);
            provisioning_repo::insert(&mut tx, &record).await?;
            tx.commit().await?;

            tracing::info!(
                order_id = %order.id,
                host_id = %order.host_id,
                client_ref = %credential.client_ref,
                "order fulfilled"
            );

            // Financial and messaging side effects reconcile independently;
            // the sweep re-drives whichever of them fails here.
            if let Err(e) = settle(state, order.id).await {
                tracing::error!(order_id = %order.id, error = %e, "settlement failed, sweep will retry");
            }
            if let Err(e) = notify_fulfilled(state, &order, &credential.access_url, &credential.expires_at).await {
                tracing::warn!(order_id = %order.id, error = %e, "notification failed, sweep will retry");
            }
            Ok(())
        }
        Err(e) => {
            handle_provision_failure(state, &order, e).await?;
            Ok(())
        }
    }
}

async fn handle_provision_failure(
    state: &AppState,
    order: &Order,
    error: ProvisionError,
) -> Result<(), FlowError> {
    let attempt = order.provisioning_attempts;

    if error.is_retryable() && attempt + 1 < state.config.max_provision_attempts {
        let delay = state.config.backoff_for_attempt(attempt);
        let mut tx = state.pool.begin().await?;
        order_repo::lock_order(&mut tx, order.id).await?;
        order_repo::schedule_retry(&mut tx, order.id, delay.as_secs() as i64).await?;
        tx.commit().await?;
        tracing::warn!(
            order_id = %order.id,
            attempt = attempt + 1,
            delay_secs = delay.as_secs(),
            error = %error,
            "provisioning attempt failed, retry scheduled"
        );
        return Ok(());
    }

    if let ProvisionError::AuthFailed(_) = &error {
        host_repo::mark_unhealthy(&state.pool, &order.host_id).await?;
        tracing::error!(host_id = %order.host_id, "panel auth failed, host taken out of rotation");
    }

    tracing::error!(
        order_id = %order.id,
        attempts = attempt + 1,
        error = %error,
        "provisioning failed terminally, order moved to failed"
    );
    fail_order(state, order, "we could not set up your access").await
}

/// Terminal failure: refund-eligible flag for the operator queue plus an
/// explicit buyer notice. Funds are never kept silently.
async fn fail_order(state: &AppState, order: &Order, reason: &str) -> Result<(), FlowError> {
    let mut tx = state.pool.begin().await?;
    order_repo::lock_order(&mut tx, order.id).await?;
    let failed = order_repo::mark_failed(&mut tx, order.id).await?;
    tx.commit().await?;
    if !failed {
        return Ok(());
    }

    let message = format!(
        "Your payment for order {} went through, but {reason}. \
         Support has been alerted; you will be helped with a replacement or a refund.",
        order.id
    );
    let result = state
        .notifier
        .notify(
            order.buyer_id,
            &message,
            serde_json::json!({ "order_id": order.id, "outcome": "failed" }),
        )
        .await;
    match result {
        Ok(()) => order_repo::set_notified(&state.pool, order.id).await?,
        Err(e) => {
            tracing::warn!(order_id = %order.id, error = %e, "failure notice undelivered, sweep will retry")
        }
    }
    Ok(())
}

/// Credit the referrer for a fulfilled order. Every path is a no-op on
/// replay: credits are keyed by (order, kind) and the signup bonus by
/// buyer, and the `settled` flag stops the sweep from revisiting.
pub async fn settle(state: &AppState, order_id: Uuid) -> Result<(), FlowError> {
    let Some(order) = order_repo::get_pool(&state.pool, order_id).await? else {
        return Err(FlowError::OrderNotFound(order_id));
    };
    if order.state != OrderState::Fulfilled {
        return Ok(());
    }

    let referrer = referral_repo::referrer_of(&state.pool, order.buyer_id).await?;
    if let Some(referrer_id) = referrer {
        let credits = state.config.referral.credits_for(referrer_id, &order);
        let mut tx = state.pool.begin().await?;
        for credit in &credits {
            let written = referral_repo::insert_credit(&mut tx, credit).await?;
            if written {
                tracing::info!(
                    order_id = %order.id,
                    referrer_id,
                    kind = %credit.kind,
                    amount = credit.amount.minor(),
                    "referral credit settled"
                );
            }
        }
        tx.commit().await?;
    }

    order_repo::set_settled(&state.pool, order_id).await?;
    Ok(())
}

async fn notify_fulfilled(
    state: &AppState,
    order: &Order,
    access_url: &str,
    expires_at: &chrono::DateTime<chrono::Utc>,
) -> Result<(), FlowError> {
    let message = format!(
        "Your access is ready. Connect via: {access_url} (valid until {})",
        expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    state
        .notifier
        .notify(
            order.buyer_id,
            &message,
            serde_json::json!({
                "order_id": order.id,
                "outcome": "fulfilled",
                "access_url": access_url,
            }),
        )
        .await?;
    order_repo::set_notified(&state.pool, order.id).await?;
    Ok(())
}

/// Re-drive settlement and notification for a fulfilled order the sweep
/// found with pending side effects.
pub async fn reconcile_fulfilled(state: &AppState, order_id: Uuid) -> Result<(), FlowError> {
    let Some(order) = order_repo::get_pool(&state.pool, order_id).await? else {
        return Err(FlowError::OrderNotFound(order_id));
    };
    if order.state != OrderState::Fulfilled {
        return Ok(());
    }

    if !order.settled {
        settle(state, order_id).await?;
    }
    if !order.notified {
        let Some(record) = provisioning_repo::get_live_by_order(&state.pool, order_id).await?
        else {
            // Fulfilled without a live record would be a broken invariant;
            // leave it for an operator rather than inventing a message.
            tracing::error!(order_id = %order_id, "fulfilled order has no live provisioning record");
            return Ok(());
        };
        notify_fulfilled(state, &order, &record.access_url, &record.expires_at).await?;
    }
    Ok(())
}

/// Manual operator action: refund a fulfilled order. The remote credential
/// is withdrawn first; the ledger keeps the order for audit.
pub async fn refund_order(state: &AppState, order_id: Uuid) -> Result<bool, FlowError> {
    let Some(order) = order_repo::get_pool(&state.pool, order_id).await? else {
        return Err(FlowError::OrderNotFound(order_id));
    };
    if order.state != OrderState::Fulfilled {
        return Ok(false);
    }

    if let Some(record) = provisioning_repo::get_live_by_order(&state.pool, order_id).await? {
        if let Some(host) = state.hosts.get(&record.host_id) {
            host.revoke_credential(&record.client_ref)
                .await
                .map_err(FlowError::from)?;
        }
        provisioning_repo::revoke(&state.pool, order_id).await?;
    }

    let refunded = order_repo::mark_refunded(&state.pool, order_id).await?;
    if refunded {
        tracing::info!(order_id = %order_id, "order refunded, credential revoked");
        let _ = state
            .notifier
            .notify(
                order.buyer_id,
                "Your order was refunded and the access key deactivated.",
                serde_json::json!({ "order_id": order_id, "outcome": "refunded" }),
            )
            .await;
    }
    Ok(refunded)
}
