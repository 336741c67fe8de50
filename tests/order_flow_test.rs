mod common;

use common::*;
use keyshop::domain::event::{OrderRef, Provider};
use keyshop::infra::postgres::referral_repo;
use keyshop::services::ingress::{self, IngestOutcome};
use keyshop::services::order_flow::{self, ConfirmOutcome};
use uuid::Uuid;

const DB: &str = "keyshop_test_flow";

// ── 1. duplicate delivery of the same transaction ──────────────────────────
// The same (provider, tx_id) delivered twice: exactly one transition, one
// provisioning record, and both deliveries are acknowledged.

#[tokio::test]
async fn duplicate_delivery_fulfills_exactly_once() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1101, None).await;
    let order = make_order(&h.state.pool, 1101, "o1-nonce").await;

    let (body, headers) = yookassa_delivery(order.id, "tx-001", "500.00");

    let first = ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();
    assert!(matches!(first, IngestOutcome::Confirmed(id) if id == order.id));

    let second = ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();
    assert!(matches!(second, IngestOutcome::Duplicate));

    assert_eq!(order_state(&h.state.pool, order.id).await, "fulfilled");
    assert_eq!(count_provisioning_records(&h.state.pool, order.id).await, 1);
    assert_eq!(count_events(&h.state.pool, "yookassa", "tx-001").await, 1);
    assert_eq!(h.panel.live_credentials(), 1);
}

// ── 2. amount mismatch is held, never confirmed ────────────────────────────

#[tokio::test]
async fn amount_mismatch_leaves_order_awaiting() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1102, None).await;
    let order = make_order_with(&h.state.pool, 1102, "o2-nonce", 1_000).await;

    // Expected 10.00, received 9.50 — beyond the zero tolerance.
    let (body, headers) = yookassa_delivery(order.id, "tx-mismatch", "9.50");
    let outcome = ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();

    assert!(matches!(outcome, IngestOutcome::AmountMismatch(id) if id == order.id));
    assert_eq!(order_state(&h.state.pool, order.id).await, "awaiting_payment");
    assert_eq!(
        event_status(&h.state.pool, "yookassa", "tx-mismatch").await,
        Some("mismatch".to_string())
    );
    assert_eq!(h.panel.call_count(), 0);
}

// ── 3. unreachable host: bounded retries, then success ─────────────────────
// Three transport failures, success on the fourth attempt. The referred
// buyer's referrer is credited exactly once.

#[tokio::test]
async fn retries_through_outage_then_settles_referral() {
    use PanelScript::*;
    let panel = FakePanel::with_script(vec![Unreachable, Unreachable, Unreachable]);
    let h = setup_harness(DB, panel, test_config()).await;
    seed_buyer(&h.state.pool, 1103, Some(900)).await;
    let order = make_order(&h.state.pool, 1103, "o3-nonce").await;

    let (body, headers) = yookassa_delivery(order.id, "tx-o3", "500.00");
    ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();

    // Attempt 1 failed inline; the order is parked in provisioning with a
    // retry scheduled.
    assert_eq!(order_state(&h.state.pool, order.id).await, "provisioning");

    for _ in 0..3 {
        order_flow::run_provisioning(&h.state, order.id).await.unwrap();
    }

    assert_eq!(order_state(&h.state.pool, order.id).await, "fulfilled");
    assert_eq!(h.panel.call_count(), 4);
    assert_eq!(count_provisioning_records(&h.state.pool, order.id).await, 1);

    // 10% of 500.00, settled once.
    assert_eq!(count_credits_for(&h.state.pool, 900).await, 1);
    assert_eq!(referral_repo::balance(&h.state.pool, 900).await.unwrap(), 5_000);

    let messages = h.notifier.messages_for(1103);
    assert!(messages.iter().any(|m| m.contains("panel.test/sub/")));
}

// ── 4. host rejects the plan: terminal failure ─────────────────────────────

#[tokio::test]
async fn host_rejection_fails_order_with_review_flag() {
    let panel = FakePanel::with_script(vec![PanelScript::Rejected]);
    let h = setup_harness(DB, panel, test_config()).await;
    seed_buyer(&h.state.pool, 1104, Some(901)).await;
    let order = make_order(&h.state.pool, 1104, "o4-nonce").await;

    let (body, headers) = yookassa_delivery(order.id, "tx-o4", "500.00");
    ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();

    assert_eq!(order_state(&h.state.pool, order.id).await, "failed");
    assert!(refund_eligible(&h.state.pool, order.id).await);
    assert_eq!(count_provisioning_records(&h.state.pool, order.id).await, 0);
    assert_eq!(count_credits_for(&h.state.pool, 901).await, 0);

    // The buyer hears about the failure explicitly.
    let messages = h.notifier.messages_for(1104);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("refund"));
}

// ── 5. auth failure benches the host ───────────────────────────────────────

#[tokio::test]
async fn auth_failure_marks_host_unhealthy() {
    use keyshop::infra::postgres::host_repo::{self, HostRow};

    let panel = FakePanel::with_script(vec![PanelScript::AuthFailed]);
    let h = setup_harness(DB, panel, test_config()).await;
    seed_buyer(&h.state.pool, 1105, None).await;

    // This test owns its host row; nothing else writes it.
    host_repo::upsert(
        &h.state.pool,
        &HostRow {
            host_id: AUTH_TEST_HOST.to_string(),
            panel_kind: "remnawave".to_string(),
            base_url: "https://panel2.test".to_string(),
            panel_user: "admin".to_string(),
            panel_pass: "token".to_string(),
            inbound_id: 1,
            max_concurrent: 4,
            healthy: true,
        },
    )
    .await
    .unwrap();
    let order = make_order_on(&h.state.pool, 1105, "o5-nonce", 50_000, AUTH_TEST_HOST).await;

    let (body, headers) = yookassa_delivery(order.id, "tx-o5", "500.00");
    ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();

    assert_eq!(order_state(&h.state.pool, order.id).await, "failed");
    let healthy: bool = sqlx::query_scalar("SELECT healthy FROM hosts WHERE host_id = $1")
        .bind(AUTH_TEST_HOST)
        .fetch_one(&h.state.pool)
        .await
        .unwrap();
    assert!(!healthy);
}

// ── 6. unresolvable events go to the review queue ──────────────────────────

#[tokio::test]
async fn unknown_order_is_held_as_orphan() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;

    let (body, headers) = yookassa_delivery(Uuid::now_v7(), "tx-orphan", "500.00");
    let outcome = ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();

    assert!(matches!(outcome, IngestOutcome::Orphaned));
    assert_eq!(
        event_status(&h.state.pool, "yookassa", "tx-orphan").await,
        Some("orphaned".to_string())
    );
}

// ── 7. bad signature: rejected and recorded ────────────────────────────────

#[tokio::test]
async fn tampered_body_is_rejected_and_recorded() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1107, None).await;
    let order = make_order(&h.state.pool, 1107, "o7-nonce").await;

    let (body, headers) = yookassa_delivery(order.id, "tx-o7", "500.00");
    let tampered = body.replace("500.00", "1.00");

    let result =
        ingress::ingest(&h.state, Provider::Yookassa, tampered.as_bytes(), &headers).await;
    assert!(result.is_err());

    let rejected: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payment_events WHERE provider = 'yookassa' AND status = 'rejected'",
    )
    .fetch_one(&h.state.pool)
    .await
    .unwrap();
    assert!(rejected >= 1);
    assert_eq!(order_state(&h.state.pool, order.id).await, "awaiting_payment");
}

// ── 8. order creation is idempotent per nonce ──────────────────────────────

#[tokio::test]
async fn order_resubmission_returns_existing_order() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1108, None).await;

    let first = make_order(&h.state.pool, 1108, "same-nonce").await;
    let second = make_order(&h.state.pool, 1108, "same-nonce").await;
    assert_eq!(first.id, second.id);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE buyer_id = 1108")
        .fetch_one(&h.state.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

// ── 9. reference correlation (transfer-comment providers) ──────────────────

#[tokio::test]
async fn payment_reference_correlates_to_awaiting_order() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1109, None).await;
    let order = make_order(&h.state.pool, 1109, "o9-nonce").await;

    let event = make_event("ton-tx-9", 50_000);
    let order_ref = OrderRef::ByPaymentRef(order.idempotency_key.as_str().to_string());
    let outcome = order_flow::confirm_payment(&h.state, &order_ref, &event, "hash-9")
        .await
        .unwrap();

    assert!(matches!(outcome, ConfirmOutcome::Confirmed(id) if id == order.id));

    // An unknown reference fails closed.
    let stray = make_event("ton-tx-stray", 50_000);
    let outcome = order_flow::confirm_payment(
        &h.state,
        &OrderRef::ByPaymentRef("no-such-reference".to_string()),
        &stray,
        "hash-stray",
    )
    .await
    .unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Orphaned));
}

// ── 10. signup bonus fires once per referred buyer ─────────────────────────

#[tokio::test]
async fn signup_bonus_settles_once_across_orders() {
    let mut config = test_config();
    config.referral.signup_bonus_minor = 10_000;
    let h = setup_harness(DB, FakePanel::ok(), config).await;
    seed_buyer(&h.state.pool, 1110, Some(902)).await;

    for (nonce, tx) in [("o10-a", "tx-o10-a"), ("o10-b", "tx-o10-b")] {
        let order = make_order(&h.state.pool, 1110, nonce).await;
        let (body, headers) = yookassa_delivery(order.id, tx, "500.00");
        ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
            .await
            .unwrap();
        assert_eq!(order_state(&h.state.pool, order.id).await, "fulfilled");
    }

    // Two percentage credits, one signup bonus.
    assert_eq!(count_credits_for(&h.state.pool, 902).await, 3);
    let bonus_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM referral_credits WHERE referrer_id = 902 AND kind = 'signup_bonus'",
    )
    .fetch_one(&h.state.pool)
    .await
    .unwrap();
    assert_eq!(bonus_count, 1);
}

// ── 11. settlement retry never double-credits ──────────────────────────────

#[tokio::test]
async fn sweep_resettlement_is_a_noop() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1111, Some(903)).await;
    let order = make_order(&h.state.pool, 1111, "o11-nonce").await;

    let (body, headers) = yookassa_delivery(order.id, "tx-o11", "500.00");
    ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();
    assert_eq!(count_credits_for(&h.state.pool, 903).await, 1);

    // Pretend the settled flag write was lost; the reconcile pass re-drives
    // settlement and the ledger's uniqueness keys absorb it.
    sqlx::query("UPDATE orders SET settled = false WHERE id = $1")
        .bind(order.id)
        .execute(&h.state.pool)
        .await
        .unwrap();
    order_flow::reconcile_fulfilled(&h.state, order.id).await.unwrap();

    assert_eq!(count_credits_for(&h.state.pool, 903).await, 1);
    let settled: bool = sqlx::query_scalar("SELECT settled FROM orders WHERE id = $1")
        .bind(order.id)
        .fetch_one(&h.state.pool)
        .await
        .unwrap();
    assert!(settled);
}

// ── 12. refund revokes the credential ──────────────────────────────────────

#[tokio::test]
async fn refund_revokes_credential_and_is_terminal() {
    let h = setup_harness(DB, FakePanel::ok(), test_config()).await;
    seed_buyer(&h.state.pool, 1114, None).await;
    let order = make_order(&h.state.pool, 1114, "o14-nonce").await;

    let (body, headers) = yookassa_delivery(order.id, "tx-o14", "500.00");
    ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();
    assert_eq!(order_state(&h.state.pool, order.id).await, "fulfilled");

    let refunded = order_flow::refund_order(&h.state, order.id).await.unwrap();
    assert!(refunded);
    assert_eq!(order_state(&h.state.pool, order.id).await, "refunded");
    assert_eq!(count_provisioning_records(&h.state.pool, order.id).await, 0);
    assert_eq!(h.panel.live_credentials(), 0);

    // A second refund attempt is rejected, not repeated.
    assert!(!order_flow::refund_order(&h.state, order.id).await.unwrap());
}
