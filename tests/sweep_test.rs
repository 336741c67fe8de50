mod common;

use common::*;
use keyshop::domain::event::Provider;
use keyshop::services::ingress::{self, IngestOutcome};
use keyshop::services::sweeper;

const DB: &str = "keyshop_test_sweep";

// One sequential scenario exercises every sweep: the sweeps scan the whole
// ledger, so driving them from parallel tests would let one test's pass
// pick up another's orders.

#[tokio::test]
async fn sweeps_recover_every_stalled_path() {
    use PanelScript::*;
    let panel = FakePanel::with_script(vec![Unreachable]);
    let h = setup_harness(DB, panel, test_config()).await;
    seed_buyer(&h.state.pool, 3101, Some(950)).await;

    // ── expiry: stale unpaid orders die, fresh and paid ones survive ──
    let stale_unpaid = make_order(&h.state.pool, 3101, "sw-stale").await;
    backdate_order(&h.state.pool, stale_unpaid.id, 3_600).await;

    let fresh_unpaid = make_order(&h.state.pool, 3101, "sw-fresh").await;

    // The paid order's first provisioning attempt fails on the scripted
    // outage, parking it in `provisioning` for the retry sweep.
    let paid = make_order(&h.state.pool, 3101, "sw-paid").await;
    let (body, headers) = yookassa_delivery(paid.id, "tx-sw-1", "500.00");
    let outcome = ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Confirmed(_)));
    assert_eq!(order_state(&h.state.pool, paid.id).await, "provisioning");
    backdate_order(&h.state.pool, paid.id, 3_600).await;

    sweeper::sweep_once(&h.state).await.unwrap();

    assert_eq!(order_state(&h.state.pool, stale_unpaid.id).await, "expired");
    assert_eq!(order_state(&h.state.pool, fresh_unpaid.id).await, "awaiting_payment");

    // The retry sweep in the same pass re-drove provisioning; the script
    // ran dry, so the second attempt succeeded.
    assert_eq!(order_state(&h.state.pool, paid.id).await, "fulfilled");
    assert_eq!(h.panel.call_count(), 2);
    assert_eq!(count_provisioning_records(&h.state.pool, paid.id).await, 1);
    assert_eq!(count_credits_for(&h.state.pool, 950).await, 1);

    let messages = h.notifier.messages_for(3101);
    assert!(messages.iter().any(|m| m.contains("expired")));
    assert!(messages.iter().any(|m| m.contains("panel.test/sub/")));

    // ── late payment for the expired order is held, not resurrected ──
    let (body, headers) = yookassa_delivery(stale_unpaid.id, "tx-sw-late", "500.00");
    let outcome = ingress::ingest(&h.state, Provider::Yookassa, body.as_bytes(), &headers)
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Orphaned));
    assert_eq!(order_state(&h.state.pool, stale_unpaid.id).await, "expired");

    // ── settlement sweep is idempotent ──
    sqlx::query("UPDATE orders SET settled = false WHERE id = $1")
        .bind(paid.id)
        .execute(&h.state.pool)
        .await
        .unwrap();
    sweeper::sweep_once(&h.state).await.unwrap();
    assert_eq!(count_credits_for(&h.state.pool, 950).await, 1);

    // A further pass with nothing due changes nothing.
    let calls_before = h.panel.call_count();
    sweeper::sweep_once(&h.state).await.unwrap();
    assert_eq!(h.panel.call_count(), calls_before);
}
