mod common;

use common::Harness;
use custody_server::CustodyError;
use custody_server::audit::AuditAction;
use custody_server::custody::{AdminCapability, CustodyService, CustodySettings, CustodyStorage};
use custody_server::escrow::EscrowReconciler;
use shared::custody::{Actor, ActorType, CardStatus, CustodyLane, OrderStatus, SellerTrustTier};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_listed_card_sold_once() {
    let h = Harness::new();
    let user_a = Actor::user("userA");
    let user_b = Actor::user("userB");
    let system = Actor::system("order-webhook");
    h.register("C1", CardStatus::Listed).await;

    let lane = h
        .service
        .determine_lane(SellerTrustTier::Standard, rust_decimal::Decimal::new(300, 0), 0)
        .unwrap();
    assert_eq!(lane.lane, CustodyLane::DirectShip);

    let (a, b) = tokio::join!(
        h.service.lock("C1", "O1", &user_a),
        h.service.lock("C1", "O2", &user_b),
    );
    // whichever arrives first wins, the other sees the holder
    let (winner, loser) = match (a, b) {
        (Ok(_), Err(e)) => ("O1", e),
        (Err(e), Ok(_)) => ("O2", e),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    match loser {
        CustodyError::AlreadyLocked { held_by, .. } => assert_eq!(held_by.as_deref(), Some(winner)),
        other => panic!("unexpected error: {:?}", other),
    }

    let card = h.service.card("C1").await.unwrap();
    assert_eq!(card.status, CardStatus::Locked);
    assert_eq!(card.locked_by_order_id.as_deref(), Some(winner));
    assert_eq!(card.lock_reason.as_deref(), Some("sale_pending"));

    h.orders.upsert(winner, OrderStatus::Completed, Some("buyer-9"));
    let receipt = h.service.complete_sale(winner, "E1", &system).await.unwrap();
    assert_eq!(receipt.card.status, CardStatus::Sold);
    assert_eq!(receipt.card.owner_id, "buyer-9");
    assert_eq!(receipt.seller_id, "seller-1");
    assert_eq!(h.ledger.released("E1"), 1);

    let err = h.service.unlock("C1", winner, None, &user_a).await.unwrap_err();
    assert!(matches!(err, CustodyError::NotLocked { status: CardStatus::Sold, .. }));

    let history = h.service.card_history("C1").await.unwrap();
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Intake, AuditAction::Lock, AuditAction::CompleteSale]
    );
    assert!(h.service.audit().verify_chain().await.unwrap().chain_intact);
}

#[tokio::test]
async fn test_completion_guards() {
    let h = Harness::new();
    let buyer = Actor::user("buyer-1");
    let system = Actor::system("order-webhook");
    h.register("C1", CardStatus::InVault).await;
    h.service.lock("C1", "O1", &buyer).await.unwrap();

    h.orders.upsert("O1", OrderStatus::Shipped, None);
    let err = h.service.complete_sale("O1", "E1", &system).await.unwrap_err();
    assert!(matches!(err, CustodyError::OrderNotFinalized { status: OrderStatus::Shipped, .. }));

    h.orders.upsert("O9", OrderStatus::Completed, None);
    let err = h.service.complete_sale("O9", "E9", &system).await.unwrap_err();
    assert!(matches!(err, CustodyError::NoMatchingLock { .. }));

    assert!(h.ledger.calls().is_empty());
    assert!(h.service.card("C1").await.unwrap().is_locked_by("O1"));
}

#[tokio::test]
async fn test_unlock_round_trip_and_ownership() {
    let h = Harness::new();
    let buyer = Actor::user("buyer-1");
    h.register("C1", CardStatus::Listed).await;
    h.service.lock("C1", "O1", &buyer).await.unwrap();

    let err = h.service.unlock("C1", "O2", None, &buyer).await.unwrap_err();
    assert!(matches!(err, CustodyError::NotLockHolder { .. }));
    assert!(h.service.card("C1").await.unwrap().is_locked_by("O1"));

    let receipt = h
        .service
        .unlock("C1", "O1", Some("buyer_cancelled"), &buyer)
        .await
        .unwrap();
    assert_eq!(receipt.restored_status, CardStatus::Listed);
    let card = h.service.card("C1").await.unwrap();
    assert_eq!(card.status, CardStatus::Listed);
    assert!(card.locked_at.is_none());
    assert!(card.lock_reason.is_none());
    assert!(card.locked_by_order_id.is_none());
}

#[tokio::test]
async fn test_audit_entries_match_state_changes() {
    let h = Harness::new();
    let buyer = Actor::user("buyer-1");
    h.register("C1", CardStatus::InVault).await;
    h.register("C2", CardStatus::Listed).await;

    h.service.lock("C1", "O1", &buyer).await.unwrap();
    h.service.unlock("C1", "O1", None, &buyer).await.unwrap();
    h.service.lock("C2", "O2", &buyer).await.unwrap();
    h.service.lock("C1", "O3", &buyer).await.unwrap();
    // rejected calls write nothing
    let _ = h.service.lock("C1", "O4", &buyer).await.unwrap_err();
    let _ = h.service.unlock("C2", "O9", None, &buyer).await.unwrap_err();

    let verification = h.service.audit().verify_chain().await.unwrap();
    assert!(verification.chain_intact);
    assert_eq!(verification.total_entries, 6);

    for card in ["C1", "C2"] {
        let history = h.service.card_history(card).await.unwrap();
        for pair in history.windows(2) {
            assert_eq!(pair[0].to_status, pair[1].from_status, "broken chain for {}", card);
        }
    }
}

#[tokio::test]
async fn test_release_failure_settled_by_reconciler() {
    let h = Harness::new();
    let buyer = Actor::user("buyer-1");
    h.register("C1", CardStatus::InVault).await;
    h.service.lock("C1", "O1", &buyer).await.unwrap();
    h.orders.upsert("O1", OrderStatus::Completed, Some("buyer-1"));
    let mut alerts = h.alerts.subscribe();

    h.ledger.fail_next(1);
    let err = h
        .service
        .complete_sale("O1", "E1", &Actor::system("order-webhook"))
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::EscrowReleaseFailed { .. }));
    assert_eq!(h.service.card("C1").await.unwrap().status, CardStatus::Sold);
    assert!(alerts.recv().await.unwrap().audit_entry_id.is_some());

    let reconciler = EscrowReconciler::new(
        h.storage.clone(),
        h.ledger.clone(),
        h.alerts.clone(),
        Duration::from_secs(30),
    );
    let pending = h.storage.pending_escrows().unwrap();
    assert_eq!(pending.len(), 1);

    let stats = reconciler.process_due(pending[0].next_attempt_at).await.unwrap();
    assert_eq!(stats.settled, 1);
    assert!(h.storage.pending_escrows().unwrap().is_empty());
    assert_eq!(h.ledger.released("E1"), 1);

    let last = h.service.card_history("C1").await.unwrap().pop().unwrap();
    assert_eq!(last.action, AuditAction::EscrowReconciled);
    assert!(h.service.audit().verify_chain().await.unwrap().chain_intact);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let h = Harness::new();
    h.register("C1", CardStatus::InVault).await;
    h.service.lock("C1", "O1", &Actor::user("buyer-1")).await.unwrap();
    let path = h.dir.path().join("custody.redb");
    let deps = h.collaborators();
    drop(h.service);
    drop(h.storage);

    let storage = Arc::new(CustodyStorage::open(&path).unwrap());
    let service = CustodyService::new(storage, deps, CustodySettings::default());
    assert!(service.card("C1").await.unwrap().is_locked_by("O1"));
    let verification = service.audit().verify_chain().await.unwrap();
    assert!(verification.chain_intact);
    assert_eq!(verification.total_entries, 2);
}

#[tokio::test]
async fn test_dead_payout_requeue_is_audited() {
    let h = Harness::new();
    h.register("C1", CardStatus::InVault).await;
    h.service.lock("C1", "O1", &Actor::user("buyer-1")).await.unwrap();
    h.orders.upsert("O1", OrderStatus::Completed, Some("buyer-1"));
    h.ledger.set_failing(true);
    let _ = h
        .service
        .complete_sale("O1", "E1", &Actor::system("order-webhook"))
        .await
        .unwrap_err();

    let reconciler = EscrowReconciler::new(
        h.storage.clone(),
        h.ledger.clone(),
        h.alerts.clone(),
        Duration::from_secs(30),
    );
    let mut now = shared::util::now_millis();
    for _ in 0..20 {
        if !reconciler.dead().await.unwrap().is_empty() {
            break;
        }
        now += 3_600_000;
        reconciler.process_due(now).await.unwrap();
    }
    assert_eq!(reconciler.dead().await.unwrap().len(), 1);

    let admin = AdminCapability::grant(&Actor::admin("ops-1")).unwrap();
    reconciler.requeue_dead(&admin, "O1").await.unwrap();

    let last = h.service.card_history("C1").await.unwrap().pop().unwrap();
    assert_eq!(last.action, AuditAction::RepairRequeueEscrow);
    assert_eq!(last.actor_id, "ops-1");
    assert_eq!(last.actor_type, ActorType::Admin);
    assert_eq!(last.metadata["escrow_id"], "E1");

    h.ledger.set_failing(false);
    let stats = reconciler.process_due(now + 3_600_000).await.unwrap();
    assert_eq!(stats.settled, 1);
    assert_eq!(h.ledger.released("E1"), 1);
    assert!(h.service.audit().verify_chain().await.unwrap().chain_intact);
}
