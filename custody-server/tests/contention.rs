mod common;

use common::Harness;
use custody_server::CustodyError;
use shared::custody::{Actor, CardStatus};
use std::collections::HashMap;
use std::sync::Arc;

const CARDS: usize = 6;
const ORDERS_PER_CARD: usize = 12;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_storm_has_one_winner_per_card() {
    let h = Harness::new();
    for c in 0..CARDS {
        h.register(&format!("C{c}"), CardStatus::Listed).await;
    }
    let service = Arc::new(h.service);

    let mut handles = Vec::new();
    for c in 0..CARDS {
        for o in 0..ORDERS_PER_CARD {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let card = format!("C{c}");
                let order = format!("O{c}-{o}");
                let result = service.lock(&card, &order, &Actor::user(format!("buyer-{o}"))).await;
                (card, order, result)
            }));
        }
    }

    let mut winners: HashMap<String, String> = HashMap::new();
    let mut losers = Vec::new();
    for handle in handles {
        let (card, order, result) = handle.await.unwrap();
        match result {
            Ok(receipt) => {
                assert_eq!(receipt.card.locked_by_order_id.as_deref(), Some(order.as_str()));
                assert!(winners.insert(card, order).is_none(), "two winners for one card");
            }
            Err(CustodyError::AlreadyLocked { held_by, .. }) => losers.push((card, held_by)),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners.len(), CARDS);
    assert_eq!(losers.len(), CARDS * (ORDERS_PER_CARD - 1));
    for (card, held_by) in losers {
        assert_eq!(held_by.as_ref(), winners.get(&card));
    }

    for (card, order) in &winners {
        let stored = service.card(card).await.unwrap();
        assert_eq!(stored.status, CardStatus::Locked);
        assert!(stored.is_locked_by(order));
        // intake + the winning lock only
        assert_eq!(service.card_history(card).await.unwrap().len(), 2);
    }
    assert!(service.audit().verify_chain().await.unwrap().chain_intact);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_unlocks_restore_once() {
    let h = Harness::new();
    let buyer = Actor::user("buyer-1");
    h.register("C1", CardStatus::InVault).await;
    h.service.lock("C1", "O1", &buyer).await.unwrap();
    let service = Arc::new(h.service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let buyer = buyer.clone();
        handles.push(tokio::spawn(async move {
            service.unlock("C1", "O1", Some("buyer_cancelled"), &buyer).await
        }));
    }

    let mut released = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                released += 1;
                assert_eq!(receipt.restored_status, CardStatus::InVault);
            }
            Err(CustodyError::NotLocked { .. }) | Err(CustodyError::NotLockHolder { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(released, 1);
    assert_eq!(service.card("C1").await.unwrap().status, CardStatus::InVault);
    assert_eq!(service.card_history("C1").await.unwrap().len(), 3);
}
