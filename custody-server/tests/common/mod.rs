//! Shared harness for integration tests: on-disk redb + in-memory collaborators

#![allow(dead_code)]

use custody_server::custody::{Collaborators, CustodyService, CustodySettings, CustodyStorage};
use custody_server::external::{BroadcastAlertSink, InMemoryLedgerService, InMemoryOrderService};
use rust_decimal::Decimal;
use shared::custody::{Actor, CardStatus, NewCard};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub storage: Arc<CustodyStorage>,
    pub orders: Arc<InMemoryOrderService>,
    pub ledger: Arc<InMemoryLedgerService>,
    pub alerts: Arc<BroadcastAlertSink>,
    pub service: CustodyService,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(CustodyStorage::open(dir.path().join("custody.redb")).unwrap());
        let orders = Arc::new(InMemoryOrderService::new());
        let ledger = Arc::new(InMemoryLedgerService::new());
        let alerts = Arc::new(BroadcastAlertSink::default());
        let deps = Collaborators {
            orders: orders.clone(),
            ledger: ledger.clone(),
            alerts: alerts.clone(),
        };
        let service = CustodyService::new(storage.clone(), deps, CustodySettings::default());

        Self {
            dir,
            storage,
            orders,
            ledger,
            alerts,
            service,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            orders: self.orders.clone(),
            ledger: self.ledger.clone(),
            alerts: self.alerts.clone(),
        }
    }

    pub async fn register(&self, id: &str, status: CardStatus) {
        self.service
            .register_card(
                NewCard {
                    id: id.to_string(),
                    owner_id: "seller-1".to_string(),
                    declared_value: Decimal::new(300, 0),
                    status,
                },
                &Actor::system("intake"),
            )
            .await
            .unwrap();
    }
}
