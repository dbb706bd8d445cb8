//! Test fixture wiring the custody components over in-memory backends

use rust_decimal::Decimal;
use shared::custody::{Actor, CardInstance, CardStatus};
use std::sync::Arc;

use super::capability::AdminCapability;
use super::completion::SaleCompletionCoordinator;
use super::integrity::{DEFAULT_STALE_LOCK_TIMEOUT_MS, IntegrityAuditor};
use super::lock::LockManager;
use super::repair::RepairExecutor;
use super::storage::CustodyStorage;
use super::store::{CardUpdate, Expected};
use crate::audit::{AuditAction, AuditDraft};
use crate::external::{BroadcastAlertSink, InMemoryLedgerService, InMemoryOrderService};

pub(crate) struct Fixture {
    pub storage: Arc<CustodyStorage>,
    pub orders: Arc<InMemoryOrderService>,
    pub ledger: Arc<InMemoryLedgerService>,
    pub alerts: Arc<BroadcastAlertSink>,
    pub locks: LockManager,
    pub completion: SaleCompletionCoordinator,
    pub auditor: IntegrityAuditor,
    pub repair: RepairExecutor,
    pub buyer: Actor,
    pub system: Actor,
    pub admin: Actor,
}

impl Fixture {
    pub fn new() -> Self {
        let storage = Arc::new(CustodyStorage::open_in_memory().unwrap());
        let orders = Arc::new(InMemoryOrderService::new());
        let ledger = Arc::new(InMemoryLedgerService::new());
        let alerts = Arc::new(BroadcastAlertSink::default());

        let locks = LockManager::new(storage.clone());
        let completion = SaleCompletionCoordinator::new(
            storage.clone(),
            storage.clone(),
            orders.clone(),
            ledger.clone(),
            alerts.clone(),
            locks.clone(),
        );
        let auditor =
            IntegrityAuditor::new(storage.clone(), orders.clone(), DEFAULT_STALE_LOCK_TIMEOUT_MS);
        let repair = RepairExecutor::new(storage.clone(), orders.clone(), locks.clone(), auditor.clone());

        Self {
            storage,
            orders,
            ledger,
            alerts,
            locks,
            completion,
            auditor,
            repair,
            buyer: Actor::user("buyer-1"),
            system: Actor::system("order-webhook"),
            admin: Actor::admin("ops-1"),
        }
    }

    pub fn admin_cap(&self) -> AdminCapability {
        AdminCapability::grant(&self.admin).unwrap()
    }

    /// Insert a card owned by `seller-1`
    pub fn intake(&self, id: &str, status: CardStatus) -> CardInstance {
        let card = CardInstance {
            id: id.to_string(),
            owner_id: "seller-1".to_string(),
            status,
            locked_at: None,
            lock_reason: None,
            locked_by_order_id: None,
            pre_lock_status: None,
            declared_value: Decimal::new(250, 0),
            created_at: 1,
            updated_at: 1,
        };
        self.storage
            .insert_card(card, AuditDraft::card(id, AuditAction::Intake, &self.system))
            .unwrap()
            .card
    }

    /// Move an unlocked card to any status, audited as an intake correction
    pub fn force_status(&self, id: &str, status: CardStatus) {
        let current = self.storage.get_card(id).unwrap().unwrap();
        self.storage
            .transition(
                id,
                Expected::Status(current.status),
                status,
                CardUpdate::release(),
                AuditDraft::card(id, AuditAction::Intake, &self.system),
            )
            .unwrap();
    }

    /// Leave `locked_at` on a card with no owning order
    pub fn plant_lock_residue(&self, id: &str, locked_at: i64) {
        let mut card = self.storage.get_card(id).unwrap().unwrap();
        card.locked_at = Some(locked_at);
        card.lock_reason = Some("legacy_hold".to_string());
        card.locked_by_order_id = None;
        self.storage.overwrite_card_raw(&card).unwrap();
    }
}
