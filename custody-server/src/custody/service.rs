//! Custody service
//!
//! Single entry point for every custody operation. HTTP handlers and
//! background tasks go through here; nothing else touches the components
//! directly.

use rust_decimal::Decimal;
use shared::custody::{
    AbandonReceipt, Actor, CardInstance, CompletionReceipt, CustodyRequest, CustodyResponse,
    IntegrityReport, LockReceipt, NewCard, RepairSummary, RepairType, SaleLaneDecision,
    SellerTrustTier, UnlockReceipt,
};
use shared::util::now_millis;
use std::sync::Arc;

use super::capability::AdminCapability;
use super::completion::SaleCompletionCoordinator;
use super::error::{CustodyError, CustodyResult};
use super::integrity::{DEFAULT_STALE_LOCK_TIMEOUT_MS, IntegrityAuditor};
use super::lane::{DEFAULT_HIGH_VALUE_THRESHOLD, LaneRouter};
use super::lock::LockManager;
use super::repair::RepairExecutor;
use super::storage::CustodyStorage;
use super::store::CardInstanceStore;
use crate::audit::{AuditAction, AuditDraft, AuditEntry, AuditService};
use crate::external::{AlertSink, LedgerService, OrderService};

/// Tunables for the custody core
#[derive(Debug, Clone)]
pub struct CustodySettings {
    pub high_value_threshold: Decimal,
    pub stale_lock_timeout_ms: i64,
}

impl Default for CustodySettings {
    fn default() -> Self {
        Self {
            high_value_threshold: DEFAULT_HIGH_VALUE_THRESHOLD,
            stale_lock_timeout_ms: DEFAULT_STALE_LOCK_TIMEOUT_MS,
        }
    }
}

/// External collaborators the core depends on
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderService>,
    pub ledger: Arc<dyn LedgerService>,
    pub alerts: Arc<dyn AlertSink>,
}

#[derive(Clone)]
pub struct CustodyService {
    store: Arc<dyn CardInstanceStore>,
    lanes: LaneRouter,
    locks: LockManager,
    completion: SaleCompletionCoordinator,
    auditor: IntegrityAuditor,
    repair: RepairExecutor,
    audit: AuditService,
}

impl CustodyService {
    pub fn new(storage: Arc<CustodyStorage>, deps: Collaborators, settings: CustodySettings) -> Self {
        let store: Arc<dyn CardInstanceStore> = storage.clone();
        let locks = LockManager::new(store.clone());
        let completion = SaleCompletionCoordinator::new(
            store.clone(),
            storage.clone(),
            deps.orders.clone(),
            deps.ledger,
            deps.alerts,
            locks.clone(),
        );
        let auditor = IntegrityAuditor::new(
            store.clone(),
            deps.orders.clone(),
            settings.stale_lock_timeout_ms,
        );
        let repair = RepairExecutor::new(store.clone(), deps.orders, locks.clone(), auditor.clone());

        Self {
            store,
            lanes: LaneRouter::new(settings.high_value_threshold),
            locks,
            completion,
            auditor,
            repair,
            audit: AuditService::new(storage),
        }
    }

    pub fn auditor(&self) -> &IntegrityAuditor {
        &self.auditor
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    /// Run one request on behalf of `actor`
    pub async fn dispatch(&self, request: CustodyRequest, actor: &Actor) -> CustodyResult<CustodyResponse> {
        let action = request.action_name();
        tracing::debug!(action, actor = %actor, "Dispatching custody request");

        let result = if request.requires_admin() {
            match AdminCapability::grant(actor) {
                Ok(cap) => self.dispatch_admin(request, &cap).await,
                Err(e) => Err(e),
            }
        } else {
            self.dispatch_operation(request, actor).await
        };

        if let Err(e) = &result {
            if e.is_contention() {
                tracing::warn!(action, actor = %actor, error = %e, "Custody request lost a race");
            } else if matches!(e, CustodyError::Storage(_)) {
                tracing::error!(action, actor = %actor, error = %e, "Custody request failed");
            } else {
                tracing::info!(action, actor = %actor, error = %e, "Custody request rejected");
            }
        }
        result
    }

    async fn dispatch_admin(
        &self,
        request: CustodyRequest,
        cap: &AdminCapability,
    ) -> CustodyResult<CustodyResponse> {
        match request {
            CustodyRequest::IntegrityCheck => self.integrity_check(cap).await.map(CustodyResponse::Integrity),
            CustodyRequest::Repair { repair_type } => {
                self.repair(cap, repair_type).await.map(CustodyResponse::Repaired)
            }
            other => self.dispatch_operation(other, cap.actor()).await,
        }
    }

    async fn dispatch_operation(
        &self,
        request: CustodyRequest,
        actor: &Actor,
    ) -> CustodyResult<CustodyResponse> {
        match request {
            CustodyRequest::Lock {
                card_instance_id,
                order_id,
            } => self
                .lock(&card_instance_id, &order_id, actor)
                .await
                .map(CustodyResponse::Locked),
            CustodyRequest::Unlock {
                card_instance_id,
                order_id,
                reason,
            } => self
                .unlock(&card_instance_id, &order_id, reason.as_deref(), actor)
                .await
                .map(CustodyResponse::Unlocked),
            CustodyRequest::DetermineLane {
                seller_trust_tier,
                declared_value,
                prior_dispute_count,
            } => self
                .determine_lane(seller_trust_tier, declared_value, prior_dispute_count)
                .map(CustodyResponse::Lane),
            CustodyRequest::CompleteSale { order_id, escrow_id } => self
                .complete_sale(&order_id, &escrow_id, actor)
                .await
                .map(CustodyResponse::SaleCompleted),
            CustodyRequest::AbandonSale {
                card_instance_id,
                order_id,
                escrow_id,
                reason,
            } => self
                .abandon_sale(
                    &card_instance_id,
                    &order_id,
                    escrow_id.as_deref(),
                    reason.as_deref(),
                    actor,
                )
                .await
                .map(CustodyResponse::SaleAbandoned),
            CustodyRequest::RegisterCard { card } => self
                .register_card(card, actor)
                .await
                .map(CustodyResponse::Registered),
            CustodyRequest::IntegrityCheck | CustodyRequest::Repair { .. } => {
                Err(CustodyError::AdminRequired {
                    actor_id: actor.id.clone(),
                })
            }
        }
    }

    pub async fn lock(&self, card_instance_id: &str, order_id: &str, actor: &Actor) -> CustodyResult<LockReceipt> {
        self.locks.lock(card_instance_id, order_id, actor).await
    }

    pub async fn unlock(
        &self,
        card_instance_id: &str,
        order_id: &str,
        reason: Option<&str>,
        actor: &Actor,
    ) -> CustodyResult<UnlockReceipt> {
        self.locks.unlock(card_instance_id, order_id, reason, actor).await
    }

    pub fn determine_lane(
        &self,
        seller_trust_tier: SellerTrustTier,
        declared_value: Decimal,
        prior_dispute_count: u32,
    ) -> CustodyResult<SaleLaneDecision> {
        if declared_value.is_sign_negative() {
            return Err(CustodyError::Validation(
                "declared_value must not be negative".to_string(),
            ));
        }
        Ok(self
            .lanes
            .determine_lane(seller_trust_tier, declared_value, prior_dispute_count))
    }

    pub async fn complete_sale(
        &self,
        order_id: &str,
        escrow_id: &str,
        actor: &Actor,
    ) -> CustodyResult<CompletionReceipt> {
        self.completion.complete_sale(order_id, escrow_id, actor).await
    }

    pub async fn abandon_sale(
        &self,
        card_instance_id: &str,
        order_id: &str,
        escrow_id: Option<&str>,
        reason: Option<&str>,
        actor: &Actor,
    ) -> CustodyResult<AbandonReceipt> {
        self.completion
            .abandon_sale(card_instance_id, order_id, escrow_id, reason, actor)
            .await
    }

    /// 入库：只接受 `in_vault` / `listed`
    pub async fn register_card(&self, new_card: NewCard, actor: &Actor) -> CustodyResult<CardInstance> {
        if new_card.id.trim().is_empty() {
            return Err(CustodyError::Validation("id must not be empty".to_string()));
        }
        if new_card.owner_id.trim().is_empty() {
            return Err(CustodyError::Validation("owner_id must not be empty".to_string()));
        }
        if new_card.declared_value.is_sign_negative() {
            return Err(CustodyError::Validation(
                "declared_value must not be negative".to_string(),
            ));
        }
        if !new_card.status.is_lockable() {
            return Err(CustodyError::InvalidTransition {
                card_instance_id: new_card.id,
                status: new_card.status,
                operation: "register",
            });
        }

        let now = now_millis();
        let card = CardInstance {
            id: new_card.id,
            owner_id: new_card.owner_id,
            status: new_card.status,
            locked_at: None,
            lock_reason: None,
            locked_by_order_id: None,
            pre_lock_status: None,
            declared_value: new_card.declared_value,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditDraft::card(card.id.clone(), AuditAction::Intake, actor)
            .metadata(serde_json::json!({ "declared_value": card.declared_value }));
        let t = self.store.insert(card, audit).await?;

        tracing::info!(
            card_instance_id = %t.card.id,
            owner_id = %t.card.owner_id,
            status = %t.card.status,
            audit_entry_id = t.audit.id,
            "Card registered"
        );
        Ok(t.card)
    }

    pub async fn integrity_check(&self, cap: &AdminCapability) -> CustodyResult<IntegrityReport> {
        tracing::info!(target: "security", actor = %cap.actor(), "Integrity check requested");
        self.auditor.scan(now_millis()).await
    }

    pub async fn repair(&self, cap: &AdminCapability, repair_type: RepairType) -> CustodyResult<RepairSummary> {
        match repair_type {
            RepairType::UnlockOrphans => self.repair.unlock_orphans(cap).await,
            RepairType::FixStatus { card_instance_id } => {
                self.repair.fix_status(cap, &card_instance_id).await
            }
        }
    }

    pub async fn card(&self, card_instance_id: &str) -> CustodyResult<CardInstance> {
        self.store
            .get(card_instance_id)
            .await?
            .ok_or_else(|| CustodyError::CardNotFound(card_instance_id.to_string()))
    }

    /// Audit history of one card, oldest first
    pub async fn card_history(&self, card_instance_id: &str) -> CustodyResult<Vec<AuditEntry>> {
        self.card(card_instance_id).await?;
        Ok(self.audit.card_history(card_instance_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{BroadcastAlertSink, InMemoryLedgerService, InMemoryOrderService};
    use shared::custody::{ActorType, CardStatus, CustodyLane, OrderStatus};

    struct Harness {
        service: CustodyService,
        orders: Arc<InMemoryOrderService>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(CustodyStorage::open_in_memory().unwrap());
        let orders = Arc::new(InMemoryOrderService::new());
        let deps = Collaborators {
            orders: orders.clone(),
            ledger: Arc::new(InMemoryLedgerService::new()),
            alerts: Arc::new(BroadcastAlertSink::default()),
        };
        Harness {
            service: CustodyService::new(storage, deps, CustodySettings::default()),
            orders,
        }
    }

    fn request(json: &str) -> CustodyRequest {
        serde_json::from_str(json).unwrap()
    }

    fn new_card(id: &str, status: CardStatus) -> NewCard {
        NewCard {
            id: id.to_string(),
            owner_id: "seller-1".to_string(),
            declared_value: Decimal::new(120, 0),
            status,
        }
    }

    #[tokio::test]
    async fn test_dispatch_full_sale() {
        let h = harness();
        let seller = Actor::user("seller-1");
        let buyer = Actor::user("buyer-1");
        h.service.register_card(new_card("C1", CardStatus::Listed), &seller).await.unwrap();

        let resp = h
            .service
            .dispatch(
                request(r#"{"action":"determine_lane","seller_trust_tier":"trusted","declared_value":120}"#),
                &buyer,
            )
            .await
            .unwrap();
        match resp {
            CustodyResponse::Lane(d) => assert_eq!(d.lane, CustodyLane::DirectShip),
            other => panic!("unexpected response: {:?}", other),
        }

        let resp = h
            .service
            .dispatch(request(r#"{"action":"lock","card_instance_id":"C1","order_id":"O1"}"#), &buyer)
            .await
            .unwrap();
        assert!(matches!(resp, CustodyResponse::Locked(_)));

        h.orders.upsert("O1", OrderStatus::Completed, Some("buyer-1"));
        let resp = h
            .service
            .dispatch(
                request(r#"{"action":"complete_sale","order_id":"O1","escrow_id":"E1"}"#),
                &Actor::system("order-webhook"),
            )
            .await
            .unwrap();
        match resp {
            CustodyResponse::SaleCompleted(r) => {
                assert_eq!(r.card.status, CardStatus::Sold);
                assert_eq!(r.card.owner_id, "buyer-1");
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let history = h.service.card_history("C1").await.unwrap();
        let actions: Vec<_> = history.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Intake, AuditAction::Lock, AuditAction::CompleteSale]
        );
    }

    #[tokio::test]
    async fn test_admin_requests_need_admin_actor() {
        let h = harness();
        let err = h
            .service
            .dispatch(CustodyRequest::IntegrityCheck, &Actor::user("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::AdminRequired { .. }));

        let err = h
            .service
            .dispatch(
                CustodyRequest::Repair {
                    repair_type: RepairType::UnlockOrphans,
                },
                &Actor::system("cron"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::AdminRequired { .. }));

        let resp = h
            .service
            .dispatch(CustodyRequest::IntegrityCheck, &Actor::admin("ops-1"))
            .await
            .unwrap();
        assert!(matches!(resp, CustodyResponse::Integrity(r) if r.is_clean()));
    }

    #[tokio::test]
    async fn test_admin_gate_leaves_plain_requests_open() {
        let h = harness();
        let ops = Actor::admin("ops-1");
        h.service
            .register_card(new_card("C1", CardStatus::InVault), &Actor::user("seller-1"))
            .await
            .unwrap();
        let before = h.service.audit().verify_chain().await.unwrap().total_entries;

        let err = h
            .service
            .dispatch(
                CustodyRequest::Repair {
                    repair_type: RepairType::FixStatus {
                        card_instance_id: "C1".into(),
                    },
                },
                &Actor::user("u1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::AdminRequired { ref actor_id } if actor_id == "u1"));
        assert_eq!(h.service.audit().verify_chain().await.unwrap().total_entries, before);

        // 管理员也可以走普通操作
        let resp = h
            .service
            .dispatch(request(r#"{"action":"lock","card_instance_id":"C1","order_id":"O1"}"#), &ops)
            .await
            .unwrap();
        assert!(matches!(resp, CustodyResponse::Locked(_)));
    }

    #[tokio::test]
    async fn test_repair_dispatch_is_audited_as_admin() {
        let h = harness();
        let buyer = Actor::user("buyer-1");
        h.service.register_card(new_card("C1", CardStatus::InVault), &buyer).await.unwrap();
        h.service.lock("C1", "O1", &buyer).await.unwrap();
        h.orders.upsert("O1", OrderStatus::Cancelled, None);

        let resp = h
            .service
            .dispatch(
                request(r#"{"action":"repair","repair_type":{"type":"unlock_orphans"}}"#),
                &Actor::admin("ops-1"),
            )
            .await
            .unwrap();
        let summary = match resp {
            CustodyResponse::Repaired(s) => s,
            other => panic!("unexpected response: {:?}", other),
        };
        assert_eq!(summary.fixed_card_ids, vec!["C1".to_string()]);

        let last = h.service.card_history("C1").await.unwrap().pop().unwrap();
        assert_eq!(last.actor_type, ActorType::Admin);
        assert_eq!(last.actor_id, "ops-1");
        assert_eq!(h.service.card("C1").await.unwrap().status, CardStatus::InVault);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_intake() {
        let h = harness();
        let actor = Actor::user("seller-1");

        let err = h
            .service
            .register_card(new_card("C1", CardStatus::Sold), &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::InvalidTransition { .. }));

        let mut negative = new_card("C2", CardStatus::InVault);
        negative.declared_value = Decimal::new(-1, 0);
        let err = h.service.register_card(negative, &actor).await.unwrap_err();
        assert!(matches!(err, CustodyError::Validation(_)));

        h.service.register_card(new_card("C3", CardStatus::InVault), &actor).await.unwrap();
        let err = h
            .service
            .register_card(new_card("C3", CardStatus::InVault), &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::CardAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_intake_audit_has_no_from_status() {
        let h = harness();
        h.service
            .register_card(new_card("C1", CardStatus::Listed), &Actor::user("seller-1"))
            .await
            .unwrap();
        let entry = &h.service.card_history("C1").await.unwrap()[0];
        assert_eq!(entry.action, AuditAction::Intake);
        assert_eq!(entry.from_status, None);
        assert_eq!(entry.to_status, Some(CardStatus::Listed));
    }

    #[tokio::test]
    async fn test_history_of_unknown_card() {
        let h = harness();
        let err = h.service.card_history("ghost").await.unwrap_err();
        assert!(matches!(err, CustodyError::CardNotFound(_)));
    }
}
