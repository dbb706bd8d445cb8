//! Sale completion coordinator
//!
//! ```text
//! complete_sale(order, escrow)
//!   1. OrderService: order must be `completed`         → OrderNotFinalized
//!   2. lock index: card locked by this order           → NoMatchingLock
//!   3. CAS locked(order) → sold, owner → buyer, audit  (one transaction)
//!   4. Ledger: release escrow to the seller
//!        └─ failure: card stays sold, failure audited,
//!                    entry queued for the reconciler, critical alert
//! ```
//!
//! Step 3 commits before the ledger call, so a payout failure can never leave
//! a card that is both paid for and still sellable.

use serde_json::json;
use shared::custody::{AbandonReceipt, Actor, CardStatus, CompletionReceipt};
use shared::util::now_millis;
use std::sync::Arc;

use super::error::{CustodyError, CustodyResult};
use super::lock::LockManager;
use super::store::{CardInstanceStore, CardUpdate, EscrowQueue, Expected, StoreError};
use crate::audit::{AuditAction, AuditDraft};
use crate::escrow::{EscrowOperation, PendingEscrow, backoff_delay_ms};
use crate::external::{Alert, AlertKind, AlertSink, LedgerService, OrderService};

/// Unlock reason for abandoned sales when the caller gives none
pub const ABANDON_REASON: &str = "order_abandoned";

#[derive(Clone)]
pub struct SaleCompletionCoordinator {
    store: Arc<dyn CardInstanceStore>,
    escrow: Arc<dyn EscrowQueue>,
    orders: Arc<dyn OrderService>,
    ledger: Arc<dyn LedgerService>,
    alerts: Arc<dyn AlertSink>,
    locks: LockManager,
}

impl SaleCompletionCoordinator {
    pub fn new(
        store: Arc<dyn CardInstanceStore>,
        escrow: Arc<dyn EscrowQueue>,
        orders: Arc<dyn OrderService>,
        ledger: Arc<dyn LedgerService>,
        alerts: Arc<dyn AlertSink>,
        locks: LockManager,
    ) -> Self {
        Self {
            store,
            escrow,
            orders,
            ledger,
            alerts,
            locks,
        }
    }

    /// Finalize the sale behind `order_id` and pay the seller
    pub async fn complete_sale(
        &self,
        order_id: &str,
        escrow_id: &str,
        actor: &Actor,
    ) -> CustodyResult<CompletionReceipt> {
        if order_id.trim().is_empty() || escrow_id.trim().is_empty() {
            return Err(CustodyError::Validation(
                "order_id and escrow_id must not be empty".into(),
            ));
        }

        // 1. 订单必须已完成
        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(CustodyError::OrderService)?
            .ok_or_else(|| CustodyError::OrderNotFound(order_id.to_string()))?;
        if !order.status.is_finalized() {
            return Err(CustodyError::OrderNotFinalized {
                order_id: order_id.to_string(),
                status: order.status,
            });
        }

        // 2. 找到该订单锁定的卡片
        let card = self
            .store
            .find_by_lock_order(order_id)
            .await?
            .ok_or_else(|| CustodyError::NoMatchingLock {
                order_id: order_id.to_string(),
            })?;
        let seller_id = card.owner_id.clone();

        // 3. locked → sold，所有权转移给买家
        let mut update = CardUpdate::release();
        if let Some(buyer_id) = &order.buyer_id {
            update = update.with_owner(buyer_id.clone());
        }
        let audit = AuditDraft::card(&card.id, AuditAction::CompleteSale, actor).metadata(json!({
            "order_id": order_id,
            "escrow_id": escrow_id,
            "seller_id": seller_id,
            "buyer_id": order.buyer_id,
        }));

        let transition = match self
            .store
            .compare_and_transition(
                &card.id,
                Expected::LockedBy(order_id.to_string()),
                CardStatus::Sold,
                update,
                audit,
            )
            .await
        {
            Ok(t) => t,
            // 锁在查询与写入之间被释放（修复或并发 unlock）
            Err(StoreError::Conflict { .. }) => {
                return Err(CustodyError::NoMatchingLock {
                    order_id: order_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            card_instance_id = %card.id,
            order_id = %order_id,
            escrow_id = %escrow_id,
            audit_entry_id = transition.audit.id,
            "Card sold"
        );

        // 4. 释放托管资金给卖家
        if let Err(e) = self.ledger.release_escrow(escrow_id, &seller_id).await {
            let reason = e.to_string();
            let audit_entry_id = self
                .queue_escrow_failure(
                    &card.id,
                    order_id,
                    escrow_id,
                    EscrowOperation::Release {
                        to_seller_id: seller_id.clone(),
                    },
                    &reason,
                    actor,
                )
                .await;
            return Err(CustodyError::EscrowReleaseFailed {
                card_instance_id: card.id,
                order_id: order_id.to_string(),
                escrow_id: escrow_id.to_string(),
                audit_entry_id,
                reason,
            });
        }

        Ok(CompletionReceipt {
            card: transition.card,
            order_id: order_id.to_string(),
            escrow_id: escrow_id.to_string(),
            seller_id,
            audit_entry_id: transition.audit.id,
        })
    }

    /// Release an abandoned order's lock and refund its escrow, if any
    pub async fn abandon_sale(
        &self,
        card_instance_id: &str,
        order_id: &str,
        escrow_id: Option<&str>,
        reason: Option<&str>,
        actor: &Actor,
    ) -> CustodyResult<AbandonReceipt> {
        let unlock = self
            .locks
            .release(
                card_instance_id,
                order_id,
                reason.unwrap_or(ABANDON_REASON),
                actor,
                AuditAction::AbandonSale,
                None,
            )
            .await?;

        let Some(escrow_id) = escrow_id else {
            return Ok(AbandonReceipt {
                unlock,
                refunded_escrow_id: None,
            });
        };

        if let Err(e) = self.ledger.refund_escrow(escrow_id).await {
            let reason = e.to_string();
            let audit_entry_id = self
                .queue_escrow_failure(
                    card_instance_id,
                    order_id,
                    escrow_id,
                    EscrowOperation::Refund,
                    &reason,
                    actor,
                )
                .await;
            return Err(CustodyError::EscrowRefundFailed {
                card_instance_id: card_instance_id.to_string(),
                order_id: order_id.to_string(),
                escrow_id: escrow_id.to_string(),
                audit_entry_id,
                reason,
            });
        }

        tracing::info!(
            card_instance_id = %card_instance_id,
            order_id = %order_id,
            escrow_id = %escrow_id,
            "Sale abandoned, escrow refunded"
        );
        Ok(AbandonReceipt {
            unlock,
            refunded_escrow_id: Some(escrow_id.to_string()),
        })
    }

    /// Audit the failure, queue it for the reconciler and alert
    ///
    /// Returns the failure audit entry id, `None` if even that write failed.
    async fn queue_escrow_failure(
        &self,
        card_instance_id: &str,
        order_id: &str,
        escrow_id: &str,
        operation: EscrowOperation,
        error: &str,
        actor: &Actor,
    ) -> Option<u64> {
        let now = now_millis();
        let (action, kind) = match operation {
            EscrowOperation::Release { .. } => (
                AuditAction::CompleteSaleEscrowFailed,
                AlertKind::EscrowReleaseFailed,
            ),
            EscrowOperation::Refund => (AuditAction::RefundEscrowFailed, AlertKind::EscrowRefundFailed),
        };
        let metadata = json!({
            "order_id": order_id,
            "escrow_id": escrow_id,
            "operation": operation.name(),
            "error": error,
        });

        let pending = PendingEscrow {
            order_id: order_id.to_string(),
            escrow_id: escrow_id.to_string(),
            card_instance_id: card_instance_id.to_string(),
            operation,
            attempts: 1,
            last_error: Some(error.to_string()),
            created_at: now,
            next_attempt_at: now + backoff_delay_ms(1),
        };
        let mut audit = AuditDraft::card(card_instance_id, action, actor)
            .reason(error)
            .metadata(metadata.clone());
        // 卡片保持 sold，仅记录失败
        if action == AuditAction::CompleteSaleEscrowFailed {
            audit = audit.transition(CardStatus::Sold, CardStatus::Sold);
        }

        let audit_entry_id = match self.escrow.enqueue(pending, audit).await {
            Ok(entry) => Some(entry.id),
            Err(e) => {
                tracing::error!(
                    order_id = %order_id,
                    escrow_id = %escrow_id,
                    error = %e,
                    "Failed to queue escrow retry; manual reconciliation required"
                );
                None
            }
        };

        tracing::error!(
            card_instance_id = %card_instance_id,
            order_id = %order_id,
            escrow_id = %escrow_id,
            error = %error,
            audit_entry_id = ?audit_entry_id,
            "Escrow {} failed", action
        );

        let mut alert = Alert::critical(
            kind,
            format!("Escrow {} for order {} failed: {}", escrow_id, order_id, error),
        )
        .with_card(card_instance_id)
        .with_order(order_id)
        .with_details(metadata);
        if let Some(id) = audit_entry_id {
            alert = alert.with_audit_entry(id);
        }
        self.alerts.emit(alert).await;

        audit_entry_id
    }
}
