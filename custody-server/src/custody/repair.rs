//! Repair executor
//!
//! The only component allowed to force-correct custody state. Every call
//! takes an [`AdminCapability`] and every fix writes its own audit entry.

use serde_json::json;
use shared::custody::{CardStatus, RepairSkip, RepairSummary};
use shared::util::now_millis;
use std::sync::Arc;

use super::capability::AdminCapability;
use super::error::{CustodyError, CustodyResult};
use super::integrity::IntegrityAuditor;
use super::lock::LockManager;
use super::store::{CardInstanceStore, CardUpdate, Expected};
use crate::audit::{AuditAction, AuditDraft};
use crate::external::OrderService;

pub const ORPHAN_REPAIR_REASON: &str = "repair_orphan";
pub const FIX_STATUS_REASON: &str = "repair_fix_status";

#[derive(Clone)]
pub struct RepairExecutor {
    store: Arc<dyn CardInstanceStore>,
    orders: Arc<dyn OrderService>,
    locks: LockManager,
    auditor: IntegrityAuditor,
}

impl RepairExecutor {
    pub fn new(
        store: Arc<dyn CardInstanceStore>,
        orders: Arc<dyn OrderService>,
        locks: LockManager,
        auditor: IntegrityAuditor,
    ) -> Self {
        Self {
            store,
            orders,
            locks,
            auditor,
        }
    }

    /// Unlock every orphan found by a fresh scan and return it to `in_vault`
    ///
    /// Each candidate is re-checked against the card row and the order
    /// service right before its unlock; anything that changed since the scan
    /// is skipped, not forced.
    pub async fn unlock_orphans(&self, cap: &AdminCapability) -> CustodyResult<RepairSummary> {
        let report = self.auditor.scan(now_millis()).await?;
        let mut summary = RepairSummary {
            repair_type: "unlock_orphans".to_string(),
            candidates: report.orphaned_locks.len(),
            ..Default::default()
        };

        for orphan in report.orphaned_locks {
            let card_id = orphan.card_instance_id;
            if let Some(reason) = self.still_orphaned(&card_id, &orphan.order_id).await? {
                tracing::info!(
                    card_instance_id = %card_id,
                    order_id = %orphan.order_id,
                    reason = %reason,
                    "Orphan repair skipped"
                );
                summary.skipped.push(RepairSkip {
                    card_instance_id: card_id,
                    reason,
                });
                continue;
            }

            match self
                .locks
                .release(
                    &card_id,
                    &orphan.order_id,
                    ORPHAN_REPAIR_REASON,
                    cap.actor(),
                    AuditAction::RepairUnlockOrphans,
                    // 孤儿卡片回库，不直接重新上架
                    Some(CardStatus::InVault),
                )
                .await
            {
                Ok(receipt) => {
                    summary.fixed += 1;
                    summary.audit_entry_ids.push(receipt.audit_entry_id);
                    summary.fixed_card_ids.push(card_id);
                }
                // 重新校验与解锁之间被其他请求改动
                Err(e @ (CustodyError::NotLockHolder { .. } | CustodyError::NotLocked { .. })) => {
                    summary.skipped.push(RepairSkip {
                        card_instance_id: card_id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            target: "security",
            actor = %cap.actor(),
            candidates = summary.candidates,
            fixed = summary.fixed,
            skipped = summary.skipped.len(),
            "Orphaned locks repaired"
        );
        Ok(summary)
    }

    /// `None` when the lock is still orphaned, otherwise why it is not
    async fn still_orphaned(&self, card_id: &str, order_id: &str) -> CustodyResult<Option<String>> {
        let card = self.store.get(card_id).await?;
        if !card.as_ref().is_some_and(|c| c.is_locked_by(order_id)) {
            return Ok(Some("lock changed since scan".to_string()));
        }
        match self.orders.get_order(order_id).await {
            Ok(None) => Ok(None),
            Ok(Some(order)) if order.status.is_abandoned() => Ok(None),
            Ok(Some(order)) => Ok(Some(format!("order is now {}", order.status))),
            Err(e) => Ok(Some(format!("order lookup failed: {}", e))),
        }
    }

    /// Clear a `locked_at` left without an owning order
    ///
    /// Vault-side statuses (`in_vault`, `listed`, `locked`) are forced to
    /// `in_vault`. Shipped and terminal cards keep their status and only lose
    /// the stray lock fields.
    pub async fn fix_status(
        &self,
        cap: &AdminCapability,
        card_instance_id: &str,
    ) -> CustodyResult<RepairSummary> {
        let card = self
            .store
            .get(card_instance_id)
            .await?
            .ok_or_else(|| CustodyError::CardNotFound(card_instance_id.to_string()))?;

        if !card.has_orphaned_lock_timestamp() {
            return Err(CustodyError::NotInconsistent(card_instance_id.to_string()));
        }

        let target = match card.status {
            CardStatus::InVault | CardStatus::Listed | CardStatus::Locked => CardStatus::InVault,
            status @ (CardStatus::Shipped | CardStatus::Sold | CardStatus::Disputed) => status,
        };
        let audit = AuditDraft::card(card_instance_id, AuditAction::RepairFixStatus, cap.actor())
            .reason(FIX_STATUS_REASON)
            .metadata(json!({
                "previous_locked_at": card.locked_at,
                "previous_lock_reason": card.lock_reason,
            }));
        let t = self
            .store
            .compare_and_transition(
                card_instance_id,
                Expected::Unclaimed(card.status),
                target,
                CardUpdate::release(),
                audit,
            )
            .await?;

        tracing::warn!(
            target: "security",
            actor = %cap.actor(),
            card_instance_id = %card_instance_id,
            from = %card.status,
            to = %target,
            audit_entry_id = t.audit.id,
            "Card status force-corrected"
        );
        Ok(RepairSummary {
            repair_type: "fix_status".to_string(),
            candidates: 1,
            fixed: 1,
            fixed_card_ids: vec![card_instance_id.to_string()],
            skipped: Vec::new(),
            audit_entry_ids: vec![t.audit.id],
        })
    }
}
