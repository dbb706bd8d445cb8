//! Lock manager
//!
//! Exclusive per-order claims on a card. A lock is a single conditional
//! transition; losers of a race get [`CustodyError::AlreadyLocked`] with the
//! winning order id and never wait.

use serde_json::json;
use shared::custody::{Actor, CardStatus, LockReceipt, UnlockReceipt};
use shared::util::now_millis;
use std::sync::Arc;

use super::error::{CustodyError, CustodyResult};
use super::store::{CardInstanceStore, CardUpdate, Expected, LockClaim, StoreError};
use crate::audit::{AuditAction, AuditDraft};

/// `lock_reason` written on every order lock
pub const ORDER_LOCK_REASON: &str = "sale_pending";

/// Unlock reason when the caller gives none
pub const DEFAULT_UNLOCK_REASON: &str = "order_released";

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CardInstanceStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn CardInstanceStore>) -> Self {
        Self { store }
    }

    /// Claim `card_instance_id` for `order_id`
    pub async fn lock(
        &self,
        card_instance_id: &str,
        order_id: &str,
        actor: &Actor,
    ) -> CustodyResult<LockReceipt> {
        require_id("card_instance_id", card_instance_id)?;
        require_id("order_id", order_id)?;

        let card = self
            .store
            .get(card_instance_id)
            .await?
            .ok_or_else(|| CustodyError::CardNotFound(card_instance_id.to_string()))?;

        if card.is_locked() {
            return Err(CustodyError::AlreadyLocked {
                card_instance_id: card.id,
                held_by: card.locked_by_order_id,
            });
        }
        if !card.status.is_lockable() {
            return Err(CustodyError::InvalidTransition {
                card_instance_id: card.id,
                status: card.status,
                operation: "lock",
            });
        }

        let claim = LockClaim {
            order_id: order_id.to_string(),
            reason: ORDER_LOCK_REASON.to_string(),
            locked_at: now_millis(),
            pre_lock_status: card.status,
        };
        let audit = AuditDraft::card(card_instance_id, AuditAction::Lock, actor)
            .reason(ORDER_LOCK_REASON)
            .metadata(json!({ "order_id": order_id }));

        let result = self
            .store
            .compare_and_transition(
                card_instance_id,
                Expected::Status(card.status),
                CardStatus::Locked,
                CardUpdate::lock(claim),
                audit,
            )
            .await;

        match result {
            Ok(t) => {
                tracing::info!(
                    card_instance_id = %card_instance_id,
                    order_id = %order_id,
                    actor = %actor,
                    audit_entry_id = t.audit.id,
                    "Card locked"
                );
                Ok(LockReceipt {
                    card: t.card,
                    audit_entry_id: t.audit.id,
                })
            }
            // 并发竞争失败：另一订单已先锁定
            Err(StoreError::Conflict {
                actual: CardStatus::Locked,
                locked_by_order_id,
                ..
            }) => {
                tracing::debug!(
                    card_instance_id = %card_instance_id,
                    order_id = %order_id,
                    held_by = ?locked_by_order_id,
                    "Lock lost to concurrent order"
                );
                Err(CustodyError::AlreadyLocked {
                    card_instance_id: card_instance_id.to_string(),
                    held_by: locked_by_order_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock `order_id` holds on `card_instance_id`
    ///
    /// The card returns to the status it had when locked.
    pub async fn unlock(
        &self,
        card_instance_id: &str,
        order_id: &str,
        reason: Option<&str>,
        actor: &Actor,
    ) -> CustodyResult<UnlockReceipt> {
        self.release(
            card_instance_id,
            order_id,
            reason.unwrap_or(DEFAULT_UNLOCK_REASON),
            actor,
            AuditAction::Unlock,
            None,
        )
        .await
    }

    /// Unlock recorded under `action` (abandon, repair)
    ///
    /// `restore_to` overrides the pre-lock status; `None` restores it.
    pub(crate) async fn release(
        &self,
        card_instance_id: &str,
        order_id: &str,
        reason: &str,
        actor: &Actor,
        action: AuditAction,
        restore_to: Option<CardStatus>,
    ) -> CustodyResult<UnlockReceipt> {
        require_id("card_instance_id", card_instance_id)?;
        require_id("order_id", order_id)?;

        let card = self
            .store
            .get(card_instance_id)
            .await?
            .ok_or_else(|| CustodyError::CardNotFound(card_instance_id.to_string()))?;

        if !card.is_locked() {
            return Err(CustodyError::NotLocked {
                card_instance_id: card.id,
                status: card.status,
            });
        }
        if !card.is_locked_by(order_id) {
            return Err(CustodyError::NotLockHolder {
                card_instance_id: card.id,
                order_id: order_id.to_string(),
                held_by: card.locked_by_order_id,
            });
        }

        let restored = restore_to.unwrap_or_else(|| {
            card.pre_lock_status
                .filter(CardStatus::is_lockable)
                .unwrap_or(CardStatus::InVault)
        });
        let audit = AuditDraft::card(card_instance_id, action, actor)
            .reason(reason)
            .metadata(json!({
                "order_id": order_id,
                "pre_lock_status": card.pre_lock_status,
            }));

        let result = self
            .store
            .compare_and_transition(
                card_instance_id,
                Expected::LockedBy(order_id.to_string()),
                restored,
                CardUpdate::release(),
                audit,
            )
            .await;

        match result {
            Ok(t) => {
                tracing::info!(
                    card_instance_id = %card_instance_id,
                    order_id = %order_id,
                    restored = %restored,
                    action = %action,
                    audit_entry_id = t.audit.id,
                    "Card unlocked"
                );
                Ok(UnlockReceipt {
                    card: t.card,
                    restored_status: restored,
                    audit_entry_id: t.audit.id,
                })
            }
            Err(StoreError::Conflict {
                actual: CardStatus::Locked,
                locked_by_order_id,
                ..
            }) => Err(CustodyError::NotLockHolder {
                card_instance_id: card_instance_id.to_string(),
                order_id: order_id.to_string(),
                held_by: locked_by_order_id,
            }),
            Err(StoreError::Conflict { actual, .. }) => Err(CustodyError::NotLocked {
                card_instance_id: card_instance_id.to_string(),
                status: actual,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

fn require_id(field: &str, value: &str) -> CustodyResult<()> {
    if value.trim().is_empty() {
        return Err(CustodyError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
