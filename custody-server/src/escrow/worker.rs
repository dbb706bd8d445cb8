//! Escrow Reconciler - 托管资金补偿重试
//!
//! 扫描 `pending_escrow` 队列，按指数退避重试失败的 release / refund。
//! 重试耗尽后移入 `dead_escrow` 并发出 critical 告警，等待人工 requeue。

use serde_json::json;
use shared::custody::Actor;
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::types::{DeadEscrow, EscrowOperation, PendingEscrow};
use crate::audit::{AuditAction, AuditDraft};
use crate::custody::capability::AdminCapability;
use crate::custody::error::CustodyResult;
use crate::custody::store::{EscrowQueue, StoreResult};
use crate::external::{Alert, AlertKind, AlertSink, LedgerService};

/// Ledger calls per entry before it is declared dead (original call included)
pub const MAX_RECONCILE_ATTEMPTS: u32 = 8;
const RETRY_BASE_DELAY_SECS: i64 = 5;
const RETRY_MAX_DELAY_SECS: i64 = 300; // 5 minutes max

/// Delay before the next retry after `attempts` failed calls
///
/// delay = base * 2^(attempts - 1), capped at max
pub fn backoff_delay_ms(attempts: u32) -> i64 {
    let exponent = attempts.saturating_sub(1).min(16);
    (RETRY_BASE_DELAY_SECS * 2i64.pow(exponent)).min(RETRY_MAX_DELAY_SECS) * 1000
}

/// Outcome counts of one queue pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub settled: usize,
    pub retried: usize,
    pub exhausted: usize,
    /// Not yet due
    pub deferred: usize,
}

#[derive(Clone)]
pub struct EscrowReconciler {
    queue: Arc<dyn EscrowQueue>,
    ledger: Arc<dyn LedgerService>,
    alerts: Arc<dyn AlertSink>,
    actor: Actor,
    scan_interval: Duration,
}

impl EscrowReconciler {
    pub fn new(
        queue: Arc<dyn EscrowQueue>,
        ledger: Arc<dyn LedgerService>,
        alerts: Arc<dyn AlertSink>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            queue,
            ledger,
            alerts,
            actor: Actor::system("escrow-reconciler"),
            scan_interval,
        }
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.scan_interval.as_secs(),
            max_attempts = MAX_RECONCILE_ATTEMPTS,
            "EscrowReconciler started"
        );

        let mut interval = tokio::time::interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("EscrowReconciler received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    match self.process_due(now_millis()).await {
                        Ok(stats) if stats.settled + stats.retried + stats.exhausted > 0 => {
                            tracing::info!(
                                settled = stats.settled,
                                retried = stats.retried,
                                exhausted = stats.exhausted,
                                deferred = stats.deferred,
                                "Escrow queue pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Failed to read escrow queue"),
                    }
                }
            }
        }
    }

    /// Retry every entry due at `now`
    pub async fn process_due(&self, now: i64) -> StoreResult<ReconcileStats> {
        let pending = self.queue.pending().await?;
        let mut stats = ReconcileStats::default();

        for entry in pending {
            if entry.next_attempt_at > now {
                stats.deferred += 1;
                continue;
            }
            let order_id = entry.order_id.clone();
            match self.attempt(entry, now).await {
                Ok(Outcome::Settled) => stats.settled += 1,
                Ok(Outcome::Retry) => stats.retried += 1,
                Ok(Outcome::Exhausted) => stats.exhausted += 1,
                Err(e) => {
                    tracing::error!(order_id = %order_id, error = %e, "Failed to update escrow queue entry");
                }
            }
        }
        Ok(stats)
    }

    async fn attempt(&self, mut entry: PendingEscrow, now: i64) -> StoreResult<Outcome> {
        let result = match &entry.operation {
            EscrowOperation::Release { to_seller_id } => {
                self.ledger.release_escrow(&entry.escrow_id, to_seller_id).await
            }
            EscrowOperation::Refund => self.ledger.refund_escrow(&entry.escrow_id).await,
        };
        entry.attempts += 1;

        let error = match result {
            Ok(()) => {
                let audit = AuditDraft::card(
                    &entry.card_instance_id,
                    AuditAction::EscrowReconciled,
                    &self.actor,
                )
                .metadata(json!({
                    "order_id": entry.order_id,
                    "escrow_id": entry.escrow_id,
                    "operation": entry.operation.name(),
                    "attempts": entry.attempts,
                }));
                let audit_entry = self.queue.resolve(&entry.order_id, audit).await?;
                tracing::info!(
                    order_id = %entry.order_id,
                    escrow_id = %entry.escrow_id,
                    attempts = entry.attempts,
                    audit_entry_id = audit_entry.id,
                    "Escrow {} reconciled", entry.operation.name()
                );
                return Ok(Outcome::Settled);
            }
            Err(e) => e.to_string(),
        };
        entry.last_error = Some(error.clone());

        if entry.attempts < MAX_RECONCILE_ATTEMPTS {
            entry.next_attempt_at = now + backoff_delay_ms(entry.attempts);
            tracing::warn!(
                order_id = %entry.order_id,
                escrow_id = %entry.escrow_id,
                attempts = entry.attempts,
                next_attempt_at = entry.next_attempt_at,
                error = %error,
                "Escrow retry failed"
            );
            self.queue.reschedule(&entry).await?;
            return Ok(Outcome::Retry);
        }

        let metadata = json!({
            "order_id": entry.order_id,
            "escrow_id": entry.escrow_id,
            "operation": entry.operation.name(),
            "attempts": entry.attempts,
            "error": error,
        });
        let audit = AuditDraft::card(
            &entry.card_instance_id,
            AuditAction::EscrowReconcileExhausted,
            &self.actor,
        )
        .reason(error.clone())
        .metadata(metadata.clone());
        let dead = DeadEscrow::from_pending(entry, now);
        let audit_entry = self.queue.bury(dead.clone(), audit).await?;

        tracing::error!(
            order_id = %dead.order_id,
            escrow_id = %dead.escrow_id,
            attempts = dead.attempts,
            audit_entry_id = audit_entry.id,
            "Escrow retries exhausted, moved to dead escrow queue"
        );
        self.alerts
            .emit(
                Alert::critical(
                    AlertKind::EscrowReconcileExhausted,
                    format!(
                        "Escrow {} for order {} gave up after {} attempts",
                        dead.escrow_id, dead.order_id, dead.attempts
                    ),
                )
                .with_audit_entry(audit_entry.id)
                .with_card(dead.card_instance_id.clone())
                .with_order(dead.order_id.clone())
                .with_details(metadata),
            )
            .await;
        Ok(Outcome::Exhausted)
    }

    /// Give a dead entry a fresh retry budget, audited as an admin repair
    pub async fn requeue_dead(
        &self,
        capability: &AdminCapability,
        order_id: &str,
    ) -> CustodyResult<PendingEscrow> {
        let audit = AuditDraft::system(AuditAction::RepairRequeueEscrow, capability.actor())
            .reason("repair_requeue_escrow");
        let (revived, entry) = self.queue.requeue(order_id, now_millis(), audit).await?;
        tracing::warn!(
            target: "security",
            order_id = %order_id,
            escrow_id = %revived.escrow_id,
            admin = %capability.actor(),
            audit_entry_id = entry.id,
            "Dead escrow entry requeued"
        );
        Ok(revived)
    }

    pub async fn pending(&self) -> StoreResult<Vec<PendingEscrow>> {
        self.queue.pending().await
    }

    pub async fn dead(&self) -> StoreResult<Vec<DeadEscrow>> {
        self.queue.dead().await
    }
}

enum Outcome {
    Settled,
    Retry,
    Exhausted,
}
