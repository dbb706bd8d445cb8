//! Integrity auditor
//!
//! Read-only scan for locks that can no longer resolve on their own. Never
//! writes; repairs go through [`super::repair::RepairExecutor`].
//!
//! | Finding | Condition |
//! |---------|-----------|
//! | orphaned lock | locked card whose order is missing, `cancelled` or `failed` |
//! | stale lock | `locked_at` older than the configured timeout |
//! | inconsistent | `locked_at` without an order, or row / lock index disagree |
//! | unverified | order service could not answer for a locked card |

use futures::stream::{self, StreamExt};
use shared::custody::{
    CardInstance, InconsistencyKind, InconsistentCard, IntegrityReport, OrphanedLock, StaleLock,
    UnverifiedLock,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::CustodyResult;
use super::store::CardInstanceStore;
use crate::external::OrderService;

/// 24h
pub const DEFAULT_STALE_LOCK_TIMEOUT_MS: i64 = 24 * 60 * 60 * 1000;

/// Concurrent order-service lookups per scan
const ORDER_LOOKUP_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct IntegrityAuditor {
    store: Arc<dyn CardInstanceStore>,
    orders: Arc<dyn OrderService>,
    stale_lock_timeout_ms: i64,
}

enum OrderCheck {
    Live,
    Orphaned(OrphanedLock),
    Unverified(UnverifiedLock),
}

impl IntegrityAuditor {
    pub fn new(
        store: Arc<dyn CardInstanceStore>,
        orders: Arc<dyn OrderService>,
        stale_lock_timeout_ms: i64,
    ) -> Self {
        Self {
            store,
            orders,
            stale_lock_timeout_ms,
        }
    }

    pub fn stale_lock_timeout_ms(&self) -> i64 {
        self.stale_lock_timeout_ms
    }

    /// Scan every card as of `now` (Unix millis)
    pub async fn scan(&self, now: i64) -> CustodyResult<IntegrityReport> {
        let cards = self.store.list_all().await?;
        let index: HashMap<String, String> = self.store.lock_index().await?.into_iter().collect();
        let by_id: HashMap<&str, &CardInstance> = cards.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut report = IntegrityReport {
            scanned_at: now,
            ..Default::default()
        };
        let mut to_verify = Vec::new();

        for card in &cards {
            if card.has_orphaned_lock_timestamp() {
                report.inconsistent.push(inconsistent(card, InconsistencyKind::LockTimestampWithoutOrder));
            }

            if let Some(locked_at) = card.locked_at {
                let age_ms = now - locked_at;
                if age_ms > self.stale_lock_timeout_ms {
                    report.stale_locks_beyond_timeout.push(StaleLock {
                        card_instance_id: card.id.clone(),
                        order_id: card.locked_by_order_id.clone(),
                        locked_at,
                        age_ms,
                    });
                }
            }

            match (card.is_locked(), card.locked_by_order_id.as_deref()) {
                (true, Some(order_id)) => {
                    report.locked_cards_scanned += 1;
                    if index.get(order_id).map(String::as_str) != Some(card.id.as_str()) {
                        report.inconsistent.push(inconsistent(card, InconsistencyKind::LockIndexMismatch));
                    }
                    to_verify.push(card.clone());
                }
                (true, None) => report.locked_cards_scanned += 1,
                // 非锁定状态却带订单号
                (false, Some(_)) => {
                    report.inconsistent.push(inconsistent(card, InconsistencyKind::LockIndexMismatch));
                }
                (false, None) => {}
            }
        }

        // 索引指向的卡片并未被该订单锁定
        for (order_id, card_id) in &index {
            let holds = by_id.get(card_id.as_str()).is_some_and(|c| c.is_locked_by(order_id));
            if holds {
                continue;
            }
            let already_flagged = report
                .inconsistent
                .iter()
                .any(|i| i.card_instance_id == *card_id && i.kind == InconsistencyKind::LockIndexMismatch);
            if !already_flagged {
                report.inconsistent.push(InconsistentCard {
                    card_instance_id: card_id.clone(),
                    status: by_id
                        .get(card_id.as_str())
                        .map(|c| c.status)
                        .unwrap_or(shared::custody::CardStatus::InVault),
                    kind: InconsistencyKind::LockIndexMismatch,
                    locked_at: by_id.get(card_id.as_str()).and_then(|c| c.locked_at),
                    locked_by_order_id: Some(order_id.clone()),
                });
            }
        }

        let checks: Vec<OrderCheck> = stream::iter(to_verify)
            .map(|card| self.check_order(card))
            .buffer_unordered(ORDER_LOOKUP_CONCURRENCY)
            .collect()
            .await;
        for check in checks {
            match check {
                OrderCheck::Live => {}
                OrderCheck::Orphaned(orphan) => report.orphaned_locks.push(orphan),
                OrderCheck::Unverified(unverified) => report.unverified.push(unverified),
            }
        }

        report.orphaned_locks.sort_by(|a, b| a.card_instance_id.cmp(&b.card_instance_id));
        report.unverified.sort_by(|a, b| a.card_instance_id.cmp(&b.card_instance_id));
        report
            .stale_locks_beyond_timeout
            .sort_by(|a, b| a.card_instance_id.cmp(&b.card_instance_id));
        report
            .inconsistent
            .sort_by(|a, b| a.card_instance_id.cmp(&b.card_instance_id));

        if report.is_clean() {
            tracing::debug!(locked = report.locked_cards_scanned, "Integrity scan clean");
        } else {
            tracing::warn!(
                locked = report.locked_cards_scanned,
                orphaned = report.orphaned_locks.len(),
                stale = report.stale_locks_beyond_timeout.len(),
                inconsistent = report.inconsistent.len(),
                unverified = report.unverified.len(),
                "Integrity scan found problems"
            );
        }
        Ok(report)
    }

    async fn check_order(&self, card: CardInstance) -> OrderCheck {
        let Some(order_id) = card.locked_by_order_id else {
            return OrderCheck::Live;
        };
        match self.orders.get_order(&order_id).await {
            Ok(None) => OrderCheck::Orphaned(OrphanedLock {
                card_instance_id: card.id,
                order_id,
                locked_at: card.locked_at,
                order_status: None,
            }),
            Ok(Some(order)) if order.status.is_abandoned() => OrderCheck::Orphaned(OrphanedLock {
                card_instance_id: card.id,
                order_id,
                locked_at: card.locked_at,
                order_status: Some(order.status),
            }),
            Ok(Some(_)) => OrderCheck::Live,
            Err(e) => {
                tracing::warn!(
                    card_instance_id = %card.id,
                    order_id = %order_id,
                    error = %e,
                    "Order lookup failed during integrity scan"
                );
                OrderCheck::Unverified(UnverifiedLock {
                    card_instance_id: card.id,
                    order_id,
                    error: e.to_string(),
                })
            }
        }
    }
}

fn inconsistent(card: &CardInstance, kind: InconsistencyKind) -> InconsistentCard {
    InconsistentCard {
        card_instance_id: card.id.clone(),
        status: card.status,
        kind,
        locked_at: card.locked_at,
        locked_by_order_id: card.locked_by_order_id.clone(),
    }
}
