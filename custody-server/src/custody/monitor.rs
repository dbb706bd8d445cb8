//! 周期巡检
//!
//! 定时运行 [`IntegrityAuditor::scan`]，孤儿锁数量超过阈值时写一条系统级
//! `integrity_alert` 审计并发出告警。只报告，从不修复。

use serde_json::json;
use shared::custody::{Actor, IntegrityReport};
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::CustodyResult;
use super::integrity::IntegrityAuditor;
use super::store::AuditLog;
use crate::audit::{AuditAction, AuditDraft};
use crate::external::{Alert, AlertKind, AlertSink};

/// Outcome of one monitor pass
#[derive(Debug, Clone)]
pub struct MonitorPass {
    pub report: IntegrityReport,
    /// Set when the pass raised an alert
    pub alert_audit_entry_id: Option<u64>,
}

#[derive(Clone)]
pub struct IntegrityMonitor {
    auditor: IntegrityAuditor,
    audit: Arc<dyn AuditLog>,
    alerts: Arc<dyn AlertSink>,
    orphan_threshold: usize,
    interval: Duration,
    actor: Actor,
}

impl IntegrityMonitor {
    pub fn new(
        auditor: IntegrityAuditor,
        audit: Arc<dyn AuditLog>,
        alerts: Arc<dyn AlertSink>,
        orphan_threshold: usize,
        interval: Duration,
    ) -> Self {
        Self {
            auditor,
            audit,
            alerts,
            orphan_threshold,
            interval,
            actor: Actor::system("integrity-monitor"),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            orphan_threshold = self.orphan_threshold,
            "IntegrityMonitor started"
        );

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("IntegrityMonitor received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.check(now_millis()).await {
                        tracing::error!(error = %e, "Integrity monitor pass failed");
                    }
                }
            }
        }
    }

    /// Scan once and alert when orphans exceed the threshold
    pub async fn check(&self, now: i64) -> CustodyResult<MonitorPass> {
        let report = self.auditor.scan(now).await?;
        let orphans = report.orphaned_locks.len();
        if orphans <= self.orphan_threshold {
            return Ok(MonitorPass {
                report,
                alert_audit_entry_id: None,
            });
        }

        let order_ids: Vec<&str> = report.orphaned_locks.iter().map(|o| o.order_id.as_str()).collect();
        let card_ids: Vec<&str> = report
            .orphaned_locks
            .iter()
            .map(|o| o.card_instance_id.as_str())
            .collect();
        let details = json!({
            "orphaned": orphans,
            "stale": report.stale_locks_beyond_timeout.len(),
            "inconsistent": report.inconsistent.len(),
            "unverified": report.unverified.len(),
            "threshold": self.orphan_threshold,
            "card_instance_ids": card_ids,
            "order_ids": order_ids,
        });

        let entry = self
            .audit
            .append(
                AuditDraft::system(AuditAction::IntegrityAlert, &self.actor)
                    .reason("orphaned_locks_above_threshold")
                    .metadata(details.clone()),
            )
            .await?;

        self.alerts
            .emit(
                Alert::critical(
                    AlertKind::OrphanedLocks,
                    format!("{} orphaned lock(s) found by integrity scan", orphans),
                )
                .with_audit_entry(entry.id)
                .with_details(details),
            )
            .await;

        tracing::warn!(
            orphaned = orphans,
            threshold = self.orphan_threshold,
            audit_entry_id = entry.id,
            "Orphaned locks above threshold"
        );
        Ok(MonitorPass {
            report,
            alert_audit_entry_id: Some(entry.id),
        })
    }
}
