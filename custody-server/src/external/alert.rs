//! Operator alerts
//!
//! Alerts are fire-and-forget: a sink that cannot deliver logs the failure
//! and moves on, it never fails the custody operation that raised it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Integrity scan found orphaned locks at or above the threshold
    OrphanedLocks,
    /// Card sold but the seller was not paid
    EscrowReleaseFailed,
    /// Sale abandoned but the buyer was not refunded
    EscrowRefundFailed,
    /// Reconciler gave up on an escrow call
    EscrowReconcileExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    /// Audit entry recording the condition
    pub audit_entry_id: Option<u64>,
    pub card_instance_id: Option<String>,
    pub order_id: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: i64,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            audit_entry_id: None,
            card_instance_id: None,
            order_id: None,
            message: message.into(),
            details: serde_json::Value::Null,
            created_at: shared::util::now_millis(),
        }
    }

    pub fn critical(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(kind, AlertSeverity::Critical, message)
    }

    pub fn with_audit_entry(mut self, id: u64) -> Self {
        self.audit_entry_id = Some(id);
        self
    }

    pub fn with_card(mut self, card_instance_id: impl Into<String>) -> Self {
        self.card_instance_id = Some(card_instance_id.into());
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: Alert);
}

/// Writes alerts to the `alert` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn emit(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                target: "alert",
                kind = ?alert.kind,
                audit_entry_id = ?alert.audit_entry_id,
                card_instance_id = ?alert.card_instance_id,
                order_id = ?alert.order_id,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                target: "alert",
                kind = ?alert.kind,
                audit_entry_id = ?alert.audit_entry_id,
                "{}",
                alert.message
            ),
            AlertSeverity::Info => tracing::info!(
                target: "alert",
                kind = ?alert.kind,
                "{}",
                alert.message
            ),
        }
    }
}

/// In-process alert fan-out for subscribers (tests, admin stream)
#[derive(Debug, Clone)]
pub struct BroadcastAlertSink {
    tx: broadcast::Sender<Alert>,
}

impl BroadcastAlertSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastAlertSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl AlertSink for BroadcastAlertSink {
    async fn emit(&self, alert: Alert) {
        // 无订阅者时 send 返回 Err，属正常情况
        let _ = self.tx.send(alert);
    }
}

/// Delivers each alert to every inner sink in order
#[derive(Clone, Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn emit(&self, alert: Alert) {
        for sink in &self.sinks {
            sink.emit(alert.clone()).await;
        }
    }
}
