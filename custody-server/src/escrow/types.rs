//! Escrow compensation queue entries

use serde::{Deserialize, Serialize};

/// Ledger call still owed for an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscrowOperation {
    /// Release escrowed funds to the seller after a completed sale
    Release { to_seller_id: String },
    /// Return escrowed funds to the buyer after an abandoned sale
    Refund,
}

impl EscrowOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Release { .. } => "release",
            Self::Refund => "refund",
        }
    }
}

/// Pending escrow queue entry, keyed by order id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEscrow {
    pub order_id: String,
    pub escrow_id: String,
    pub card_instance_id: String,
    pub operation: EscrowOperation,
    /// Ledger calls made so far, including the original one
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    /// Earliest time the reconciler may retry (Unix millis)
    pub next_attempt_at: i64,
}

/// Dead letter entry: retries exhausted, needs an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadEscrow {
    pub order_id: String,
    pub escrow_id: String,
    pub card_instance_id: String,
    pub operation: EscrowOperation,
    pub attempts: u32,
    pub last_error: String,
    pub created_at: i64,
    pub failed_at: i64,
}

impl DeadEscrow {
    pub fn from_pending(entry: PendingEscrow, failed_at: i64) -> Self {
        Self {
            order_id: entry.order_id,
            escrow_id: entry.escrow_id,
            card_instance_id: entry.card_instance_id,
            operation: entry.operation,
            attempts: entry.attempts,
            last_error: entry.last_error.unwrap_or_default(),
            created_at: entry.created_at,
            failed_at,
        }
    }

    /// Fresh pending entry due immediately
    pub fn revive(self, now: i64) -> PendingEscrow {
        PendingEscrow {
            order_id: self.order_id,
            escrow_id: self.escrow_id,
            card_instance_id: self.card_instance_id,
            operation: self.operation,
            attempts: 0,
            last_error: Some(self.last_error),
            created_at: self.created_at,
            next_attempt_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_format() {
        let op = EscrowOperation::Release {
            to_seller_id: "seller-1".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "release");
        assert_eq!(json["to_seller_id"], "seller-1");
        assert_eq!(EscrowOperation::Refund.name(), "refund");
    }

    #[test]
    fn test_dead_entry_revives_with_fresh_budget() {
        let pending = PendingEscrow {
            order_id: "O1".into(),
            escrow_id: "E1".into(),
            card_instance_id: "C1".into(),
            operation: EscrowOperation::Refund,
            attempts: 8,
            last_error: Some("ledger down".into()),
            created_at: 10,
            next_attempt_at: 20,
        };
        let dead = DeadEscrow::from_pending(pending, 30);
        assert_eq!(dead.last_error, "ledger down");

        let revived = dead.revive(40);
        assert_eq!(revived.attempts, 0);
        assert_eq!(revived.next_attempt_at, 40);
        assert_eq!(revived.created_at, 10);
    }
}
