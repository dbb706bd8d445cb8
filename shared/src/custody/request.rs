//! Custody requests and results
//!
//! `CustodyRequest` is the closed set of operations callers may invoke; it is
//! matched exhaustively by the custody service, never dispatched on strings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::card::{CardInstance, CardStatus, NewCard};
use super::lane::{SaleLaneDecision, SellerTrustTier};
use super::order::OrderStatus;

/// Operations exposed by the custody service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CustodyRequest {
    Lock {
        card_instance_id: String,
        order_id: String,
    },
    Unlock {
        card_instance_id: String,
        order_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    DetermineLane {
        seller_trust_tier: SellerTrustTier,
        declared_value: Decimal,
        #[serde(default)]
        prior_dispute_count: u32,
    },
    CompleteSale {
        order_id: String,
        escrow_id: String,
    },
    /// Order cancelled or failed upstream: unlock, then refund escrow if any
    AbandonSale {
        card_instance_id: String,
        order_id: String,
        #[serde(default)]
        escrow_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    RegisterCard {
        card: NewCard,
    },
    /// Admin only
    IntegrityCheck,
    /// Admin only
    Repair {
        repair_type: RepairType,
    },
}

impl CustodyRequest {
    /// Wire name, used for logging only
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Lock { .. } => "lock",
            Self::Unlock { .. } => "unlock",
            Self::DetermineLane { .. } => "determine_lane",
            Self::CompleteSale { .. } => "complete_sale",
            Self::AbandonSale { .. } => "abandon_sale",
            Self::RegisterCard { .. } => "register_card",
            Self::IntegrityCheck => "integrity_check",
            Self::Repair { .. } => "repair",
        }
    }

    /// Requests that must present an admin capability
    pub fn requires_admin(&self) -> bool {
        matches!(self, Self::IntegrityCheck | Self::Repair { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairType {
    UnlockOrphans,
    FixStatus { card_instance_id: String },
}

/// Typed result of a dispatched request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CustodyResponse {
    Locked(LockReceipt),
    Unlocked(UnlockReceipt),
    Lane(SaleLaneDecision),
    SaleCompleted(CompletionReceipt),
    SaleAbandoned(AbandonReceipt),
    Registered(CardInstance),
    Integrity(IntegrityReport),
    Repaired(RepairSummary),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockReceipt {
    pub card: CardInstance,
    pub audit_entry_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockReceipt {
    pub card: CardInstance,
    /// Status the card returned to
    pub restored_status: CardStatus,
    pub audit_entry_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReceipt {
    pub card: CardInstance,
    pub order_id: String,
    pub escrow_id: String,
    /// Owner before the sale; escrow funds were released to this account
    pub seller_id: String,
    pub audit_entry_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonReceipt {
    pub unlock: UnlockReceipt,
    /// Escrow refunded, when one was supplied
    pub refunded_escrow_id: Option<String>,
}

// ========== Integrity ==========

/// Lock whose order will never complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedLock {
    pub card_instance_id: String,
    pub order_id: String,
    pub locked_at: Option<i64>,
    /// `None` when the order service does not know the order
    pub order_status: Option<OrderStatus>,
}

/// Lock older than the configured timeout, whatever its order status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleLock {
    pub card_instance_id: String,
    pub order_id: Option<String>,
    pub locked_at: i64,
    pub age_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// `locked_at` set while `locked_by_order_id` is null
    LockTimestampWithoutOrder,
    /// Order → card lock index disagrees with the card row
    LockIndexMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InconsistentCard {
    pub card_instance_id: String,
    pub status: CardStatus,
    pub kind: InconsistencyKind,
    pub locked_at: Option<i64>,
    pub locked_by_order_id: Option<String>,
}

/// Locked card whose order could not be checked during the scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnverifiedLock {
    pub card_instance_id: String,
    pub order_id: String,
    pub error: String,
}

/// Advisory output of an integrity scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub scanned_at: i64,
    /// Locked cards examined
    pub locked_cards_scanned: usize,
    pub orphaned_locks: Vec<OrphanedLock>,
    pub stale_locks_beyond_timeout: Vec<StaleLock>,
    pub inconsistent: Vec<InconsistentCard>,
    pub unverified: Vec<UnverifiedLock>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_locks.is_empty()
            && self.stale_locks_beyond_timeout.is_empty()
            && self.inconsistent.is_empty()
    }
}

// ========== Repair ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSkip {
    pub card_instance_id: String,
    pub reason: String,
}

/// Machine-readable summary of a repair run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairSummary {
    /// `unlock_orphans` or `fix_status`
    pub repair_type: String,
    pub candidates: usize,
    pub fixed: usize,
    pub fixed_card_ids: Vec<String>,
    pub skipped: Vec<RepairSkip>,
    pub audit_entry_ids: Vec<u64>,
}
