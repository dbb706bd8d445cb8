//! Storage seams for custody state
//!
//! | Trait | Owns |
//! |-------|------|
//! | [`CardInstanceStore`] | card rows, order→card lock index, per-transition audit |
//! | [`AuditLog`] | append-only hash chained audit log |
//! | [`EscrowQueue`] | pending / dead escrow compensation entries |
//!
//! Every state change goes through [`CardInstanceStore::compare_and_transition`],
//! which validates the expected state, writes the new row, maintains the lock
//! index and appends the audit entry in one transaction.

use async_trait::async_trait;
use shared::custody::{CardInstance, CardStatus};
use thiserror::Error;

use crate::audit::{AuditChainVerification, AuditDraft, AuditEntry, AuditQuery};
use crate::escrow::{DeadEscrow, PendingEscrow};

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Card not found: {0}")]
    NotFound(String),

    #[error("Card already exists: {0}")]
    AlreadyExists(String),

    /// Compare-and-transition lost: the row no longer matches the expectation
    #[error("Transition conflict on {card_instance_id}: expected {expected}, found {actual}")]
    Conflict {
        card_instance_id: String,
        expected: String,
        actual: CardStatus,
        locked_by_order_id: Option<String>,
    },

    #[error("Order {order_id} already holds a lock on {card_instance_id}")]
    OrderHoldsLock {
        order_id: String,
        card_instance_id: String,
    },

    #[error("Invalid card update: {0}")]
    InvalidUpdate(String),

    #[error("Escrow entry not found: {0}")]
    EscrowEntryNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row state a transition is conditioned on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// Status matches, lock holder irrelevant
    Status(CardStatus),
    /// Locked, and by exactly this order
    LockedBy(String),
    /// Status matches and no order holds the row
    Unclaimed(CardStatus),
}

impl Expected {
    pub fn status(&self) -> CardStatus {
        match self {
            Self::Status(status) | Self::Unclaimed(status) => *status,
            Self::LockedBy(_) => CardStatus::Locked,
        }
    }

    pub fn matches(&self, card: &CardInstance) -> bool {
        match self {
            Self::Status(status) => card.status == *status,
            Self::LockedBy(order_id) => card.is_locked_by(order_id),
            Self::Unclaimed(status) => card.status == *status && card.locked_by_order_id.is_none(),
        }
    }
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(f, "{}", status),
            Self::LockedBy(order_id) => write!(f, "locked by {}", order_id),
            Self::Unclaimed(status) => write!(f, "{} without lock holder", status),
        }
    }
}

/// Lock installed by a transition into `locked`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClaim {
    pub order_id: String,
    pub reason: String,
    pub locked_at: i64,
    pub pre_lock_status: CardStatus,
}

/// Field changes carried by a transition
///
/// Lock fields are always rewritten: `lock: None` clears all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardUpdate {
    pub lock: Option<LockClaim>,
    pub owner_id: Option<String>,
}

impl CardUpdate {
    pub fn lock(claim: LockClaim) -> Self {
        Self {
            lock: Some(claim),
            owner_id: None,
        }
    }

    /// Clear every lock field
    pub fn release() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Build the next row, rejecting lock fields that disagree with the status
    pub fn apply(
        &self,
        card: &CardInstance,
        new_status: CardStatus,
        now: i64,
    ) -> StoreResult<CardInstance> {
        match (&self.lock, new_status) {
            (None, CardStatus::Locked) => {
                return Err(StoreError::InvalidUpdate(
                    "transition into locked requires a lock claim".into(),
                ));
            }
            (Some(_), status) if status != CardStatus::Locked => {
                return Err(StoreError::InvalidUpdate(format!(
                    "lock claim on transition into {}",
                    status
                )));
            }
            _ => {}
        }

        let mut next = card.clone();
        next.status = new_status;
        next.updated_at = now;
        match &self.lock {
            Some(claim) => {
                next.locked_at = Some(claim.locked_at);
                next.lock_reason = Some(claim.reason.clone());
                next.locked_by_order_id = Some(claim.order_id.clone());
                next.pre_lock_status = Some(claim.pre_lock_status);
            }
            None => {
                next.locked_at = None;
                next.lock_reason = None;
                next.locked_by_order_id = None;
                next.pre_lock_status = None;
            }
        }
        if let Some(owner_id) = &self.owner_id {
            next.owner_id = owner_id.clone();
        }
        Ok(next)
    }
}

/// Result of a committed transition
#[derive(Debug, Clone)]
pub struct Transition {
    pub card: CardInstance,
    pub audit: AuditEntry,
}

/// Card persistence with atomic conditional transitions
#[async_trait]
pub trait CardInstanceStore: Send + Sync {
    async fn get(&self, card_instance_id: &str) -> StoreResult<Option<CardInstance>>;

    /// Intake a new card and audit it in one transaction
    async fn insert(&self, card: CardInstance, audit: AuditDraft) -> StoreResult<Transition>;

    /// Conditional write: fails with [`StoreError::Conflict`] when the row no
    /// longer matches `expected`. At most one of any set of racing callers
    /// with the same expectation succeeds.
    async fn compare_and_transition(
        &self,
        card_instance_id: &str,
        expected: Expected,
        new_status: CardStatus,
        update: CardUpdate,
        audit: AuditDraft,
    ) -> StoreResult<Transition>;

    /// Card currently locked by `order_id`, via the lock index
    async fn find_by_lock_order(&self, order_id: &str) -> StoreResult<Option<CardInstance>>;

    async fn list_by_status(&self, status: CardStatus) -> StoreResult<Vec<CardInstance>>;

    /// Every card row (integrity scan)
    async fn list_all(&self) -> StoreResult<Vec<CardInstance>>;

    /// Raw `(order_id, card_instance_id)` lock index entries
    async fn lock_index(&self) -> StoreResult<Vec<(String, String)>>;
}

/// Append-only audit log
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an entry not tied to a card transition
    async fn append(&self, audit: AuditDraft) -> StoreResult<AuditEntry>;

    /// Filtered page plus total match count, newest first
    async fn query(&self, query: &AuditQuery) -> StoreResult<(Vec<AuditEntry>, u64)>;

    /// Full history of one card, oldest first
    async fn entries_for_card(&self, card_instance_id: &str) -> StoreResult<Vec<AuditEntry>>;

    async fn verify_chain(&self) -> StoreResult<AuditChainVerification>;
}

/// Durable queue of escrow calls that still owe the ledger a retry
#[async_trait]
pub trait EscrowQueue: Send + Sync {
    /// Queue a failed escrow call together with its failure audit entry
    async fn enqueue(&self, entry: PendingEscrow, audit: AuditDraft) -> StoreResult<AuditEntry>;

    async fn pending(&self) -> StoreResult<Vec<PendingEscrow>>;

    /// Persist updated retry bookkeeping
    async fn reschedule(&self, entry: &PendingEscrow) -> StoreResult<()>;

    /// Drop a settled entry and audit the settlement
    async fn resolve(&self, order_id: &str, audit: AuditDraft) -> StoreResult<AuditEntry>;

    /// Move an exhausted entry to the dead queue and audit it
    async fn bury(&self, dead: DeadEscrow, audit: AuditDraft) -> StoreResult<AuditEntry>;

    async fn dead(&self) -> StoreResult<Vec<DeadEscrow>>;

    /// Move a dead entry back to pending with a fresh retry budget
    ///
    /// The draft is completed with the entry's card id and details and
    /// appended in the same transaction.
    async fn requeue(
        &self,
        order_id: &str,
        now: i64,
        audit: AuditDraft,
    ) -> StoreResult<(PendingEscrow, AuditEntry)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn card(status: CardStatus) -> CardInstance {
        CardInstance {
            id: "C1".into(),
            owner_id: "seller-1".into(),
            status,
            locked_at: None,
            lock_reason: None,
            locked_by_order_id: None,
            pre_lock_status: None,
            declared_value: Decimal::new(100, 0),
            created_at: 1,
            updated_at: 1,
        }
    }

    fn claim() -> LockClaim {
        LockClaim {
            order_id: "O1".into(),
            reason: "sale_pending".into(),
            locked_at: 42,
            pre_lock_status: CardStatus::Listed,
        }
    }

    #[test]
    fn test_lock_update_sets_all_fields() {
        let next = CardUpdate::lock(claim())
            .apply(&card(CardStatus::Listed), CardStatus::Locked, 42)
            .unwrap();
        assert!(next.is_locked_by("O1"));
        assert_eq!(next.locked_at, Some(42));
        assert_eq!(next.pre_lock_status, Some(CardStatus::Listed));
        assert_eq!(next.updated_at, 42);
    }

    #[test]
    fn test_release_clears_all_fields() {
        let locked = CardUpdate::lock(claim())
            .apply(&card(CardStatus::Listed), CardStatus::Locked, 42)
            .unwrap();
        let next = CardUpdate::release()
            .with_owner("buyer-1")
            .apply(&locked, CardStatus::Sold, 50)
            .unwrap();
        assert_eq!(next.status, CardStatus::Sold);
        assert_eq!(next.owner_id, "buyer-1");
        assert!(next.locked_at.is_none());
        assert!(next.lock_reason.is_none());
        assert!(next.locked_by_order_id.is_none());
        assert!(next.pre_lock_status.is_none());
    }

    #[test]
    fn test_lock_fields_must_agree_with_status() {
        let base = card(CardStatus::InVault);
        assert!(matches!(
            CardUpdate::release().apply(&base, CardStatus::Locked, 1),
            Err(StoreError::InvalidUpdate(_))
        ));
        assert!(matches!(
            CardUpdate::lock(claim()).apply(&base, CardStatus::Sold, 1),
            Err(StoreError::InvalidUpdate(_))
        ));
    }

    #[test]
    fn test_expected_matching() {
        let mut locked = card(CardStatus::Locked);
        locked.locked_by_order_id = Some("O1".into());

        assert!(Expected::LockedBy("O1".into()).matches(&locked));
        assert!(!Expected::LockedBy("O2".into()).matches(&locked));
        assert!(Expected::Status(CardStatus::Locked).matches(&locked));
        assert!(!Expected::Unclaimed(CardStatus::Locked).matches(&locked));

        let mut residue = card(CardStatus::InVault);
        residue.locked_at = Some(10);
        assert!(Expected::Unclaimed(CardStatus::InVault).matches(&residue));
    }
}
