use shared::custody::{CardStatus, OrderStatus};
use shared::error::{AppError, ErrorCode};
use thiserror::Error;

use super::store::StoreError;
use crate::external::ExternalError;

/// Custody errors
///
/// Contention outcomes (`AlreadyLocked`, `NotLockHolder`, `TransitionConflict`)
/// are normal results of racing callers, not system failures.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Card already exists: {0}")]
    CardAlreadyExists(String),

    #[error("Card {card_instance_id} is already locked")]
    AlreadyLocked {
        card_instance_id: String,
        held_by: Option<String>,
    },

    #[error("Cannot {operation} card {card_instance_id} in status {status}")]
    InvalidTransition {
        card_instance_id: String,
        status: CardStatus,
        operation: &'static str,
    },

    #[error("Order {order_id} does not hold the lock on {card_instance_id}")]
    NotLockHolder {
        card_instance_id: String,
        order_id: String,
        held_by: Option<String>,
    },

    #[error("Card {card_instance_id} is not locked (status {status})")]
    NotLocked {
        card_instance_id: String,
        status: CardStatus,
    },

    #[error("Card {card_instance_id} changed concurrently: expected {expected}, found {actual}")]
    TransitionConflict {
        card_instance_id: String,
        expected: String,
        actual: CardStatus,
    },

    #[error("Order {order_id} already holds a lock on {card_instance_id}")]
    OrderHoldsLock {
        order_id: String,
        card_instance_id: String,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is not finalized (status {status})")]
    OrderNotFinalized {
        order_id: String,
        status: OrderStatus,
    },

    #[error("No card is locked by order {order_id}")]
    NoMatchingLock { order_id: String },

    /// Card is sold; the seller payout is queued for reconciliation
    #[error("Escrow {escrow_id} release failed for order {order_id}: {reason}")]
    EscrowReleaseFailed {
        card_instance_id: String,
        order_id: String,
        escrow_id: String,
        audit_entry_id: Option<u64>,
        reason: String,
    },

    /// Card is unlocked; the buyer refund is queued for reconciliation
    #[error("Escrow {escrow_id} refund failed for order {order_id}: {reason}")]
    EscrowRefundFailed {
        card_instance_id: String,
        order_id: String,
        escrow_id: String,
        audit_entry_id: Option<u64>,
        reason: String,
    },

    #[error("Card {0} has no inconsistent lock fields")]
    NotInconsistent(String),

    #[error("Actor {actor_id} is not an admin")]
    AdminRequired { actor_id: String },

    #[error("Escrow queue entry not found: {0}")]
    EscrowEntryNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order service error: {0}")]
    OrderService(#[source] ExternalError),

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),
}

pub type CustodyResult<T> = Result<T, CustodyError>;

impl CustodyError {
    /// Lock-state contention: lost a race, or the lock is held, missing, or already claimed by the order
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::AlreadyLocked { .. }
                | Self::NotLockHolder { .. }
                | Self::NotLocked { .. }
                | Self::TransitionConflict { .. }
                | Self::OrderHoldsLock { .. }
        )
    }
}

impl From<StoreError> for CustodyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::CardNotFound(id),
            StoreError::AlreadyExists(id) => Self::CardAlreadyExists(id),
            StoreError::Conflict {
                card_instance_id,
                expected,
                actual,
                ..
            } => Self::TransitionConflict {
                card_instance_id,
                expected,
                actual,
            },
            StoreError::OrderHoldsLock {
                order_id,
                card_instance_id,
            } => Self::OrderHoldsLock {
                order_id,
                card_instance_id,
            },
            StoreError::EscrowEntryNotFound(order_id) => Self::EscrowEntryNotFound(order_id),
            other => Self::Storage(other),
        }
    }
}

/// 存储错误分类（redb 错误按消息判断）
fn classify_storage_error(e: &StoreError) -> ErrorCode {
    let err_str = e.to_string().to_lowercase();
    if err_str.contains("corrupt") || err_str.contains("invalid database") {
        tracing::error!(error = %e, "Custody storage corrupted");
    }
    match e {
        StoreError::InvalidUpdate(_) => ErrorCode::InternalError,
        _ => ErrorCode::DatabaseError,
    }
}

impl From<CustodyError> for AppError {
    fn from(err: CustodyError) -> Self {
        let message = err.to_string();
        match err {
            CustodyError::CardNotFound(id) => {
                AppError::with_message(ErrorCode::CardNotFound, message).with_detail("card_instance_id", id)
            }
            CustodyError::CardAlreadyExists(id) => {
                AppError::with_message(ErrorCode::CardAlreadyExists, message)
                    .with_detail("card_instance_id", id)
            }
            CustodyError::AlreadyLocked {
                card_instance_id,
                held_by,
            } => AppError::with_message(ErrorCode::CardAlreadyLocked, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("held_by", held_by),
            CustodyError::InvalidTransition {
                card_instance_id,
                status,
                operation,
            } => AppError::with_message(ErrorCode::InvalidCardTransition, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("status", status.as_str())
                .with_detail("operation", operation),
            CustodyError::NotLockHolder {
                card_instance_id,
                order_id,
                held_by,
            } => AppError::with_message(ErrorCode::NotLockHolder, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("order_id", order_id)
                .with_detail("held_by", held_by),
            CustodyError::NotLocked {
                card_instance_id,
                status,
            } => AppError::with_message(ErrorCode::CardNotLocked, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("status", status.as_str()),
            CustodyError::TransitionConflict {
                card_instance_id,
                actual,
                ..
            } => AppError::with_message(ErrorCode::TransitionConflict, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("status", actual.as_str()),
            CustodyError::OrderHoldsLock {
                order_id,
                card_instance_id,
            } => AppError::with_message(ErrorCode::OrderHoldsLock, message)
                .with_detail("order_id", order_id)
                .with_detail("card_instance_id", card_instance_id),
            CustodyError::OrderNotFound(order_id) => {
                AppError::with_message(ErrorCode::OrderNotFound, message).with_detail("order_id", order_id)
            }
            CustodyError::OrderNotFinalized { order_id, status } => {
                AppError::with_message(ErrorCode::OrderNotFinalized, message)
                    .with_detail("order_id", order_id)
                    .with_detail("status", serde_json::to_value(status).unwrap_or_default())
            }
            CustodyError::NoMatchingLock { order_id } => {
                AppError::with_message(ErrorCode::NoMatchingLock, message).with_detail("order_id", order_id)
            }
            CustodyError::EscrowReleaseFailed {
                card_instance_id,
                order_id,
                escrow_id,
                audit_entry_id,
                ..
            } => AppError::with_message(ErrorCode::EscrowReleaseFailed, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("order_id", order_id)
                .with_detail("escrow_id", escrow_id)
                .with_detail("audit_entry_id", audit_entry_id),
            CustodyError::EscrowRefundFailed {
                card_instance_id,
                order_id,
                escrow_id,
                audit_entry_id,
                ..
            } => AppError::with_message(ErrorCode::EscrowRefundFailed, message)
                .with_detail("card_instance_id", card_instance_id)
                .with_detail("order_id", order_id)
                .with_detail("escrow_id", escrow_id)
                .with_detail("audit_entry_id", audit_entry_id),
            CustodyError::NotInconsistent(id) => {
                AppError::with_message(ErrorCode::CardNotInconsistent, message)
                    .with_detail("card_instance_id", id)
            }
            CustodyError::AdminRequired { .. } => AppError::with_message(ErrorCode::AdminRequired, message),
            CustodyError::EscrowEntryNotFound(order_id) => {
                AppError::with_message(ErrorCode::EscrowEntryNotFound, message)
                    .with_detail("order_id", order_id)
            }
            CustodyError::Validation(msg) => AppError::validation(msg),
            CustodyError::OrderService(e) => {
                tracing::warn!(error = %e, "Order service call failed");
                AppError::with_message(ErrorCode::OrderServiceUnavailable, message)
            }
            CustodyError::Storage(e) => {
                tracing::error!(error = %e, "Custody storage error");
                AppError::with_message(classify_storage_error(&e), message)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        CustodyError::from(err).into()
    }
}
