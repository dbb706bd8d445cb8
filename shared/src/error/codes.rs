//! Unified error codes for the custody service
//!
//! Error codes are shared by the custody server, its HTTP callers and any
//! storefront translating failures into user-facing messages:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Custody / lock errors
//! - 5xxx: Escrow errors
//! - 6xxx: Order oracle errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Serialized as a bare `u16` so every client can switch on the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Invalid format
    InvalidFormat = 6,
    /// Required field missing
    RequiredField = 7,

    // ==================== 1xxx: Auth ====================
    /// Caller identity missing
    NotAuthenticated = 1001,
    /// Caller identity headers malformed
    ActorInvalid = 1002,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Admin capability required
    AdminRequired = 2003,

    // ==================== 4xxx: Custody ====================
    /// Card instance not found
    CardNotFound = 4001,
    /// Card instance already registered
    CardAlreadyExists = 4002,
    /// Card is locked by another order
    CardAlreadyLocked = 4003,
    /// Unlock attempted by an order that does not hold the lock
    NotLockHolder = 4004,
    /// Card is not locked
    CardNotLocked = 4005,
    /// Card status does not allow the requested transition
    InvalidCardTransition = 4006,
    /// No card is locked by the given order
    NoMatchingLock = 4007,
    /// Order already holds a lock on another card
    OrderHoldsLock = 4008,
    /// Card is not in the inconsistent state a repair expects
    CardNotInconsistent = 4009,
    /// Concurrent writer changed the card first
    TransitionConflict = 4010,

    // ==================== 5xxx: Escrow ====================
    /// Escrow release failed after the card was sold
    EscrowReleaseFailed = 5001,
    /// Escrow refund failed after the card was unlocked
    EscrowRefundFailed = 5002,
    /// Reconciliation entry not found
    EscrowEntryNotFound = 5003,

    // ==================== 6xxx: Order ====================
    /// Order not found in the order service
    OrderNotFound = 6001,
    /// Order is not in a terminal success state
    OrderNotFinalized = 6002,
    /// Order service could not be reached
    OrderServiceUnavailable = 6003,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9003,
    /// Network error
    NetworkError = 9101,
    /// Timeout error
    TimeoutError = 9102,
    /// Audit hash chain verification failed
    AuditChainBroken = 9201,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this code represents success
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Get the default English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            Self::Success => "Operation completed successfully",
            Self::Unknown => "Unknown error",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::InvalidRequest => "Invalid request",
            Self::InvalidFormat => "Invalid format",
            Self::RequiredField => "Required field missing",

            // Auth
            Self::NotAuthenticated => "Caller identity required",
            Self::ActorInvalid => "Caller identity is invalid",

            // Permission
            Self::PermissionDenied => "Permission denied",
            Self::AdminRequired => "Admin capability required",

            // Custody
            Self::CardNotFound => "Card instance not found",
            Self::CardAlreadyExists => "Card instance already exists",
            Self::CardAlreadyLocked => "Card is already locked by another order",
            Self::NotLockHolder => "Order does not hold the lock on this card",
            Self::CardNotLocked => "Card is not locked",
            Self::InvalidCardTransition => "Card status does not allow this operation",
            Self::NoMatchingLock => "No card is locked by this order",
            Self::OrderHoldsLock => "Order already holds a lock on another card",
            Self::CardNotInconsistent => "Card is not in an inconsistent lock state",
            Self::TransitionConflict => "Card was modified concurrently",

            // Escrow
            Self::EscrowReleaseFailed => "Escrow release failed, reconciliation queued",
            Self::EscrowRefundFailed => "Escrow refund failed, reconciliation queued",
            Self::EscrowEntryNotFound => "Escrow reconciliation entry not found",

            // Order
            Self::OrderNotFound => "Order not found",
            Self::OrderNotFinalized => "Order is not finalized",
            Self::OrderServiceUnavailable => "Order service unavailable",

            // System
            Self::InternalError => "Internal server error",
            Self::DatabaseError => "Database error",
            Self::ConfigError => "Configuration error",
            Self::NetworkError => "Network error",
            Self::TimeoutError => "Operation timed out",
            Self::AuditChainBroken => "Audit chain verification failed",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

/// Error returned when a u16 value doesn't map to a valid ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidFormat),
            7 => Ok(ErrorCode::RequiredField),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1002 => Ok(ErrorCode::ActorInvalid),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2003 => Ok(ErrorCode::AdminRequired),

            // Custody
            4001 => Ok(ErrorCode::CardNotFound),
            4002 => Ok(ErrorCode::CardAlreadyExists),
            4003 => Ok(ErrorCode::CardAlreadyLocked),
            4004 => Ok(ErrorCode::NotLockHolder),
            4005 => Ok(ErrorCode::CardNotLocked),
            4006 => Ok(ErrorCode::InvalidCardTransition),
            4007 => Ok(ErrorCode::NoMatchingLock),
            4008 => Ok(ErrorCode::OrderHoldsLock),
            4009 => Ok(ErrorCode::CardNotInconsistent),
            4010 => Ok(ErrorCode::TransitionConflict),

            // Escrow
            5001 => Ok(ErrorCode::EscrowReleaseFailed),
            5002 => Ok(ErrorCode::EscrowRefundFailed),
            5003 => Ok(ErrorCode::EscrowEntryNotFound),

            // Order
            6001 => Ok(ErrorCode::OrderNotFound),
            6002 => Ok(ErrorCode::OrderNotFinalized),
            6003 => Ok(ErrorCode::OrderServiceUnavailable),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::ConfigError),
            9101 => Ok(ErrorCode::NetworkError),
            9102 => Ok(ErrorCode::TimeoutError),
            9201 => Ok(ErrorCode::AuditChainBroken),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}
