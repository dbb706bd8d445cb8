//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::CardNotFound
            | Self::NoMatchingLock
            | Self::EscrowEntryNotFound
            | Self::OrderNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict (contention is an expected business outcome)
            Self::AlreadyExists
            | Self::CardAlreadyExists
            | Self::CardAlreadyLocked
            | Self::NotLockHolder
            | Self::CardNotLocked
            | Self::InvalidCardTransition
            | Self::OrderHoldsLock
            | Self::CardNotInconsistent
            | Self::TransitionConflict
            | Self::OrderNotFinalized => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated | Self::ActorInvalid => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            Self::PermissionDenied | Self::AdminRequired => StatusCode::FORBIDDEN,

            // 502 Bad Gateway (post-commit failure in a downstream ledger)
            Self::EscrowReleaseFailed | Self::EscrowRefundFailed => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::OrderServiceUnavailable | Self::NetworkError | Self::TimeoutError => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            Self::InternalError
            | Self::Unknown
            | Self::DatabaseError
            | Self::ConfigError
            | Self::AuditChainBroken => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            Self::ValidationFailed
            | Self::InvalidRequest
            | Self::InvalidFormat
            | Self::RequiredField => StatusCode::BAD_REQUEST,
        }
    }
}
