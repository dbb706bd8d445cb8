//! Shared types for the card custody service
//!
//! Common types used by the custody server and its callers: the unified
//! error system, custody domain models and the request/response enums.

pub mod custody;
pub mod error;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use custody::{Actor, ActorType, CardInstance, CardStatus, CustodyRequest, CustodyResponse};
pub use error::{ApiResponse, AppError, AppResult, ErrorCode};
