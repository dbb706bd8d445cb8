//! External collaborators
//!
//! | Trait | Production | In-memory |
//! |-------|------------|-----------|
//! | [`OrderService`] | [`HttpOrderService`] | [`InMemoryOrderService`] |
//! | [`LedgerService`] | [`HttpLedgerService`] | [`InMemoryLedgerService`] |
//! | [`AlertSink`] | [`WebhookAlertSink`], [`TracingAlertSink`] | [`BroadcastAlertSink`] |
//!
//! The custody core only reads orders and only asks the ledger to move
//! escrowed funds; it never owns either.

pub mod alert;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use shared::custody::OrderInfo;
use thiserror::Error;

pub use alert::{
    Alert, AlertKind, AlertSeverity, AlertSink, BroadcastAlertSink, FanoutAlertSink,
    TracingAlertSink,
};
pub use http::{HttpLedgerService, HttpOrderService, WebhookAlertSink};
pub use memory::{InMemoryLedgerService, InMemoryOrderService, LedgerCall};

/// Failure talking to an external service
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the operation
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Read-only view of the order system
#[async_trait]
pub trait OrderService: Send + Sync {
    /// `Ok(None)` when the order does not exist
    async fn get_order(&self, order_id: &str) -> Result<Option<OrderInfo>, ExternalError>;
}

/// Escrow ledger operations
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn release_escrow(&self, escrow_id: &str, to_seller_id: &str)
    -> Result<(), ExternalError>;

    async fn refund_escrow(&self, escrow_id: &str) -> Result<(), ExternalError>;
}
