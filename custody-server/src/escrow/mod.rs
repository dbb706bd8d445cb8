//! 托管资金补偿
//!
//! 销售完成（或放弃）后的 ledger 调用失败不会回滚卡片状态，
//! 而是写入 `pending_escrow` 队列，由 [`EscrowReconciler`] 按退避重试。

pub mod types;
pub mod worker;

pub use types::{DeadEscrow, EscrowOperation, PendingEscrow};
pub use worker::{
    EscrowReconciler, MAX_RECONCILE_ATTEMPTS, ReconcileStats, backoff_delay_ms,
};
