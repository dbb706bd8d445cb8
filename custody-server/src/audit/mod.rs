//! 审计日志模块：托管状态变更的防篡改追踪
//!
//! # 架构
//!
//! ```text
//! 状态变更 (lock / unlock / complete_sale / repair ...)
//!   └─ CardInstanceStore::compare_and_transition()
//!        └─ 同一 redb 事务: 卡片行 + 锁索引 + 审计条目
//!
//! 无卡片变更的记录 (escrow 失败, 巡检告警)
//!   └─ AuditLog::append() (单独事务)
//!
//! SHA256 哈希链: genesis → entry₁ → entry₂ → ... → entryₙ
//! ```
//!
//! # 防篡改保证
//!
//! - **SHA256 哈希链**: 每条记录包含前一条的哈希
//! - **Append-only**: 无删除/更新接口
//! - **链验证 API**: `GET /api/audit/verify` 随时验证完整性

pub mod chain;
pub mod service;
pub mod types;

pub use chain::{GENESIS_HASH, compute_audit_hash, verify_entries};
pub use service::AuditService;
pub use types::{
    AuditAction, AuditChainBreak, AuditChainVerification, AuditDraft, AuditEntry,
    AuditListResponse, AuditQuery, ChainBreakKind,
};
