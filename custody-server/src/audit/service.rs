//! 审计日志服务
//!
//! 查询、单卡历史、链验证。写入只经由存储层事务。

use std::sync::Arc;

use super::types::*;
use crate::custody::store::{AuditLog, StoreResult};

/// 审计日志服务
#[derive(Clone)]
pub struct AuditService {
    log: Arc<dyn AuditLog>,
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService").finish_non_exhaustive()
    }
}

impl AuditService {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    pub async fn query(&self, query: &AuditQuery) -> StoreResult<(Vec<AuditEntry>, u64)> {
        self.log.query(query).await
    }

    /// 单卡完整历史（按序列号升序）
    pub async fn card_history(&self, card_instance_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.log.entries_for_card(card_instance_id).await
    }

    pub async fn verify_chain(&self) -> StoreResult<AuditChainVerification> {
        let verification = self.log.verify_chain().await?;
        if !verification.chain_intact {
            tracing::error!(
                breaks = verification.breaks.len(),
                total = verification.total_entries,
                "Audit chain verification failed"
            );
        }
        Ok(verification)
    }
}
