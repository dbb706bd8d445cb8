//! 审计日志类型定义
//!
//! 托管状态变更的审计记录。条目只追加、不可修改，
//! 通过 SHA256 哈希链防篡改。

use serde::{Deserialize, Serialize};
use shared::custody::{Actor, ActorType, CardStatus};

/// 审计操作类型（封闭枚举，非自由文本）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // ═══ 入库 ═══
    /// 卡片登记入库
    Intake,

    // ═══ 锁定 ═══
    /// 订单锁定卡片
    Lock,
    /// 订单释放锁定
    Unlock,

    // ═══ 销售结算 ═══
    /// 销售完成，所有权转移
    CompleteSale,
    /// 销售完成但托管资金释放失败（卡片状态不变）
    CompleteSaleEscrowFailed,
    /// 订单放弃，锁定释放
    AbandonSale,
    /// 放弃订单时退款失败
    RefundEscrowFailed,
    /// 对账任务补偿成功
    EscrowReconciled,
    /// 对账重试耗尽，进入死信
    EscrowReconcileExhausted,

    // ═══ 管理修复 ═══
    /// 修复：释放孤儿锁
    RepairUnlockOrphans,
    /// 修复：清除残留锁字段
    RepairFixStatus,
    /// 修复：死信托管条目重新入队
    RepairRequeueEscrow,

    // ═══ 巡检 ═══
    /// 巡检发现孤儿锁超过阈值
    IntegrityAlert,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::CompleteSale => "complete_sale",
            Self::CompleteSaleEscrowFailed => "complete_sale_escrow_failed",
            Self::AbandonSale => "abandon_sale",
            Self::RefundEscrowFailed => "refund_escrow_failed",
            Self::EscrowReconciled => "escrow_reconciled",
            Self::EscrowReconcileExhausted => "escrow_reconcile_exhausted",
            Self::RepairUnlockOrphans => "repair_unlock_orphans",
            Self::RepairFixStatus => "repair_fix_status",
            Self::RepairRequeueEscrow => "repair_requeue_escrow",
            Self::IntegrityAlert => "integrity_alert",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 审计日志条目（不可变）
///
/// - `prev_hash`: 前一条记录的哈希（首条为 `genesis`）
/// - `curr_hash`: 当前记录的哈希（包含 prev_hash + 所有字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 全局递增序列号
    pub id: u64,
    /// 时间戳（Unix 毫秒）
    pub created_at: i64,
    /// 卡片 ID（系统级告警为 None）
    pub card_instance_id: Option<String>,
    pub from_status: Option<CardStatus>,
    pub to_status: Option<CardStatus>,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub action: AuditAction,
    pub reason: Option<String>,
    /// 结构化详情（order_id, escrow_id 等）
    pub metadata: serde_json::Value,
    pub prev_hash: String,
    pub curr_hash: String,
}

/// 待写入的审计记录
///
/// 序列号、时间戳和哈希由存储层在同一事务内分配。
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub card_instance_id: Option<String>,
    pub from_status: Option<CardStatus>,
    pub to_status: Option<CardStatus>,
    pub actor: Actor,
    pub action: AuditAction,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditDraft {
    /// Entry about a single card
    pub fn card(card_instance_id: impl Into<String>, action: AuditAction, actor: &Actor) -> Self {
        Self {
            card_instance_id: Some(card_instance_id.into()),
            from_status: None,
            to_status: None,
            actor: actor.clone(),
            action,
            reason: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// System-wide entry with no card
    pub fn system(action: AuditAction, actor: &Actor) -> Self {
        Self {
            card_instance_id: None,
            from_status: None,
            to_status: None,
            actor: actor.clone(),
            action,
            reason: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn transition(mut self, from: CardStatus, to: CardStatus) -> Self {
        self.from_status = Some(from);
        self.to_status = Some(to);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 审计日志查询参数
#[derive(Debug, Clone, Deserialize)]
pub struct AuditQuery {
    /// 起始时间（Unix 毫秒，含）
    pub from: Option<i64>,
    /// 截止时间（Unix 毫秒，含）
    pub to: Option<i64>,
    pub card_instance_id: Option<String>,
    pub action: Option<AuditAction>,
    pub actor_id: Option<String>,
    /// 分页偏移
    #[serde(default)]
    pub offset: usize,
    /// 分页大小（默认 50）
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            card_instance_id: None,
            action: None,
            actor_id: None,
            offset: 0,
            limit: default_limit(),
        }
    }
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.from.is_some_and(|from| entry.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.created_at > to) {
            return false;
        }
        if let Some(card) = &self.card_instance_id
            && entry.card_instance_id.as_deref() != Some(card.as_str())
        {
            return false;
        }
        if self.action.is_some_and(|action| entry.action != action) {
            return false;
        }
        if let Some(actor) = &self.actor_id
            && entry.actor_id != *actor
        {
            return false;
        }
        true
    }
}

/// 审计日志列表响应
#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub items: Vec<AuditEntry>,
    pub total: u64,
}

/// 审计链验证结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditChainVerification {
    pub total_entries: u64,
    pub chain_intact: bool,
    pub breaks: Vec<AuditChainBreak>,
}

/// 审计链断裂点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditChainBreak {
    pub entry_id: u64,
    pub kind: ChainBreakKind,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// prev_hash 与上一条的 curr_hash 不一致
    PrevHashMismatch,
    /// 重新计算的哈希与存储的 curr_hash 不一致（内容被篡改）
    ContentHashMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, created_at: i64, card: Option<&str>, action: AuditAction) -> AuditEntry {
        AuditEntry {
            id,
            created_at,
            card_instance_id: card.map(str::to_string),
            from_status: None,
            to_status: None,
            actor_id: "u1".to_string(),
            actor_type: ActorType::User,
            action,
            reason: None,
            metadata: serde_json::Value::Null,
            prev_hash: String::new(),
            curr_hash: String::new(),
        }
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&AuditAction::CompleteSaleEscrowFailed).unwrap();
        assert_eq!(json, "\"complete_sale_escrow_failed\"");
        assert_eq!(
            AuditAction::RepairUnlockOrphans.to_string(),
            "repair_unlock_orphans"
        );
    }

    #[test]
    fn test_query_filters() {
        let e = entry(1, 1_000, Some("C1"), AuditAction::Lock);

        assert!(AuditQuery::default().matches(&e));

        let by_card = AuditQuery {
            card_instance_id: Some("C2".into()),
            ..Default::default()
        };
        assert!(!by_card.matches(&e));

        let by_window = AuditQuery {
            from: Some(500),
            to: Some(999),
            ..Default::default()
        };
        assert!(!by_window.matches(&e));

        let by_action = AuditQuery {
            action: Some(AuditAction::Lock),
            actor_id: Some("u1".into()),
            ..Default::default()
        };
        assert!(by_action.matches(&e));
    }

    #[test]
    fn test_system_draft_has_no_card() {
        let draft = AuditDraft::system(AuditAction::IntegrityAlert, &Actor::system("monitor"));
        assert!(draft.card_instance_id.is_none());
        assert_eq!(draft.actor.actor_type, ActorType::System);
    }
}
