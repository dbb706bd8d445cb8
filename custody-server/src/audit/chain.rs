//! SHA256 哈希链
//!
//! 哈希输入格式：
//! - 每个变长字段后跟 `\x00` 分隔符，防止字段边界碰撞
//! - 定长字段（u64/i64）用 LE 字节序，无需分隔
//! - Optional 字段用 `\x00`=None / `\x01`+bytes=Some 区分，避免 None 与 Some("") 碰撞
//! - 枚举字段使用 serde snake_case 名称（跨版本稳定），而非 Debug 输出
//! - metadata 为 serde_json 默认（BTreeMap）序列化，键有序

use sha2::{Digest, Sha256};

use super::types::{AuditChainBreak, AuditChainVerification, AuditEntry, ChainBreakKind};

/// 首条记录的 prev_hash
pub const GENESIS_HASH: &str = "genesis";

/// 计算一条审计记录的哈希（不含 curr_hash 本身）
pub fn compute_audit_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();

    hasher.update(entry.prev_hash.as_bytes());
    hasher.update(b"\x00");

    hasher.update(entry.id.to_le_bytes());
    hasher.update(entry.created_at.to_le_bytes());

    hash_optional(&mut hasher, entry.card_instance_id.as_deref());
    hash_optional(&mut hasher, entry.from_status.map(|s| s.as_str()));
    hash_optional(&mut hasher, entry.to_status.map(|s| s.as_str()));

    hasher.update(entry.actor_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.actor_type.as_str().as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.action.as_str().as_bytes());
    hasher.update(b"\x00");

    hash_optional(&mut hasher, entry.reason.as_deref());

    let metadata = serde_json::to_string(&entry.metadata).unwrap_or_default();
    hasher.update(metadata.as_bytes());
    hasher.update(b"\x00");

    format!("{:x}", hasher.finalize())
}

/// Optional 字段哈希：`\x00` = None, `\x01` + bytes + `\x00` = Some
fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(b"\x01");
            hasher.update(v.as_bytes());
        }
        None => {
            hasher.update(b"\x00");
        }
    }
    hasher.update(b"\x00");
}

/// 按序列号顺序校验整条链
///
/// 同时检查链接（prev_hash）和内容（curr_hash 重算）。
pub fn verify_entries<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> AuditChainVerification {
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut total_entries = 0u64;
    let mut breaks = Vec::new();

    for entry in entries {
        total_entries += 1;

        if entry.prev_hash != expected_prev {
            breaks.push(AuditChainBreak {
                entry_id: entry.id,
                kind: ChainBreakKind::PrevHashMismatch,
                expected: expected_prev.clone(),
                actual: entry.prev_hash.clone(),
            });
        }

        let recomputed = compute_audit_hash(entry);
        if recomputed != entry.curr_hash {
            breaks.push(AuditChainBreak {
                entry_id: entry.id,
                kind: ChainBreakKind::ContentHashMismatch,
                expected: recomputed,
                actual: entry.curr_hash.clone(),
            });
        }

        expected_prev = entry.curr_hash.clone();
    }

    AuditChainVerification {
        total_entries,
        chain_intact: breaks.is_empty(),
        breaks,
    }
}
