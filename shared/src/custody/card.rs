//! Card instance model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Custody status of a uniquely identified card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// Held by the platform vault
    InVault,
    /// Listed for sale by its owner
    Listed,
    /// Exclusively claimed by one pending order
    Locked,
    /// Shipped to a buyer, awaiting completion
    Shipped,
    /// Sale completed (terminal)
    Sold,
    /// Under dispute (terminal)
    Disputed,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InVault => "in_vault",
            Self::Listed => "listed",
            Self::Locked => "locked",
            Self::Shipped => "shipped",
            Self::Sold => "sold",
            Self::Disputed => "disputed",
        }
    }

    /// Statuses a sale lock may be taken from
    pub fn is_lockable(&self) -> bool {
        matches!(self, Self::InVault | Self::Listed)
    }

    /// Terminal statuses are retained forever for audit
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Disputed)
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 卡片实例：一张被托管的唯一实物卡
///
/// Lock fields (`locked_at`, `lock_reason`, `locked_by_order_id`,
/// `pre_lock_status`) are all `None` unless `status == Locked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardInstance {
    pub id: String,
    /// Current custodial owner (seller or platform vault)
    pub owner_id: String,
    pub status: CardStatus,
    /// Unix millis
    pub locked_at: Option<i64>,
    pub lock_reason: Option<String>,
    pub locked_by_order_id: Option<String>,
    /// Status observed when the lock was taken, restored on unlock
    #[serde(default)]
    pub pre_lock_status: Option<CardStatus>,
    /// Declared value used by the lane router
    pub declared_value: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CardInstance {
    pub fn is_locked(&self) -> bool {
        self.status == CardStatus::Locked
    }

    /// `true` when the card is locked by exactly this order
    pub fn is_locked_by(&self, order_id: &str) -> bool {
        self.is_locked() && self.locked_by_order_id.as_deref() == Some(order_id)
    }

    /// Lock timestamp present without an owning order
    ///
    /// Left behind by legacy writers; only `fix_status` clears it.
    pub fn has_orphaned_lock_timestamp(&self) -> bool {
        self.locked_at.is_some() && self.locked_by_order_id.is_none()
    }
}

/// Card intake payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCard {
    pub id: String,
    pub owner_id: String,
    pub declared_value: Decimal,
    /// `in_vault` (vault intake) or `listed` (verified listing)
    #[serde(default = "default_intake_status")]
    pub status: CardStatus,
}

fn default_intake_status() -> CardStatus {
    CardStatus::InVault
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(status: CardStatus) -> CardInstance {
        CardInstance {
            id: "C1".to_string(),
            owner_id: "seller-1".to_string(),
            status,
            locked_at: None,
            lock_reason: None,
            locked_by_order_id: None,
            pre_lock_status: None,
            declared_value: Decimal::new(25000, 2),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_lockable_statuses() {
        assert!(CardStatus::InVault.is_lockable());
        assert!(CardStatus::Listed.is_lockable());
        assert!(!CardStatus::Locked.is_lockable());
        assert!(!CardStatus::Shipped.is_lockable());
        assert!(!CardStatus::Sold.is_lockable());
        assert!(!CardStatus::Disputed.is_lockable());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&CardStatus::InVault).unwrap(),
            "\"in_vault\""
        );
        let status: CardStatus = serde_json::from_str("\"disputed\"").unwrap();
        assert_eq!(status, CardStatus::Disputed);
        assert_eq!(CardStatus::Sold.to_string(), "sold");
    }

    #[test]
    fn test_is_locked_by() {
        let mut c = card(CardStatus::Locked);
        c.locked_by_order_id = Some("O1".to_string());
        assert!(c.is_locked_by("O1"));
        assert!(!c.is_locked_by("O2"));

        let listed = card(CardStatus::Listed);
        assert!(!listed.is_locked_by("O1"));
    }

    #[test]
    fn test_orphaned_lock_timestamp() {
        let mut c = card(CardStatus::Locked);
        c.locked_at = Some(1_700_000_000_000);
        assert!(c.has_orphaned_lock_timestamp());

        c.locked_by_order_id = Some("O1".to_string());
        assert!(!c.has_orphaned_lock_timestamp());
    }

    #[test]
    fn test_new_card_defaults_to_vault() {
        let json = r#"{"id":"C9","owner_id":"s","declared_value":"12.50"}"#;
        let new_card: NewCard = serde_json::from_str(json).unwrap();
        assert_eq!(new_card.status, CardStatus::InVault);
        assert_eq!(new_card.declared_value, Decimal::new(1250, 2));
    }
}
