//! Sale lane routing
//!
//! Pure decision: no storage, no clock. The first matching rule wins:
//!
//! | # | Condition | Lane | Reason |
//! |---|-----------|------|--------|
//! | 1 | seller tier is `untrusted` | vault_hold | untrusted_seller |
//! | 2 | declared value ≥ threshold | vault_hold | high_value |
//! | 3 | prior disputes > 0 | vault_hold | prior_disputes |
//! | 4 | otherwise | direct_ship | standard |

use rust_decimal::Decimal;
use shared::custody::{CustodyLane, LaneReasonCode, SaleLaneDecision, SellerTrustTier};

/// Default declared value at or above which a sale stays in the vault
pub const DEFAULT_HIGH_VALUE_THRESHOLD: Decimal = Decimal::ONE_THOUSAND;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneRouter {
    high_value_threshold: Decimal,
}

impl LaneRouter {
    pub fn new(high_value_threshold: Decimal) -> Self {
        Self {
            high_value_threshold,
        }
    }

    pub fn high_value_threshold(&self) -> Decimal {
        self.high_value_threshold
    }

    pub fn determine_lane(
        &self,
        seller_trust_tier: SellerTrustTier,
        declared_value: Decimal,
        prior_dispute_count: u32,
    ) -> SaleLaneDecision {
        let (lane, reason_code) = if seller_trust_tier == SellerTrustTier::Untrusted {
            (CustodyLane::VaultHold, LaneReasonCode::UntrustedSeller)
        } else if declared_value >= self.high_value_threshold {
            (CustodyLane::VaultHold, LaneReasonCode::HighValue)
        } else if prior_dispute_count > 0 {
            (CustodyLane::VaultHold, LaneReasonCode::PriorDisputes)
        } else {
            (CustodyLane::DirectShip, LaneReasonCode::Standard)
        };

        SaleLaneDecision {
            lane,
            reason_code,
            seller_trust_tier,
            declared_value,
            prior_dispute_count,
            high_value_threshold: self.high_value_threshold,
        }
    }
}

impl Default for LaneRouter {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_VALUE_THRESHOLD)
    }
}
