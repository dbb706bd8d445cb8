//! Custody lane vocabulary

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Seller trust tier as assigned by the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerTrustTier {
    Untrusted,
    Standard,
    Trusted,
}

/// Fulfillment path an asset follows after sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyLane {
    /// Platform retains physical custody
    VaultHold,
    /// Seller ships directly to buyer
    DirectShip,
}

/// Why a lane was chosen (first matching rule wins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneReasonCode {
    UntrustedSeller,
    HighValue,
    PriorDisputes,
    Standard,
}

/// Lane router output, never persisted on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLaneDecision {
    pub lane: CustodyLane,
    pub reason_code: LaneReasonCode,
    pub seller_trust_tier: SellerTrustTier,
    pub declared_value: Decimal,
    pub prior_dispute_count: u32,
    /// Threshold in force when the decision was made
    pub high_value_threshold: Decimal,
}
