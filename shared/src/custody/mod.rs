//! Custody domain types shared by the server and its callers

pub mod actor;
pub mod card;
pub mod lane;
pub mod order;
pub mod request;

pub use actor::{Actor, ActorType};
pub use card::{CardInstance, CardStatus, NewCard};
pub use lane::{CustodyLane, LaneReasonCode, SaleLaneDecision, SellerTrustTier};
pub use order::{OrderInfo, OrderStatus};
pub use request::{
    AbandonReceipt, CompletionReceipt, CustodyRequest, CustodyResponse, InconsistencyKind,
    InconsistentCard, IntegrityReport, LockReceipt, OrphanedLock, RepairSkip, RepairSummary,
    RepairType, StaleLock, UnlockReceipt, UnverifiedLock,
};
