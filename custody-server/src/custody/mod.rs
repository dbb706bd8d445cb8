//! Card custody core
//!
//! ```text
//! CustodyService::dispatch(CustodyRequest, Actor)
//!   ├─ LaneRouter               纯函数，无状态
//!   ├─ LockManager              lock / unlock (CAS)
//!   ├─ SaleCompletionCoordinator  locked → sold + escrow release
//!   ├─ IntegrityAuditor         只读巡检
//!   └─ RepairExecutor           AdminCapability 才能调用
//!         │
//!         ▼
//!   CardInstanceStore (redb)  卡片行 + 锁索引 + 审计 同一事务
//! ```

pub mod capability;
pub mod completion;
pub mod error;
pub mod integrity;
pub mod lane;
pub mod lock;
pub mod monitor;
pub mod repair;
pub mod service;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::AdminCapability;
pub use completion::SaleCompletionCoordinator;
pub use error::{CustodyError, CustodyResult};
pub use integrity::IntegrityAuditor;
pub use lane::LaneRouter;
pub use lock::LockManager;
pub use monitor::{IntegrityMonitor, MonitorPass};
pub use repair::RepairExecutor;
pub use service::{Collaborators, CustodyService, CustodySettings};
pub use storage::CustodyStorage;
pub use store::{AuditLog, CardInstanceStore, EscrowQueue, StoreError, StoreResult};
