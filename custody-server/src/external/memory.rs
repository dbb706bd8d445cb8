//! In-memory collaborators for development and tests

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared::custody::{OrderInfo, OrderStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::{ExternalError, LedgerService, OrderService};

/// Order table held in a [`DashMap`]
#[derive(Debug, Default)]
pub struct InMemoryOrderService {
    orders: DashMap<String, OrderInfo>,
    unavailable: AtomicBool,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, order_id: &str, status: OrderStatus, buyer_id: Option<&str>) {
        self.orders.insert(
            order_id.to_string(),
            OrderInfo {
                order_id: order_id.to_string(),
                status,
                buyer_id: buyer_id.map(str::to_string),
            },
        );
    }

    /// Change status, keeping the buyer
    pub fn set_status(&self, order_id: &str, status: OrderStatus) {
        match self.orders.get_mut(order_id) {
            Some(mut order) => order.status = status,
            None => self.upsert(order_id, status, None),
        }
    }

    /// Make every lookup fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn get_order(&self, order_id: &str) -> Result<Option<OrderInfo>, ExternalError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ExternalError::Unavailable("order service offline".into()));
        }
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }
}

/// A ledger call as observed by [`InMemoryLedgerService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Release {
        escrow_id: String,
        to_seller_id: String,
        succeeded: bool,
    },
    Refund {
        escrow_id: String,
        succeeded: bool,
    },
}

/// Records every call; can be told to fail
#[derive(Debug, Default)]
pub struct InMemoryLedgerService {
    calls: Mutex<Vec<LedgerCall>>,
    fail_next: AtomicU32,
    failing: AtomicBool,
}

impl InMemoryLedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls, then succeed
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().clone()
    }

    /// Successful releases of this escrow
    pub fn released(&self, escrow_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                matches!(c, LedgerCall::Release { escrow_id: id, succeeded: true, .. } if id == escrow_id)
            })
            .count()
    }

    /// Successful refunds of this escrow
    pub fn refunded(&self, escrow_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                matches!(c, LedgerCall::Refund { escrow_id: id, succeeded: true } if id == escrow_id)
            })
            .count()
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedgerService {
    async fn release_escrow(
        &self,
        escrow_id: &str,
        to_seller_id: &str,
    ) -> Result<(), ExternalError> {
        let fail = self.should_fail();
        self.calls.lock().push(LedgerCall::Release {
            escrow_id: escrow_id.to_string(),
            to_seller_id: to_seller_id.to_string(),
            succeeded: !fail,
        });
        if fail {
            return Err(ExternalError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }

    async fn refund_escrow(&self, escrow_id: &str) -> Result<(), ExternalError> {
        let fail = self.should_fail();
        self.calls.lock().push(LedgerCall::Refund {
            escrow_id: escrow_id.to_string(),
            succeeded: !fail,
        });
        if fail {
            return Err(ExternalError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }
}
