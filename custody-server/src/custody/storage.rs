//! redb-based storage layer for custody state
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `cards` | `card_instance_id` | `CardInstance` | Card rows |
//! | `order_locks` | `order_id` | `card_instance_id` | Lock index (one lock per order) |
//! | `audit_log` | `id` | `AuditEntry` | Hash chained audit log (append-only) |
//! | `pending_escrow` | `order_id` | `PendingEscrow` | Escrow retry queue |
//! | `dead_escrow` | `order_id` | `DeadEscrow` | Exhausted escrow retries |
//!
//! # Atomicity
//!
//! redb serializes write transactions, so a compare-and-transition reads the
//! row, checks it, writes the new row, updates the lock index and appends the
//! audit entry with no other writer interleaving. Either all of it commits or
//! none of it does.

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use shared::custody::{CardInstance, CardStatus};
use shared::util::now_millis;
use std::path::Path;
use std::sync::Arc;

use super::store::{
    AuditLog, CardInstanceStore, CardUpdate, EscrowQueue, Expected, StoreError, StoreResult,
    Transition,
};
use crate::audit::{
    AuditChainVerification, AuditDraft, AuditEntry, AuditQuery, GENESIS_HASH, compute_audit_hash,
    verify_entries,
};
use crate::escrow::{DeadEscrow, PendingEscrow};

/// key = card_instance_id, value = JSON-serialized CardInstance
const CARDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cards");

/// key = order_id, value = card_instance_id
const ORDER_LOCKS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("order_locks");

/// key = audit sequence, value = JSON-serialized AuditEntry
const AUDIT_LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

/// key = order_id, value = JSON-serialized PendingEscrow
const PENDING_ESCROW_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_escrow");

/// key = order_id, value = JSON-serialized DeadEscrow
const DEAD_ESCROW_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_escrow");

/// Custody storage backed by redb
#[derive(Clone)]
pub struct CustodyStorage {
    db: Arc<Database>,
}

impl CustodyStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits with `Durability::Immediate`: a transition is on disk
    /// once `commit()` returns.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// In-memory database (tests and development fallback)
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CARDS_TABLE)?;
            let _ = write_txn.open_table(ORDER_LOCKS_TABLE)?;
            let _ = write_txn.open_table(AUDIT_LOG_TABLE)?;
            let _ = write_txn.open_table(PENDING_ESCROW_TABLE)?;
            let _ = write_txn.open_table(DEAD_ESCROW_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========== Cards ==========

    pub fn get_card(&self, card_instance_id: &str) -> StoreResult<Option<CardInstance>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CARDS_TABLE)?;
        match table.get(card_instance_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn insert_card(&self, card: CardInstance, mut audit: AuditDraft) -> StoreResult<Transition> {
        let now = now_millis();
        let write_txn = self.db.begin_write()?;
        {
            let mut cards = write_txn.open_table(CARDS_TABLE)?;
            if cards.get(card.id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(card.id));
            }
            cards.insert(card.id.as_str(), serde_json::to_vec(&card)?.as_slice())?;
        }
        audit.card_instance_id = Some(card.id.clone());
        audit.to_status = Some(card.status);
        let entry = append_entry(&write_txn, audit, now)?;
        write_txn.commit()?;

        Ok(Transition { card, audit: entry })
    }

    /// Conditional transition, see [`CardInstanceStore::compare_and_transition`]
    pub fn transition(
        &self,
        card_instance_id: &str,
        expected: Expected,
        new_status: CardStatus,
        update: CardUpdate,
        mut audit: AuditDraft,
    ) -> StoreResult<Transition> {
        let now = now_millis();
        let write_txn = self.db.begin_write()?;

        let (previous, next) = {
            let mut cards = write_txn.open_table(CARDS_TABLE)?;
            let mut locks = write_txn.open_table(ORDER_LOCKS_TABLE)?;

            let bytes = cards.get(card_instance_id)?.map(|v| v.value().to_vec());
            let current: CardInstance = match bytes {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => return Err(StoreError::NotFound(card_instance_id.to_string())),
            };

            if !expected.matches(&current) {
                return Err(StoreError::Conflict {
                    card_instance_id: card_instance_id.to_string(),
                    expected: expected.to_string(),
                    actual: current.status,
                    locked_by_order_id: current.locked_by_order_id.clone(),
                });
            }

            let next = update.apply(&current, new_status, now)?;

            // 旧锁索引：仅当仍指向本卡时移除
            if let Some(old_order) = current.locked_by_order_id.as_deref() {
                let points_here = locks
                    .get(old_order)?
                    .is_some_and(|v| v.value() == card_instance_id);
                if points_here {
                    locks.remove(old_order)?;
                }
            }

            // 新锁索引：一个订单只能持有一张卡
            if let Some(new_order) = next.locked_by_order_id.as_deref() {
                let indexed = locks.get(new_order)?.map(|v| v.value().to_string());
                if let Some(other_id) = indexed
                    && other_id != card_instance_id
                {
                    let other_bytes = cards.get(other_id.as_str())?.map(|v| v.value().to_vec());
                    let other_holds = match other_bytes {
                        Some(bytes) => {
                            let other: CardInstance = serde_json::from_slice(&bytes)?;
                            other.is_locked_by(new_order)
                        }
                        None => false,
                    };
                    if other_holds {
                        return Err(StoreError::OrderHoldsLock {
                            order_id: new_order.to_string(),
                            card_instance_id: other_id,
                        });
                    }
                }
                locks.insert(new_order, card_instance_id)?;
            }

            cards.insert(card_instance_id, serde_json::to_vec(&next)?.as_slice())?;
            (current, next)
        };

        audit.card_instance_id = Some(card_instance_id.to_string());
        audit.from_status = Some(previous.status);
        audit.to_status = Some(next.status);
        let entry = append_entry(&write_txn, audit, now)?;
        write_txn.commit()?;

        Ok(Transition {
            card: next,
            audit: entry,
        })
    }

    pub fn find_card_by_lock_order(&self, order_id: &str) -> StoreResult<Option<CardInstance>> {
        let read_txn = self.db.begin_read()?;
        let locks = read_txn.open_table(ORDER_LOCKS_TABLE)?;
        let card_id = match locks.get(order_id)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };

        let cards = read_txn.open_table(CARDS_TABLE)?;
        let card: Option<CardInstance> = match cards.get(card_id.as_str())? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(card.filter(|c| c.is_locked_by(order_id)))
    }

    pub fn list_cards(&self) -> StoreResult<Vec<CardInstance>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CARDS_TABLE)?;
        let mut cards = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            cards.push(serde_json::from_slice(value.value())?);
        }
        Ok(cards)
    }

    pub fn list_cards_by_status(&self, status: CardStatus) -> StoreResult<Vec<CardInstance>> {
        Ok(self
            .list_cards()?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }

    pub fn lock_index_entries(&self) -> StoreResult<Vec<(String, String)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDER_LOCKS_TABLE)?;
        let mut entries = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            entries.push((key.value().to_string(), value.value().to_string()));
        }
        Ok(entries)
    }

    // ========== Audit ==========

    pub fn append_audit(&self, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let write_txn = self.db.begin_write()?;
        let entry = append_entry(&write_txn, audit, now_millis())?;
        write_txn.commit()?;
        Ok(entry)
    }

    pub fn all_audit_entries(&self) -> StoreResult<Vec<AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG_TABLE)?;
        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_id, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    pub fn query_audit(&self, query: &AuditQuery) -> StoreResult<(Vec<AuditEntry>, u64)> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG_TABLE)?;

        let mut items = Vec::new();
        let mut total = 0u64;
        for result in table.iter()?.rev() {
            let (_id, value) = result?;
            let entry: AuditEntry = serde_json::from_slice(value.value())?;
            if !query.matches(&entry) {
                continue;
            }
            if total as usize >= query.offset && items.len() < query.limit {
                items.push(entry);
            }
            total += 1;
        }
        Ok((items, total))
    }

    pub fn audit_for_card(&self, card_instance_id: &str) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .all_audit_entries()?
            .into_iter()
            .filter(|e| e.card_instance_id.as_deref() == Some(card_instance_id))
            .collect())
    }

    pub fn verify_audit_chain(&self) -> StoreResult<AuditChainVerification> {
        let entries = self.all_audit_entries()?;
        Ok(verify_entries(&entries))
    }

    // ========== Escrow queue ==========

    pub fn enqueue_escrow(&self, entry: &PendingEscrow, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_ESCROW_TABLE)?;
            table.insert(entry.order_id.as_str(), serde_json::to_vec(entry)?.as_slice())?;
        }
        let audit_entry = append_entry(&write_txn, audit, now_millis())?;
        write_txn.commit()?;
        Ok(audit_entry)
    }

    pub fn pending_escrows(&self) -> StoreResult<Vec<PendingEscrow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_ESCROW_TABLE)?;
        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    pub fn update_pending_escrow(&self, entry: &PendingEscrow) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_ESCROW_TABLE)?;
            if table.get(entry.order_id.as_str())?.is_none() {
                return Err(StoreError::EscrowEntryNotFound(entry.order_id.clone()));
            }
            table.insert(entry.order_id.as_str(), serde_json::to_vec(entry)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn resolve_pending_escrow(&self, order_id: &str, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_ESCROW_TABLE)?;
            if table.remove(order_id)?.is_none() {
                return Err(StoreError::EscrowEntryNotFound(order_id.to_string()));
            }
        }
        let entry = append_entry(&write_txn, audit, now_millis())?;
        write_txn.commit()?;
        Ok(entry)
    }

    pub fn bury_escrow(&self, dead: &DeadEscrow, audit: AuditDraft) -> StoreResult<AuditEntry> {
        let write_txn = self.db.begin_write()?;
        {
            let mut pending = write_txn.open_table(PENDING_ESCROW_TABLE)?;
            pending.remove(dead.order_id.as_str())?;
            let mut dead_table = write_txn.open_table(DEAD_ESCROW_TABLE)?;
            dead_table.insert(dead.order_id.as_str(), serde_json::to_vec(dead)?.as_slice())?;
        }
        let entry = append_entry(&write_txn, audit, now_millis())?;
        write_txn.commit()?;
        Ok(entry)
    }

    pub fn dead_escrows(&self) -> StoreResult<Vec<DeadEscrow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_ESCROW_TABLE)?;
        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    pub fn requeue_dead_escrow(
        &self,
        order_id: &str,
        now: i64,
        mut audit: AuditDraft,
    ) -> StoreResult<(PendingEscrow, AuditEntry)> {
        let write_txn = self.db.begin_write()?;
        let revived = {
            let mut dead_table = write_txn.open_table(DEAD_ESCROW_TABLE)?;
            let bytes = dead_table.remove(order_id)?.map(|v| v.value().to_vec());
            let dead: DeadEscrow = match bytes {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => return Err(StoreError::EscrowEntryNotFound(order_id.to_string())),
            };
            audit.card_instance_id = Some(dead.card_instance_id.clone());
            audit.metadata = serde_json::json!({
                "order_id": dead.order_id,
                "escrow_id": dead.escrow_id,
                "operation": dead.operation.name(),
                "previous_attempts": dead.attempts,
                "last_error": dead.last_error,
            });
            let revived = dead.revive(now);
            let mut pending = write_txn.open_table(PENDING_ESCROW_TABLE)?;
            pending.insert(order_id, serde_json::to_vec(&revived)?.as_slice())?;
            revived
        };
        let entry = append_entry(&write_txn, audit, now)?;
        write_txn.commit()?;
        Ok((revived, entry))
    }

    /// Overwrite a card row with no checks, no index update and no audit
    #[cfg(test)]
    pub(crate) fn overwrite_card_raw(&self, card: &CardInstance) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut cards = write_txn.open_table(CARDS_TABLE)?;
            cards.insert(card.id.as_str(), serde_json::to_vec(card)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Append an audit entry inside an open write transaction
///
/// Sequence and prev_hash come from the current tail, so two appends can
/// never share an id or fork the chain.
fn append_entry(txn: &WriteTransaction, audit: AuditDraft, now: i64) -> StoreResult<AuditEntry> {
    let mut table = txn.open_table(AUDIT_LOG_TABLE)?;

    let (id, prev_hash) = match table.last()? {
        Some((key, value)) => {
            let last: AuditEntry = serde_json::from_slice(value.value())?;
            (key.value() + 1, last.curr_hash)
        }
        None => (1, GENESIS_HASH.to_string()),
    };

    let mut entry = AuditEntry {
        id,
        created_at: now,
        card_instance_id: audit.card_instance_id,
        from_status: audit.from_status,
        to_status: audit.to_status,
        actor_id: audit.actor.id,
        actor_type: audit.actor.actor_type,
        action: audit.action,
        reason: audit.reason,
        metadata: audit.metadata,
        prev_hash,
        curr_hash: String::new(),
    };
    entry.curr_hash = compute_audit_hash(&entry);

    table.insert(id, serde_json::to_vec(&entry)?.as_slice())?;
    Ok(entry)
}

#[async_trait]
impl CardInstanceStore for CustodyStorage {
    async fn get(&self, card_instance_id: &str) -> StoreResult<Option<CardInstance>> {
        self.get_card(card_instance_id)
    }

    async fn insert(&self, card: CardInstance, audit: AuditDraft) -> StoreResult<Transition> {
        self.insert_card(card, audit)
    }

    async fn compare_and_transition(
        &self,
        card_instance_id: &str,
        expected: Expected,
        new_status: CardStatus,
        update: CardUpdate,
        audit: AuditDraft,
    ) -> StoreResult<Transition> {
        self.transition(card_instance_id, expected, new_status, update, audit)
    }

    async fn find_by_lock_order(&self, order_id: &str) -> StoreResult<Option<CardInstance>> {
        self.find_card_by_lock_order(order_id)
    }

    async fn list_by_status(&self, status: CardStatus) -> StoreResult<Vec<CardInstance>> {
        self.list_cards_by_status(status)
    }

    async fn list_all(&self) -> StoreResult<Vec<CardInstance>> {
        self.list_cards()
    }

    async fn lock_index(&self) -> StoreResult<Vec<(String, String)>> {
        self.lock_index_entries()
    }
}

#[async_trait]
impl AuditLog for CustodyStorage {
    async fn append(&self, audit: AuditDraft) -> StoreResult<AuditEntry> {
        self.append_audit(audit)
    }

    async fn query(&self, query: &AuditQuery) -> StoreResult<(Vec<AuditEntry>, u64)> {
        self.query_audit(query)
    }

    async fn entries_for_card(&self, card_instance_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.audit_for_card(card_instance_id)
    }

    async fn verify_chain(&self) -> StoreResult<AuditChainVerification> {
        self.verify_audit_chain()
    }
}

#[async_trait]
impl EscrowQueue for CustodyStorage {
    async fn enqueue(&self, entry: PendingEscrow, audit: AuditDraft) -> StoreResult<AuditEntry> {
        self.enqueue_escrow(&entry, audit)
    }

    async fn pending(&self) -> StoreResult<Vec<PendingEscrow>> {
        self.pending_escrows()
    }

    async fn reschedule(&self, entry: &PendingEscrow) -> StoreResult<()> {
        self.update_pending_escrow(entry)
    }

    async fn resolve(&self, order_id: &str, audit: AuditDraft) -> StoreResult<AuditEntry> {
        self.resolve_pending_escrow(order_id, audit)
    }

    async fn bury(&self, dead: DeadEscrow, audit: AuditDraft) -> StoreResult<AuditEntry> {
        self.bury_escrow(&dead, audit)
    }

    async fn dead(&self) -> StoreResult<Vec<DeadEscrow>> {
        self.dead_escrows()
    }

    async fn requeue(
        &self,
        order_id: &str,
        now: i64,
        audit: AuditDraft,
    ) -> StoreResult<(PendingEscrow, AuditEntry)> {
        self.requeue_dead_escrow(order_id, now, audit)
    }
}
