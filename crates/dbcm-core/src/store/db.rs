//! Durable storage for orders, replies, and hook records using redb.
//!
//! # Table design
//!
//! `ORDERS` maps the raw order uuid (16 bytes) to a JSON-encoded `Order`.
//! `ORDERS_BY_TIME` is an insertion-order index with a 24-byte composite key:
//! ```text
//! [ created_at_ms: u64 big-endian (8 bytes) | order uuid: 16 bytes ]
//! ```
//! Because the timestamp occupies the high bytes in big-endian encoding,
//! byte ordering equals `(created_at, id)` ordering, so a plain iteration
//! yields pages in their stable listing order without any post-sort.
//!
//! `REPLIES` and `HOOKS` use a 40-byte composite key:
//! ```text
//! [ order uuid: 16 bytes | at_ms: u64 big-endian (8 bytes) | record uuid: 16 bytes ]
//! ```
//! All records of one order form a contiguous range, scanned with an upper
//! bound of the order uuid followed by `0xff` fill.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{DbcmError, Result};
use crate::hook::HookRecord;
use crate::order::Order;
use crate::reply::Reply;
use crate::store::{HookRegistry, OrderFilter, OrderStore, Page, Paged, ReplyLog};
use crate::types::OrderId;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: order uuid (16 bytes). Value: JSON-encoded Order.
const ORDERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("orders");

/// Key: 24-byte composite (created_at_ms big-endian ++ order uuid).
/// Value: order uuid (16 bytes).
const ORDERS_BY_TIME: TableDefinition<&[u8], &[u8]> = TableDefinition::new("orders_by_time");

/// Key: 40-byte composite (order uuid ++ at_ms big-endian ++ reply uuid).
/// Value: JSON-encoded Reply.
const REPLIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("replies");

/// Key: 40-byte composite (order uuid ++ at_ms big-endian ++ hook uuid).
/// Value: JSON-encoded HookRecord.
const HOOKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("hooks");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn time_key(ts: DateTime<Utc>, id: &[u8; 16]) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id);
    key
}

fn record_key(order: &[u8; 16], ts: DateTime<Utc>, id: &[u8; 16]) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..16].copy_from_slice(order);
    let ms = ts.timestamp_millis().max(0) as u64;
    key[16..24].copy_from_slice(&ms.to_be_bytes());
    key[24..].copy_from_slice(id);
    key
}

/// Inclusive bounds covering every record of one order.
fn record_bounds(order: &[u8; 16]) -> ([u8; 40], [u8; 40]) {
    let mut lower = [0u8; 40];
    lower[..16].copy_from_slice(order);
    let mut upper = [0xffu8; 40];
    upper[..16].copy_from_slice(order);
    (lower, upper)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

/// Durable backend over a single redb database file. Implements all three
/// storage interfaces; the progress compare-and-set runs inside one write
/// transaction, which redb serializes.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the redb database at `path`.
    ///
    /// Creates all tables if they don't already exist.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| DbcmError::Storage(e.to_string()))?;
        // Ensure the tables exist before any reads
        let wt = db
            .begin_write()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        wt.open_table(ORDERS)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        wt.open_table(ORDERS_BY_TIME)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        wt.open_table(REPLIES)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        wt.open_table(HOOKS)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        wt.commit()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        Ok(Self { db })
    }
}

impl OrderStore for RedbStore {
    fn insert(&self, order: &Order) -> Result<()> {
        let value = serde_json::to_vec(order).map_err(|e| DbcmError::Storage(e.to_string()))?;
        let id_bytes = order.id.as_bytes();
        let index_key = time_key(order.created_at, id_bytes);

        let wt = self
            .db
            .begin_write()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        {
            let mut orders = wt
                .open_table(ORDERS)
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            let exists = orders
                .get(id_bytes.as_slice())
                .map_err(|e| DbcmError::Storage(e.to_string()))?
                .is_some();
            if exists {
                return Err(DbcmError::Storage(format!(
                    "order already exists: {}",
                    order.id
                )));
            }
            orders
                .insert(id_bytes.as_slice(), value.as_slice())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;

            let mut index = wt
                .open_table(ORDERS_BY_TIME)
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            index
                .insert(index_key.as_slice(), id_bytes.as_slice())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
        }
        wt.commit()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get(&self, id: OrderId) -> Result<Order> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        let orders = rt
            .open_table(ORDERS)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        let guard = orders
            .get(id.as_bytes().as_slice())
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        match guard {
            Some(v) => {
                serde_json::from_slice(v.value()).map_err(|e| DbcmError::Storage(e.to_string()))
            }
            None => Err(DbcmError::OrderNotFound(id.to_string())),
        }
    }

    fn update_progress(&self, id: OrderId, expected_revision: u64, updated: &Order) -> Result<()> {
        let value = serde_json::to_vec(updated).map_err(|e| DbcmError::Storage(e.to_string()))?;
        let id_bytes = id.as_bytes();

        // Dropping the transaction on any early return aborts it.
        let wt = self
            .db
            .begin_write()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        {
            let mut orders = wt
                .open_table(ORDERS)
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            let current: Order = {
                let guard = orders
                    .get(id_bytes.as_slice())
                    .map_err(|e| DbcmError::Storage(e.to_string()))?;
                match guard {
                    Some(v) => serde_json::from_slice(v.value())
                        .map_err(|e| DbcmError::Storage(e.to_string()))?,
                    None => return Err(DbcmError::OrderNotFound(id.to_string())),
                }
            };
            if current.revision != expected_revision {
                return Err(DbcmError::Conflict {
                    id,
                    current: current.progress,
                });
            }
            orders
                .insert(id_bytes.as_slice(), value.as_slice())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
        }
        wt.commit()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        Ok(())
    }

    fn list(&self, filter: &OrderFilter, page: Page) -> Result<Paged<Order>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        let index = rt
            .open_table(ORDERS_BY_TIME)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        let orders = rt
            .open_table(ORDERS)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;

        let mut total = 0usize;
        let mut items = Vec::new();
        for entry in index
            .iter()
            .map_err(|e| DbcmError::Storage(e.to_string()))?
        {
            let (_, v) = entry.map_err(|e| DbcmError::Storage(e.to_string()))?;
            let guard = orders
                .get(v.value())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            let Some(raw) = guard else {
                continue;
            };
            let order: Order = serde_json::from_slice(raw.value())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            if !filter.matches(&order) {
                continue;
            }
            if total >= page.offset && items.len() < page.limit {
                items.push(order);
            }
            total += 1;
        }
        Ok(Paged {
            items,
            total,
            offset: page.offset,
            limit: page.limit,
        })
    }
}

impl ReplyLog for RedbStore {
    fn append_reply(&self, reply: &Reply) -> Result<()> {
        let key = record_key(reply.order.as_bytes(), reply.at, reply.id.as_bytes());
        let value = serde_json::to_vec(reply).map_err(|e| DbcmError::Storage(e.to_string()))?;
        let wt = self
            .db
            .begin_write()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        {
            let mut table = wt
                .open_table(REPLIES)
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
        }
        wt.commit()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        Ok(())
    }

    fn replies(&self, order: OrderId) -> Result<Vec<Reply>> {
        let (lower, upper) = record_bounds(order.as_bytes());
        let rt = self
            .db
            .begin_read()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        let table = rt
            .open_table(REPLIES)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;

        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(|e| DbcmError::Storage(e.to_string()))?
        {
            let (_, v) = entry.map_err(|e| DbcmError::Storage(e.to_string()))?;
            let reply: Reply = serde_json::from_slice(v.value())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            result.push(reply);
        }
        Ok(result)
    }
}

impl HookRegistry for RedbStore {
    fn append_hook(&self, record: &HookRecord) -> Result<()> {
        let key = record_key(record.order.as_bytes(), record.at, record.id.as_bytes());
        let value = serde_json::to_vec(record).map_err(|e| DbcmError::Storage(e.to_string()))?;
        let wt = self
            .db
            .begin_write()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        {
            let mut table = wt
                .open_table(HOOKS)
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
        }
        wt.commit()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        Ok(())
    }

    fn hooks(&self, order: OrderId) -> Result<Vec<HookRecord>> {
        let (lower, upper) = record_bounds(order.as_bytes());
        let rt = self
            .db
            .begin_read()
            .map_err(|e| DbcmError::Storage(e.to_string()))?;
        let table = rt
            .open_table(HOOKS)
            .map_err(|e| DbcmError::Storage(e.to_string()))?;

        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(|e| DbcmError::Storage(e.to_string()))?
        {
            let (_, v) = entry.map_err(|e| DbcmError::Storage(e.to_string()))?;
            let record: HookRecord = serde_json::from_slice(v.value())
                .map_err(|e| DbcmError::Storage(e.to_string()))?;
            result.push(record);
        }
        Ok(result)
    }

    fn latest_hook(&self, order: OrderId) -> Result<Option<HookRecord>> {
        Ok(self.hooks(order)?.pop())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
