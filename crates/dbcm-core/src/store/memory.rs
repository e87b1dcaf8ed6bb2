use crate::error::{DbcmError, Result};
use crate::hook::HookRecord;
use crate::order::Order;
use crate::reply::Reply;
use crate::store::{HookRegistry, OrderFilter, OrderStore, Page, Paged, ReplyLog};
use crate::types::OrderId;
use std::collections::HashMap;
use std::sync::RwLock;

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    orders: HashMap<OrderId, Order>,
    replies: Vec<Reply>,
    hooks: Vec<HookRecord>,
}

/// In-memory backend implementing all three storage interfaces. The
/// compare-and-set runs under the write lock, so it is atomic with respect
/// to every other mutation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| DbcmError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| DbcmError::Storage("lock poisoned".to_string()))
    }
}

impl OrderStore for MemoryStore {
    fn insert(&self, order: &Order) -> Result<()> {
        let mut inner = self.write()?;
        if inner.orders.contains_key(&order.id) {
            return Err(DbcmError::Storage(format!(
                "order already exists: {}",
                order.id
            )));
        }
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn get(&self, id: OrderId) -> Result<Order> {
        let inner = self.read()?;
        inner
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| DbcmError::OrderNotFound(id.to_string()))
    }

    fn update_progress(&self, id: OrderId, expected_revision: u64, updated: &Order) -> Result<()> {
        let mut inner = self.write()?;
        let current = inner
            .orders
            .get_mut(&id)
            .ok_or_else(|| DbcmError::OrderNotFound(id.to_string()))?;
        if current.revision != expected_revision {
            return Err(DbcmError::Conflict {
                id,
                current: current.progress,
            });
        }
        *current = updated.clone();
        Ok(())
    }

    fn list(&self, filter: &OrderFilter, page: Page) -> Result<Paged<Order>> {
        let inner = self.read()?;
        let mut matches: Vec<&Order> = inner
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .collect();
        matches.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        Ok(Paged {
            items,
            total,
            offset: page.offset,
            limit: page.limit,
        })
    }
}

impl ReplyLog for MemoryStore {
    fn append_reply(&self, reply: &Reply) -> Result<()> {
        self.write()?.replies.push(reply.clone());
        Ok(())
    }

    fn replies(&self, order: OrderId) -> Result<Vec<Reply>> {
        let inner = self.read()?;
        let mut replies: Vec<Reply> = inner
            .replies
            .iter()
            .filter(|r| r.order == order)
            .cloned()
            .collect();
        replies.sort_by(|a, b| (a.at, a.id).cmp(&(b.at, b.id)));
        Ok(replies)
    }
}

impl HookRegistry for MemoryStore {
    fn append_hook(&self, record: &HookRecord) -> Result<()> {
        self.write()?.hooks.push(record.clone());
        Ok(())
    }

    fn hooks(&self, order: OrderId) -> Result<Vec<HookRecord>> {
        let inner = self.read()?;
        let mut hooks: Vec<HookRecord> = inner
            .hooks
            .iter()
            .filter(|h| h.order == order)
            .cloned()
            .collect();
        hooks.sort_by(|a, b| (a.at, a.id).cmp(&(b.at, b.id)));
        Ok(hooks)
    }

    fn latest_hook(&self, order: OrderId) -> Result<Option<HookRecord>> {
        Ok(self.hooks(order)?.pop())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
