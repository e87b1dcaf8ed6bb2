//! Storage interfaces for orders, replies, and hook records.
//!
//! The engine and query service consume these traits; `MemoryStore` backs
//! tests and short-lived embeddings, `RedbStore` is the durable backend.

use crate::error::Result;
use crate::hook::HookRecord;
use crate::order::Order;
use crate::reply::Reply;
use crate::types::{EnvironmentId, OrderId, OrderKind, Progress};
use serde::{Deserialize, Serialize};

pub mod db;
pub mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Offset/limit window into a filtered listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// One window of a listing plus the total number of rows matching the
/// filter, so callers can render page controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// OrderFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OrderKind>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(env) = self.environment {
            if order.environment != env {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if &order.owner != owner {
                return false;
            }
        }
        if let Some(progress) = self.progress {
            if order.progress != progress {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if order.kind != kind {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Storage traits
// ---------------------------------------------------------------------------

pub trait OrderStore: Send + Sync {
    /// Insert a freshly committed order. The id must not already exist.
    fn insert(&self, order: &Order) -> Result<()>;

    fn get(&self, id: OrderId) -> Result<Order>;

    /// Compare-and-set: replace the stored order iff its revision still
    /// equals `expected_revision`. Guarding on the revision rather than the
    /// progress keeps a hook/unhook pair (which restores the prior progress)
    /// from letting a stale writer through. Fails with `Conflict` carrying
    /// the current progress when another writer got there first.
    fn update_progress(&self, id: OrderId, expected_revision: u64, updated: &Order) -> Result<()>;

    /// Orders matching `filter`, ascending `(created_at, id)`, windowed by
    /// `page`. `total` counts every match, not just the window.
    fn list(&self, filter: &OrderFilter, page: Page) -> Result<Paged<Order>>;
}

pub trait ReplyLog: Send + Sync {
    fn append_reply(&self, reply: &Reply) -> Result<()>;

    /// All replies for an order, ascending `(at, id)`.
    fn replies(&self, order: OrderId) -> Result<Vec<Reply>>;
}

pub trait HookRegistry: Send + Sync {
    fn append_hook(&self, record: &HookRecord) -> Result<()>;

    /// Full hook history for an order, ascending `(at, id)`.
    fn hooks(&self, order: OrderId) -> Result<Vec<HookRecord>>;

    /// The most recent hook record, active while the order is Hooked.
    fn latest_hook(&self, order: OrderId) -> Result<Option<HookRecord>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
