//! Read-side views over orders: point lookup, detail assembly, and the
//! filtered listings behind environment and owner pages. Queries take no
//! capability; gating the read surface is the embedding program's job.

use crate::error::Result;
use crate::hook::HookRecord;
use crate::order::Order;
use crate::reply::Reply;
use crate::store::{HookRegistry, OrderFilter, OrderStore, Page, Paged, ReplyLog};
use crate::types::{EnvironmentId, OrderId, Progress};
use serde::Serialize;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// OrderDetail
// ---------------------------------------------------------------------------

/// Everything a detail screen renders in one call: the order, its discussion
/// thread, the full hold history, and the hold currently in force (if any).
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub replies: Vec<Reply>,
    pub hooks: Vec<HookRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_hook: Option<HookRecord>,
}

// ---------------------------------------------------------------------------
// OrderQueryService
// ---------------------------------------------------------------------------

pub struct OrderQueryService {
    orders: Arc<dyn OrderStore>,
    replies: Arc<dyn ReplyLog>,
    hooks: Arc<dyn HookRegistry>,
}

impl OrderQueryService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        replies: Arc<dyn ReplyLog>,
        hooks: Arc<dyn HookRegistry>,
    ) -> Self {
        Self {
            orders,
            replies,
            hooks,
        }
    }

    pub fn order(&self, id: OrderId) -> Result<Order> {
        self.orders.get(id)
    }

    /// The detail-page payload. `active_hook` is populated only while the
    /// order actually sits in Hooked; the registry's latest record for a
    /// released order is history, not an active hold.
    pub fn detail(&self, id: OrderId) -> Result<OrderDetail> {
        let order = self.orders.get(id)?;
        let replies = self.replies.replies(id)?;
        let hooks = self.hooks.hooks(id)?;
        let active_hook = if order.progress == Progress::Hooked {
            hooks.last().cloned()
        } else {
            None
        };
        Ok(OrderDetail {
            order,
            replies,
            hooks,
            active_hook,
        })
    }

    /// Filtered listing, ascending `(created_at, id)`, stable under
    /// concurrent inserts because the sort key never changes after commit.
    pub fn list(&self, filter: &OrderFilter, page: Page) -> Result<Paged<Order>> {
        self.orders.list(filter, page)
    }

    /// The "my orders" page.
    pub fn orders_by_owner(&self, owner: &str, page: Page) -> Result<Paged<Order>> {
        let filter = OrderFilter {
            owner: Some(owner.to_string()),
            ..Default::default()
        };
        self.orders.list(&filter, page)
    }

    /// The per-environment listing page.
    pub fn orders_by_environment(
        &self,
        environment: EnvironmentId,
        page: Page,
    ) -> Result<Paged<Order>> {
        let filter = OrderFilter {
            environment: Some(environment),
            ..Default::default()
        };
        self.orders.list(&filter, page)
    }

    pub fn replies(&self, id: OrderId) -> Result<Vec<Reply>> {
        self.orders.get(id)?;
        self.replies.replies(id)
    }

    /// The hold currently in force, `Some` iff the order is Hooked.
    pub fn active_hook(&self, id: OrderId) -> Result<Option<HookRecord>> {
        let order = self.orders.get(id)?;
        if order.progress == Progress::Hooked {
            self.hooks.latest_hook(id)
        } else {
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
