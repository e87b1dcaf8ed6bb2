use crate::types::{OrderId, ReplyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// A discussion message attached to an order. Replies never change the
/// order's lifecycle state and are accepted in every state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub order: OrderId,
    pub actor: String,
    pub body: String,
    pub at: DateTime<Utc>,
}

impl Reply {
    pub fn new(order: OrderId, actor: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: ReplyId::new(),
            order,
            actor: actor.into(),
            body: body.into(),
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
