use crate::types::{HookId, OrderId, Progress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HookRecord
// ---------------------------------------------------------------------------

/// One hold placed on an order. Records are append-only; the latest record
/// for an order is the active one while the order sits in Hooked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRecord {
    pub id: HookId,
    pub order: OrderId,
    pub actor: String,
    pub reason: String,
    /// State the order held immediately before the hook.
    pub hooked_from: Progress,
    pub at: DateTime<Utc>,
}

impl HookRecord {
    pub fn new(
        order: OrderId,
        actor: impl Into<String>,
        reason: impl Into<String>,
        hooked_from: Progress,
    ) -> Self {
        Self {
            id: HookId::new(),
            order,
            actor: actor.into(),
            reason: reason.into(),
            hooked_from,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
