use crate::error::{DbcmError, Result};
use crate::types::{AuditDecision, EnvironmentId, OrderId, OrderKind, Progress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_TITLE_LEN: usize = 200;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// One applied transition. The order's history is the total sequence of
/// these, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: Progress,
    pub actor: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Trail records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub decision: AuditDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseInfo {
    pub actor: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// OrderDraft
// ---------------------------------------------------------------------------

/// What a submitter hands to the engine. The payload is opaque text; the
/// engine never parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub title: String,
    pub kind: OrderKind,
    pub environment: EnvironmentId,
    pub payload: String,
}

impl OrderDraft {
    pub fn new(
        title: impl Into<String>,
        kind: OrderKind,
        environment: EnvironmentId,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind,
            environment,
            payload: payload.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(DbcmError::Validation {
                field: "title".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(DbcmError::Validation {
                field: "title".to_string(),
                reason: format!("must be at most {MAX_TITLE_LEN} characters"),
            });
        }
        if self.payload.trim().is_empty() {
            return Err(DbcmError::Validation {
                field: "payload".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub title: String,
    pub kind: OrderKind,
    pub environment: EnvironmentId,
    pub owner: String,
    pub payload: String,
    pub progress: Progress,
    /// Bumped by every applied transition. The storage compare-and-set
    /// guards on this, not on `progress`, so a hook/unhook pair that lands
    /// back on the same progress still fails stale writers.
    #[serde(default)]
    pub revision: u64,
    /// State the order was in when it was hooked. Some iff progress is
    /// Hooked; unhook restores it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooked_from: Option<Progress>,
    #[serde(default)]
    pub auditor: Vec<AuditEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<ReviewEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_info: Option<CloseInfo>,
    pub history: Vec<ProgressEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a freshly committed order. Legality and authorization are the
    /// engine's job; this only shapes the record.
    pub fn submit(draft: OrderDraft, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let now = Utc::now();

        Self {
            id: OrderId::new(),
            title: draft.title,
            kind: draft.kind,
            environment: draft.environment,
            owner: owner.clone(),
            payload: draft.payload,
            progress: Progress::PendingApproval,
            revision: 1,
            hooked_from: None,
            auditor: Vec::new(),
            reviewer: None,
            close_info: None,
            history: vec![ProgressEvent {
                progress: Progress::PendingApproval,
                actor: owner,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, actor: impl Into<String>, to: Progress) -> DateTime<Utc> {
        let now = Utc::now();
        self.progress = to;
        self.revision += 1;
        self.updated_at = now;
        self.history.push(ProgressEvent {
            progress: to,
            actor: actor.into(),
            at: now,
        });
        now
    }

    // ---------------------------------------------------------------------------
    // Trail mutations
    // ---------------------------------------------------------------------------

    pub fn record_audit(
        &mut self,
        actor: impl Into<String>,
        decision: AuditDecision,
        comment: Option<String>,
    ) {
        let actor = actor.into();
        let to = match decision {
            AuditDecision::Accepted => Progress::Approved,
            AuditDecision::Rejected => Progress::NotApproved,
        };
        let at = self.apply(actor.clone(), to);
        self.auditor.push(AuditEntry {
            actor,
            decision,
            comment,
            at,
        });
    }

    pub fn begin_processing(&mut self, actor: impl Into<String>) {
        self.apply(actor, Progress::Processing);
    }

    pub fn record_completion(&mut self, actor: impl Into<String>) {
        self.apply(actor, Progress::Completed);
    }

    pub fn record_close(&mut self, actor: impl Into<String>, reason: impl Into<String>) {
        let actor = actor.into();
        let at = self.apply(actor.clone(), Progress::Closed);
        self.close_info = Some(CloseInfo {
            actor,
            reason: reason.into(),
            at,
        });
    }

    pub fn record_review(&mut self, actor: impl Into<String>, comment: Option<String>) {
        let actor = actor.into();
        let at = self.apply(actor.clone(), Progress::Reviewed);
        self.reviewer = Some(ReviewEntry { actor, comment, at });
    }

    /// Parks the order, remembering where it came from.
    pub fn hold(&mut self, actor: impl Into<String>) -> Progress {
        let prior = self.progress;
        self.hooked_from = Some(prior);
        self.apply(actor, Progress::Hooked);
        prior
    }

    /// Restores the pre-hook state. Returns None when no prior state is
    /// recorded, which a well-formed Hooked order never lacks.
    pub fn release(&mut self, actor: impl Into<String>) -> Option<Progress> {
        let prior = self.hooked_from.take()?;
        self.apply(actor, prior);
        Some(prior)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
