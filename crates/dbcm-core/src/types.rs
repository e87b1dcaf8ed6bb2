use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        OrderId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyId(Uuid);

impl ReplyId {
    pub fn new() -> Self {
        ReplyId(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ReplyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookId(Uuid);

impl HookId {
    pub fn new() -> Self {
        HookId(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for HookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Target environment of a change order. Environments are opaque numeric
/// ids assigned by the embedding program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(pub i64);

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    PendingApproval,
    NotApproved,
    Approved,
    Processing,
    Completed,
    Closed,
    Reviewed,
    Hooked,
}

impl Progress {
    pub fn all() -> &'static [Progress] {
        &[
            Progress::PendingApproval,
            Progress::NotApproved,
            Progress::Approved,
            Progress::Processing,
            Progress::Completed,
            Progress::Closed,
            Progress::Reviewed,
            Progress::Hooked,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Progress::PendingApproval => "pending_approval",
            Progress::NotApproved => "not_approved",
            Progress::Approved => "approved",
            Progress::Processing => "processing",
            Progress::Completed => "completed",
            Progress::Closed => "closed",
            Progress::Reviewed => "reviewed",
            Progress::Hooked => "hooked",
        }
    }

    /// Human-readable label for list and detail rendering.
    pub fn label(self) -> &'static str {
        match self {
            Progress::PendingApproval => "pending approval",
            Progress::NotApproved => "not approved",
            Progress::Approved => "approved",
            Progress::Processing => "processing",
            Progress::Completed => "completed",
            Progress::Closed => "closed",
            Progress::Reviewed => "reviewed",
            Progress::Hooked => "on hold",
        }
    }

    /// Closed and Reviewed accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Progress::Closed | Progress::Reviewed)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Progress {
    type Err = crate::error::DbcmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(Progress::PendingApproval),
            "not_approved" => Ok(Progress::NotApproved),
            "approved" => Ok(Progress::Approved),
            "processing" => Ok(Progress::Processing),
            "completed" => Ok(Progress::Completed),
            "closed" => Ok(Progress::Closed),
            "reviewed" => Ok(Progress::Reviewed),
            "hooked" => Ok(Progress::Hooked),
            _ => Err(crate::error::DbcmError::InvalidProgress(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Commit,
    Execute,
    Audit,
}

impl Capability {
    pub fn all() -> &'static [Capability] {
        &[Capability::Commit, Capability::Execute, Capability::Audit]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Commit => "commit",
            Capability::Execute => "execute",
            Capability::Audit => "audit",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = crate::error::DbcmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Capability::Commit),
            "execute" => Ok(Capability::Execute),
            "audit" => Ok(Capability::Audit),
            _ => Err(crate::error::DbcmError::InvalidCapability(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Accepted,
    Rejected,
}

impl AuditDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditDecision::Accepted => "accepted",
            AuditDecision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OrderKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Dml,
    Ddl,
    Export,
    Ops,
}

impl OrderKind {
    pub fn all() -> &'static [OrderKind] {
        &[
            OrderKind::Dml,
            OrderKind::Ddl,
            OrderKind::Export,
            OrderKind::Ops,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderKind::Dml => "dml",
            OrderKind::Ddl => "ddl",
            OrderKind::Export => "export",
            OrderKind::Ops => "ops",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderKind::Dml => "DML change",
            OrderKind::Ddl => "DDL change",
            OrderKind::Export => "data export",
            OrderKind::Ops => "operations task",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderKind {
    type Err = crate::error::DbcmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dml" => Ok(OrderKind::Dml),
            "ddl" => Ok(OrderKind::Ddl),
            "export" => Ok(OrderKind::Export),
            "ops" => Ok(OrderKind::Ops),
            _ => Err(crate::error::DbcmError::InvalidOrderKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
