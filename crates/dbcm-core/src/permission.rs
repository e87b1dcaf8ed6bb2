use crate::config::Config;
use crate::types::{Capability, EnvironmentId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Grant
// ---------------------------------------------------------------------------

/// One capability granted to an actor. A grant may be scoped to a single
/// environment; scope only matters for Commit checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Grant {
    pub actor: String,
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentId>,
}

// ---------------------------------------------------------------------------
// PermissionGate
// ---------------------------------------------------------------------------

/// Capability evaluation for workflow operations. The engine asks; the
/// embedding program decides where grants come from.
pub trait PermissionGate: Send + Sync {
    /// Whether the actor holds the capability. `environment` is the scope
    /// of the check and is set only when gating a commit; checks without a
    /// scope accept grants of any scope.
    fn has_capability(
        &self,
        actor: &str,
        capability: Capability,
        environment: Option<EnvironmentId>,
    ) -> bool;

    /// Whether the actor holds at least one of the capabilities.
    fn has_any(
        &self,
        actor: &str,
        capabilities: &[Capability],
        environment: Option<EnvironmentId>,
    ) -> bool {
        capabilities
            .iter()
            .any(|&c| self.has_capability(actor, c, environment))
    }
}

// ---------------------------------------------------------------------------
// StaticGrants
// ---------------------------------------------------------------------------

/// Config-backed gate: a fixed grant table, looked up per check. Unknown
/// actors hold nothing.
#[derive(Debug, Clone, Default)]
pub struct StaticGrants {
    grants: Vec<Grant>,
}

impl StaticGrants {
    pub fn new(grants: Vec<Grant>) -> Self {
        Self { grants }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.grants.clone())
    }
}

impl PermissionGate for StaticGrants {
    fn has_capability(
        &self,
        actor: &str,
        capability: Capability,
        environment: Option<EnvironmentId>,
    ) -> bool {
        self.grants.iter().any(|g| {
            if g.actor != actor || g.capability != capability {
                return false;
            }
            match (g.environment, environment) {
                // Unscoped grants match any check.
                (None, _) => true,
                // Checks without a scope accept grants of any scope.
                (Some(_), None) => true,
                (Some(scope), Some(target)) => scope == target,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
