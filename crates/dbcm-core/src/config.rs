use crate::error::Result;
use crate::permission::Grant;
use crate::types::Capability;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// How many times the engine re-reads and retries after a progress
    /// compare-and-set loses a race, before surfacing the conflict.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_max_conflict_retries() -> u32 {
    3
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self::new("")
    }
}

impl Config {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: project.into(),
            grants: Vec::new(),
            workflow: WorkflowConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.grants.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no grants configured: every workflow operation will be denied"
                    .to_string(),
            });
        }

        let mut seen: Vec<&Grant> = Vec::new();
        for grant in &self.grants {
            if grant.actor.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("grant with empty actor ({})", grant.capability),
                });
            }

            if seen.contains(&grant) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "duplicate grant for '{}': {}",
                        grant.actor, grant.capability
                    ),
                });
            } else {
                seen.push(grant);
            }

            if grant.environment.is_some() && grant.capability != Capability::Commit {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "environment scope on '{}' {} grant has no effect (scope applies to commit only)",
                        grant.actor, grant.capability
                    ),
                });
            }
        }

        if self.workflow.max_conflict_retries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_conflict_retries=0 disables conflict retry".to_string(),
            });
        } else if self.workflow.max_conflict_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "max_conflict_retries={} (>10 is unusual)",
                    self.workflow.max_conflict_retries
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
