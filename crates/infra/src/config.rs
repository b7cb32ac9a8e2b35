//! Configuration loading and representation.
//!
//! Sources, later ones winning:
//! 1. built-in defaults (a complete, valid configuration)
//! 2. optional `procura.toml` in the working directory
//! 3. `PROCURA__SECTION__KEY` environment variables (after `.env` is loaded)

use std::time::Duration;

use config::{Config as Cfg, Environment, File};
use serde::Deserialize;

use procura_approvals::StageDescriptor;
use procura_auth::RoleCode;
use procura_observability::LoggingConfig;

/// Which approver set governs a stage that is already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproverResolution {
    /// Re-derive from the org chart on every check and every view.
    #[default]
    Live,
    /// Use the approvers captured when the stage was entered.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub stages: Vec<StageDescriptor>,
    pub approver_resolution: ApproverResolution,
    /// Extra attempts after a lost optimistic-concurrency race.
    pub max_conflict_retries: u32,
    /// Attempts at writing the requisition status cache after a ledger append.
    pub status_write_retries: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            stages: StageDescriptor::default_plan(),
            approver_resolution: ApproverResolution::Live,
            max_conflict_retries: 3,
            status_write_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Holding this role directly grants every permission.
    pub admin_role: RoleCode,
    pub cache_ttl_secs: u64,
    pub max_inheritance_depth: usize,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            admin_role: RoleCode::new("admin"),
            cache_ttl_secs: 300,
            max_inheritance_depth: 8,
        }
    }
}

impl PermissionsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workflow: WorkflowConfig,
    pub permissions: PermissionsConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load from `procura.toml` (optional) and the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::load_from("procura")
    }

    /// Load from the named file (extension inferred, optional) and the environment.
    pub fn load_from(file: &str) -> Result<Self, config::ConfigError> {
        let settings = Cfg::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("PROCURA").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Install the global tracing subscriber described by `logging`.
    pub fn init_tracing(&self) {
        procura_observability::init(&self.logging);
    }
}
