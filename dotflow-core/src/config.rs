//! Engine Configuration
//!
//! Per-thread settings for the propagation context. Configurations are plain
//! serde structs so hosts can keep them next to the rest of their settings.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When writes propagate by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// The first write of an idle period schedules a pass on the executor.
    #[default]
    Deferred,

    /// Every write propagates inline.
    Sync,
}

/// Which executor runs deferred passes and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// A virtual-clock executor driven by the host.
    #[default]
    Manual,

    /// `tokio::task::spawn_local`; requires a `LocalSet`.
    Tokio,
}

fn default_max_passes() -> usize {
    64
}

/// Settings for one propagation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default propagation mode for writes.
    pub scheduling: SchedulingMode,

    /// Executor used for deferred passes and timers.
    pub executor: ExecutorKind,

    /// Upper bound on follow-up passes within one flush.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingMode::default(),
            executor: ExecutorKind::default(),
            max_passes: default_max_passes(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == 0 {
            return Err(ConfigError::Invalid(
                "max_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
