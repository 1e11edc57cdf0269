//! Configuration for the mock server.

mod listen;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::action::TimeoutConfig;
pub use crate::event_log::EventLogConfig;
pub use crate::expectation::RegistryConfig;
pub use crate::scheduler::SchedulerConfig;
pub use listen::ListenConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,

    // ===== Expectation files =====
    /// Expectations loaded at start-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_json_path: Option<PathBuf>,
    /// Mirror API-created expectations to `persisted_expectations_path`
    #[serde(default)]
    pub persist_expectations: bool,
    #[serde(default = "default_persisted_path")]
    pub persisted_expectations_path: PathBuf,
}

fn default_persisted_path() -> PathBuf {
    PathBuf::from("persistedExpectations.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            registry: RegistryConfig::default(),
            scheduler: SchedulerConfig::default(),
            timeouts: TimeoutConfig::default(),
            event_log: EventLogConfig::default(),
            initialization_json_path: None,
            persist_expectations: false,
            persisted_expectations_path: default_persisted_path(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.host.trim().is_empty() {
            anyhow::bail!("listen.host must not be empty");
        }
        if self.registry.max_expectations == 0 {
            anyhow::bail!("registry.max_expectations must be greater than 0");
        }
        if self.scheduler.threads == 0 {
            anyhow::bail!("scheduler.threads must be greater than 0");
        }
        if self.scheduler.queue_size == 0 {
            anyhow::bail!("scheduler.queue_size must be greater than 0");
        }
        if self.timeouts.max_socket_timeout_ms == 0 || self.timeouts.max_future_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than 0 milliseconds");
        }
        if self.event_log.max_entries == 0 {
            anyhow::bail!("event_log.max_entries must be greater than 0");
        }
        if self.persist_expectations && self.persisted_expectations_path.as_os_str().is_empty() {
            anyhow::bail!(
                "persisted_expectations_path is required when persist_expectations is enabled"
            );
        }
        Ok(())
    }
}
