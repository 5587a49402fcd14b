//! Configuration management for shepherd
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the caller)
//! 2. Environment variables (SHEPHERD_* prefix, `__` between sections)
//! 3. shepherd.local.toml (gitignored, local overrides)
//! 4. shepherd.toml (git-tracked, project config)
//! 5. ~/.config/shepherd/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main shepherd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShepherdConfig {
    pub credentials: Credentials,
    pub node: NodeConfig,
    pub ssh: SshConfig,
    pub hosts: HostsConfig,
    pub ports: PortRange,
    pub topology: TopologyConfig,
    pub waits: WaitsConfig,
    pub run: RunConfig,
}

/// Login used for every `-auth user:pass` suffix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "changeme".to_string(),
        }
    }
}

impl Credentials {
    /// The CLI authentication suffix, e.g. ` -auth admin:changeme`.
    pub fn auth(&self) -> String {
        format!(" -auth {}:{}", self.username, self.password)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name of the node binary below `<home>/bin`.
    pub binary: String,
    pub local_home: PathBuf,
    pub remote_home: PathBuf,
    pub management_port: u16,
    /// Scheme used when building `-master_uri`.
    pub scheme: String,
    /// Shell command that installs a node into `{home}` listening on
    /// `{management_port}`. When unset, nodes use existing installations
    /// and are moved to their management port with `set splunkd-port`.
    pub install_command: Option<String>,
    /// CLI arguments whose stdout is the apply-bundle status.
    pub status_command: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary: "splunk".to_string(),
            local_home: PathBuf::from("/opt/splunk"),
            remote_home: PathBuf::from("/opt/splunk"),
            management_port: 8089,
            scheme: "https".to_string(),
            install_command: None,
            status_command: "show cluster-status".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    /// Hosts handed out to nodes in order; empty means everything runs locally.
    pub pool: Vec<String>,
    /// Extra names that refer to the machine running the tests.
    pub local_aliases: Vec<String>,
}

/// Range scanned when looking for a free port on a node's host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
    pub tries: u32,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 8000,
            max: 65500,
            tries: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub masters: u32,
    pub slaves: u32,
    pub search_heads: u32,
    pub replication_factor: u32,
    pub search_factor: u32,
    pub multisite: bool,
    pub sites: u32,
    pub site_replication_factor: Option<String>,
    pub site_search_factor: Option<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            masters: 1,
            slaves: 3,
            search_heads: 1,
            replication_factor: 3,
            search_factor: 2,
            multisite: false,
            sites: 1,
            site_replication_factor: None,
            site_search_factor: None,
        }
    }
}

/// Budget for one convergence wait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitPolicyConfig {
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
}

impl WaitPolicyConfig {
    pub const fn new(max_wait_secs: u64, poll_interval_secs: u64) -> Self {
        Self {
            max_wait_secs,
            poll_interval_secs,
        }
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Rolling restarts scale with the number of peers that have to bounce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingRestartWait {
    pub per_slave_secs: u64,
    pub poll_interval_secs: u64,
    /// Fixed budget; when unset the budget is `per_slave_secs * slaves`.
    pub max_wait_secs: Option<u64>,
}

impl Default for RollingRestartWait {
    fn default() -> Self {
        Self {
            per_slave_secs: 100,
            poll_interval_secs: 5,
            max_wait_secs: None,
        }
    }
}

impl RollingRestartWait {
    /// Resolves the budget for a cluster with `slaves` peers.
    pub fn policy_for(&self, slaves: usize) -> WaitPolicyConfig {
        let max_wait_secs = self
            .max_wait_secs
            .unwrap_or(self.per_slave_secs * slaves as u64);
        WaitPolicyConfig::new(max_wait_secs, self.poll_interval_secs)
    }
}

/// How long an event count has to hold still before indexing counts as done.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingWait {
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub stable_secs: u64,
}

impl Default for IndexingWait {
    fn default() -> Self {
        Self {
            max_wait_secs: 1800,
            poll_interval_secs: 30,
            stable_secs: 60,
        }
    }
}

impl IndexingWait {
    pub fn policy(&self) -> WaitPolicyConfig {
        WaitPolicyConfig::new(self.max_wait_secs, self.poll_interval_secs)
    }

    pub fn stable_for(&self) -> Duration {
        Duration::from_secs(self.stable_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitsConfig {
    pub rolling_restart: RollingRestartWait,
    pub bundle_validation: WaitPolicyConfig,
    pub bundle_reload: WaitPolicyConfig,
    pub bundle_creation: WaitPolicyConfig,
    pub bundle_events: WaitPolicyConfig,
    pub bundle_status: WaitPolicyConfig,
    pub node_start: WaitPolicyConfig,
    pub indexing: IndexingWait,
}

impl Default for WaitsConfig {
    fn default() -> Self {
        Self {
            rolling_restart: RollingRestartWait::default(),
            bundle_validation: WaitPolicyConfig::new(180, 2),
            bundle_reload: WaitPolicyConfig::new(240, 2),
            bundle_creation: WaitPolicyConfig::new(120, 2),
            bundle_events: WaitPolicyConfig::new(480, 2),
            bundle_status: WaitPolicyConfig::new(2250, 15),
            node_start: WaitPolicyConfig::new(30, 10),
            indexing: IndexingWait::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Holds the cluster manifest and diags; see [`Paths`].
    pub state_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(paths::STATE_DIR),
        }
    }
}

impl ShepherdConfig {
    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.run.state_dir.is_relative() {
            self.run.state_dir = base.join(&self.run.state_dir);
        }
    }

    /// Reject settings that would make a run misbehave rather than fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.username.is_empty() {
            return Err(ConfigError::ValidationError(
                "credentials.username must not be empty".to_string(),
            ));
        }

        let ports = &self.ports;
        if ports.max <= ports.min {
            return Err(ConfigError::ValidationError(format!(
                "ports.max ({}) must be greater than ports.min ({})",
                ports.max, ports.min
            )));
        }
        if u32::from(ports.max - ports.min) < ports.tries {
            return Err(ConfigError::ValidationError(format!(
                "ports.tries ({}) must not exceed the size of the port range",
                ports.tries
            )));
        }

        let waits = &self.waits;
        let intervals = [
            ("rolling_restart", waits.rolling_restart.poll_interval_secs),
            ("bundle_validation", waits.bundle_validation.poll_interval_secs),
            ("bundle_reload", waits.bundle_reload.poll_interval_secs),
            ("bundle_creation", waits.bundle_creation.poll_interval_secs),
            ("bundle_events", waits.bundle_events.poll_interval_secs),
            ("bundle_status", waits.bundle_status.poll_interval_secs),
            ("node_start", waits.node_start.poll_interval_secs),
            ("indexing", waits.indexing.poll_interval_secs),
        ];
        for (name, interval) in intervals {
            if interval == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "waits.{name}.poll_interval_secs must be at least 1"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShepherdConfig::default();
        assert_eq!(config.credentials.username, "admin");
        assert_eq!(config.topology.slaves, 3);
        assert_eq!(config.topology.replication_factor, 3);
        assert!(!config.topology.multisite);
        assert!(config.hosts.pool.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_suffix() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "notchangeme".to_string(),
        };
        assert_eq!(credentials.auth(), " -auth admin:notchangeme");
    }

    #[test]
    fn test_rolling_restart_budget_scales_with_slaves() {
        let waits = WaitsConfig::default();
        assert_eq!(waits.rolling_restart.policy_for(3).max_wait_secs, 300);
        assert_eq!(waits.rolling_restart.policy_for(3).poll_interval_secs, 5);

        let fixed = RollingRestartWait {
            max_wait_secs: Some(42),
            ..Default::default()
        };
        assert_eq!(fixed.policy_for(10).max_wait_secs, 42);
    }

    #[test]
    fn test_validate_rejects_narrow_port_range() {
        let mut config = ShepherdConfig::default();
        config.ports = PortRange {
            min: 9000,
            max: 9010,
            tries: 100,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = ShepherdConfig::default();
        config.waits.bundle_reload = WaitPolicyConfig::new(240, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = ShepherdConfig::default();
        config.resolve_paths("/home/user/project");

        assert_eq!(
            config.run.state_dir,
            PathBuf::from("/home/user/project/.shepherd")
        );
    }
}
