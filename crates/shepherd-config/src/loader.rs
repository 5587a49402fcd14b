//! Merging defaults, config files and `SHEPHERD_*` variables.

use crate::{Paths, ShepherdConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SHEPHERD";

/// Keys whose environment values are comma-separated lists.
const LIST_KEYS: [&str; 2] = ["hosts.pool", "hosts.local_aliases"];

pub struct ConfigLoader {
    project_dir: PathBuf,
    paths: Paths,
}

impl ConfigLoader {
    /// Loads for the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            paths: Paths::new(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Config files that exist, lowest precedence first.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.paths
            .config_files(&self.project_dir)
            .into_iter()
            .filter(|file| file.is_file())
            .collect()
    }

    /// Defaults, then every file from [`ConfigLoader::sources`], then
    /// `SHEPHERD_<SECTION>__<KEY>` variables. Relative paths are resolved
    /// against the project and the result is validated.
    pub fn load(self) -> Result<ShepherdConfig> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ShepherdConfig::default())?);

        for file in self.sources() {
            tracing::debug!(file = %file.display(), "reading config file");
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }

        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let mut shepherd_config: ShepherdConfig = builder
            .add_source(environment)
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        shepherd_config.resolve_paths(&self.project_dir);
        shepherd_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(shepherd_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn load(project_dir: &Path) -> Result<ShepherdConfig> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    #[test]
    fn test_defaults_without_files() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new().with_project_dir(temp_dir.path());
        assert!(!loader.sources().iter().any(|file| file.starts_with(temp_dir.path())));

        let config = loader.load().unwrap();
        assert_eq!(config.node.management_port, 8089);
        assert_eq!(config.topology.slaves, 3);
        assert_eq!(config.waits.bundle_status.poll_interval_secs, 15);
        assert_eq!(config.run.state_dir, temp_dir.path().join(".shepherd"));
    }

    #[test]
    fn test_project_config() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("shepherd.toml"),
            r#"
[credentials]
password = "notchangeme"

[hosts]
pool = ["idx1.example.com", "idx2.example.com"]

[topology]
slaves = 5
multisite = true
sites = 2
site_replication_factor = "origin:2,total:3"

[waits.bundle_reload]
max_wait_secs = 60
poll_interval_secs = 3

[waits.indexing]
stable_secs = 90
"#,
        )
        .unwrap();

        let config = load(temp_dir.path()).unwrap();
        assert_eq!(config.credentials.username, "admin");
        assert_eq!(config.credentials.password, "notchangeme");
        assert_eq!(config.hosts.pool.len(), 2);
        assert_eq!(config.topology.slaves, 5);
        assert!(config.topology.multisite);
        assert_eq!(
            config.topology.site_replication_factor.as_deref(),
            Some("origin:2,total:3")
        );
        assert_eq!(config.waits.bundle_reload.max_wait_secs, 60);
        assert_eq!(config.waits.bundle_reload.poll_interval_secs, 3);
        assert_eq!(config.waits.bundle_validation.max_wait_secs, 180);
        assert_eq!(config.waits.indexing.stable_secs, 90);
        assert_eq!(config.waits.indexing.poll_interval_secs, 30);
    }

    #[test]
    fn test_local_file_overrides_project_file() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("shepherd.toml"),
            "[node]\nmanagement_port = 8089\n[run]\nstate_dir = \"/var/tmp/shepherd-state\"\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("shepherd.local.toml"),
            "[node]\nmanagement_port = 18089\n",
        )
        .unwrap();

        let loader = ConfigLoader::new().with_project_dir(temp_dir.path());
        let sources = loader.sources();
        let project_sources: Vec<_> = sources
            .iter()
            .filter(|file| file.starts_with(temp_dir.path()))
            .collect();
        assert_eq!(
            project_sources,
            vec![
                &temp_dir.path().join("shepherd.toml"),
                &temp_dir.path().join("shepherd.local.toml")
            ]
        );

        let config = loader.load().unwrap();
        assert_eq!(config.node.management_port, 18089);
        assert_eq!(config.run.state_dir, PathBuf::from("/var/tmp/shepherd-state"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("shepherd.toml"),
            "[ports]\nmin = 9000\nmax = 9001\n",
        )
        .unwrap();

        let err = load(temp_dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("ports.tries"));
    }
}
