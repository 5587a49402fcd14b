//! Where shepherd reads configuration from and keeps run state.
//!
//! ```text
//! ~/.config/shepherd/config.toml      user defaults
//! <project>/shepherd.toml             project config
//! <project>/shepherd.local.toml       local overrides, not committed
//! <project>/.shepherd/                state directory (`run.state_dir`)
//!     cluster/topology.toml           manifest of the cluster that is up
//!     diags/                          collected diag tarballs
//! ```

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const PROJECT_CONFIG: &str = "shepherd.toml";
pub const LOCAL_CONFIG: &str = "shepherd.local.toml";
/// Default `run.state_dir`, relative to the project.
pub const STATE_DIR: &str = ".shepherd";

pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("io", "Shepherd", "shepherd"),
        }
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_CONFIG)
    }

    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_CONFIG)
    }

    /// Config files for `project_dir`, lowest precedence first, whether or
    /// not they exist.
    pub fn config_files(&self, project_dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let project_dir = project_dir.as_ref();
        let mut files = Vec::with_capacity(3);
        match self.user_config_file() {
            Ok(file) => files.push(file),
            Err(e) => tracing::debug!(error = %e, "no user config location"),
        }
        files.push(Self::project_config_file(project_dir));
        files.push(Self::local_config_file(project_dir));
        files
    }

    /// Manifest of the cluster that is up.
    pub fn manifest_file(state_dir: impl AsRef<Path>) -> PathBuf {
        state_dir.as_ref().join("cluster").join("topology.toml")
    }

    /// Default destination of diag tarballs.
    pub fn diags_dir(state_dir: impl AsRef<Path>) -> PathBuf {
        state_dir.as_ref().join("diags")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_files_in_precedence_order() {
        let files = Paths::new().config_files("/work/project");
        let project: Vec<_> = files.iter().rev().take(2).collect();
        assert_eq!(project[0], &PathBuf::from("/work/project/shepherd.local.toml"));
        assert_eq!(project[1], &PathBuf::from("/work/project/shepherd.toml"));
        if files.len() == 3 {
            assert!(files[0].ends_with("config.toml"));
            assert!(files[0].to_string_lossy().contains("shepherd"));
        }
    }

    #[test]
    fn test_state_layout() {
        let state = Path::new("/work/project/.shepherd");
        assert_eq!(
            Paths::manifest_file(state),
            PathBuf::from("/work/project/.shepherd/cluster/topology.toml")
        );
        assert_eq!(Paths::diags_dir(state), PathBuf::from("/work/project/.shepherd/diags"));
    }
}
