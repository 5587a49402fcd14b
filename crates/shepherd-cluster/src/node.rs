//! The capability interface the cluster drives nodes through.
//!
//! Installation, process control and transport all live behind
//! [`NodeHandle`]; the cluster only composes command lines and reads back
//! exit codes and status strings.

use crate::{CommandFailure, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Result of running one node command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn into_failure(self, command: &str) -> CommandFailure {
        CommandFailure {
            command: command.to_string(),
            code: self.code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }

    /// Turns a non-zero exit into [`Error::CommandFailed`].
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed(self.into_failure(command)))
        }
    }
}

/// Whether a host is driven in-process or over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Local,
    Remote,
}

/// Where a node is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub host: String,
    pub transport: TransportKind,
}

impl HostTarget {
    pub fn local(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            transport: TransportKind::Local,
        }
    }

    pub fn remote(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            transport: TransportKind::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.transport == TransportKind::Remote
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// Which package a node is installed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Package {
    /// Full instance, used for cluster members and heavy/light forwarders.
    Full,
    /// Stripped-down forwarder package.
    UniversalForwarder,
}

/// One running instance.
#[allow(async_fn_in_trait)]
pub trait NodeHandle {
    /// Host name without scheme or port.
    fn host(&self) -> &str;

    /// Installation directory on the host.
    fn home(&self) -> &Path;

    /// Management (REST) port.
    fn management_port(&self) -> u16;

    async fn install(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;

    async fn is_running(&self) -> Result<bool>;

    /// Runs a node CLI command, e.g. `status` or `enable listen 9997 -auth ..`.
    async fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Like [`NodeHandle::execute`], but a non-zero exit is an error.
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.execute(command).await?.check(command)
    }

    async fn uninstall(&self) -> Result<()>;

    /// Removes and recreates a directory below [`NodeHandle::home`].
    async fn reset_dir(&self, relative: &Path) -> Result<()>;

    /// Sets the server name; must be unique across the topology.
    async fn set_server_name(&self, name: &str) -> Result<()>;

    /// The apply-bundle status string reported by this node.
    async fn apply_bundle_status(&self) -> Result<String>;

    /// Moves `path` off the node's host into the local directory `dir` and
    /// returns where it landed.
    async fn fetch(&self, path: &Path, dir: &Path) -> Result<PathBuf>;
}

/// Creates node handles on hosts.
#[allow(async_fn_in_trait)]
pub trait NodeProvisioner {
    type Handle: NodeHandle;

    /// Prepares a new, not yet installed, node on `target`.
    async fn provision(&self, target: &HostTarget, package: Package) -> Result<Self::Handle>;

    /// Re-opens a node created earlier, e.g. from a saved manifest.
    async fn attach(
        &self,
        target: &HostTarget,
        home: &Path,
        management_port: u16,
    ) -> Result<Self::Handle>;

    /// A port nothing is listening on yet on `target`.
    async fn find_open_port(&self, target: &HostTarget) -> Result<u16>;
}
