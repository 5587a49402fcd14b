//! Error types for cluster management.

use crate::NodeRole;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A node command that exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` exited with {} (stdout: {:?}, stderr: {:?})",
            self.command,
            self.code,
            self.stdout.trim(),
            self.stderr.trim()
        )
    }
}

/// Cluster management errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No topology manifest has been written yet.
    #[error("Cluster not initialized at {0}")]
    NotInitialized(PathBuf),

    /// Every host in the pool has already been handed out in this run.
    #[error("Running out of hosts: all {pool_size} pooled hosts are in use; add more hosts")]
    HostPoolExhausted { pool_size: usize },

    /// A slave or search head was requested before any master exists.
    #[error("No master configured yet; cannot configure a {role}")]
    MissingMaster { role: NodeRole },

    /// The requested topology cannot be built.
    #[error("Invalid topology shape: {0}")]
    InvalidShape(String),

    /// Unknown role name.
    #[error("Invalid role '{0}' (expected master, slave, searchhead or forwarder)")]
    InvalidRole(String),

    /// Unknown forwarder kind.
    #[error("Forwarder must be universal, light or heavy, got '{0}'")]
    InvalidForwarderKind(String),

    /// Role configuration of a node did not complete.
    #[error("Configuring {node} failed: {source}")]
    ConfigurationFailed {
        node: String,
        #[source]
        source: Box<Error>,
    },

    /// A server-side operation did not converge within its budget.
    #[error(
        "{operation} is taking more than the maximum expected time ({elapsed:?}, {polls} polls); last status: {last_status}"
    )]
    ConvergenceTimeout {
        operation: String,
        elapsed: Duration,
        polls: u32,
        last_status: String,
    },

    /// A node command exited non-zero.
    #[error("Command execution failed: {0}")]
    CommandFailed(CommandFailure),

    /// `apply cluster-bundle` exited non-zero.
    #[error("Applying the cluster bundle failed: {0}")]
    BundleApplyFailed(CommandFailure),

    /// A node command succeeded but printed something unparseable.
    #[error("Unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    /// Node not found.
    #[error("Node {0} not found")]
    NodeNotFound(String),

    /// The transport could not run a command at all.
    #[error("Transport error on {host}: {reason}")]
    Transport { host: String, reason: String },

    /// Port scan gave up.
    #[error("Tried {tries} times, but found no open port on {host}")]
    NoOpenPort { host: String, tries: u32 },

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Wraps a failure that happened while configuring `node`.
    pub fn configuration(node: impl Into<String>, source: Error) -> Self {
        Error::ConfigurationFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
