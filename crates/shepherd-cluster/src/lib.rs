//! Cluster topologies for integration test runs.
//!
//! Builds multi-node master/slave/search-head clusters, drives them through
//! a [`NodeHandle`] capability, and waits for server-side operations such as
//! bundle pushes and rolling restarts to converge:
//! - [`RoleAssigner`] turns a [`TopologyShape`] into a [`Cluster`]
//! - [`Cluster`] registers nodes and tears them down in creation order
//! - [`poller`] is the single convergence loop every wait goes through
//! - [`ClusteringSuite`] provides per-suite and per-test hooks, collecting
//!   node diagnostics when a test fails
//!
//! [`instance`] drives real installations locally or over SSH;
//! [`testing`] records calls instead.

pub mod assign;
pub mod bundle;
pub mod cleanup;
pub mod command;
pub mod diag;
pub mod error;
pub mod forwarder;
pub mod hosts;
pub mod indexing;
pub mod instance;
pub mod lifecycle;
pub mod manifest;
pub mod node;
pub mod poller;
pub mod ports;
pub mod role;
pub mod shape;
pub mod testing;
pub mod topology;

pub use assign::{NodeSpec, RoleAssigner, RoleRequest};
pub use error::{CommandFailure, Error, Result};
pub use forwarder::Forwarder;
pub use hosts::{HostIdentity, HostPool, RunContext, ServerNames};
pub use instance::{Instance, InstanceProvisioner, SshTarget, Transport};
pub use lifecycle::ClusteringSuite;
pub use manifest::TopologyManifest;
pub use node::{CommandOutput, HostTarget, NodeHandle, NodeProvisioner, Package, TransportKind};
pub use poller::{Converged, ConvergenceRule, WaitPolicy};
pub use ports::PortScanner;
pub use role::{ForwarderKind, NodeRole, Site};
pub use shape::TopologyShape;
pub use topology::{Cluster, ClusterNode, NodeInfo};

use shepherd_config::ShepherdConfig;

/// Run-wide state from configuration: the host pool and how to recognise
/// the local machine.
pub fn run_context(config: &ShepherdConfig) -> RunContext {
    let identity = HostIdentity::detect(config.hosts.local_aliases.clone());
    RunContext::new(HostPool::new(config.hosts.pool.clone()), identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_context_from_config() {
        let mut config = ShepherdConfig::default();
        config.hosts.pool = vec!["idx1".to_string(), "idx2".to_string()];
        config.hosts.local_aliases = vec!["buildbox".to_string()];

        let run = run_context(&config);
        assert_eq!(run.hosts.len(), 2);
        assert!(run.identity.is_local("buildbox"));
        assert_eq!(run.resolve(None).unwrap().host, "idx1");
    }
}
