//! The topology registry: every node of one cluster, its forwarder and any
//! files created for it.

use crate::forwarder::Forwarder;
use crate::hosts::RunContext;
use crate::poller::WaitPolicy;
use crate::{ForwarderKind, HostTarget, NodeHandle, NodeProvisioner, NodeRole, Result, Site};
use chrono::{DateTime, Utc};
use shepherd_config::ShepherdConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::time::sleep;

/// A node registered in a cluster.
#[derive(Debug)]
pub struct ClusterNode<H> {
    pub handle: H,
    pub role: NodeRole,
    pub site: Option<Site>,
    pub host: HostTarget,
    pub replication_port: Option<u16>,
    /// Port the node receives forwarded data on (slaves only).
    pub tcp_input_port: Option<u16>,
    pub server_name: String,
    pub created_at: DateTime<Utc>,
    /// Every site of the topology (multisite master only).
    pub available_sites: Vec<Site>,
}

impl<H: NodeHandle> ClusterNode<H> {
    pub fn new(handle: H, host: HostTarget, server_name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            handle,
            role: NodeRole::Unassigned,
            site: None,
            host,
            replication_port: None,
            tcp_input_port: None,
            server_name,
            created_at,
            available_sites: Vec::new(),
        }
    }

    /// `host:port` forwarders send data to, once an input port is enabled.
    pub fn listen_address(&self) -> Option<String> {
        self.tcp_input_port
            .map(|port| format!("{}:{port}", self.host.host))
    }

    async fn teardown(&self) {
        tracing::info!(node = %self.server_name, role = %self.role, "tearing down node");
        if let Err(e) = self.handle.stop().await {
            tracing::warn!(node = %self.server_name, error = %e, "failed to stop node");
        }
        if let Err(e) = self.handle.uninstall().await {
            tracing::warn!(node = %self.server_name, error = %e, "failed to uninstall node");
        }
    }
}

/// Snapshot of one node, as reported by [`Cluster::log_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub server_name: String,
    pub role: NodeRole,
    pub site: Option<Site>,
    pub host: String,
    pub home: PathBuf,
    pub management_port: u16,
    pub status: String,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n\tMode = {}\n\tHost = {}\n\tHome = {}\n\tManagement port = {}\n\tStatus = {}",
            self.server_name,
            self.role,
            self.host,
            self.home.display(),
            self.management_port,
            self.status.trim().replace('\n', "\n\t")
        )
    }
}

/// A cluster under test.
///
/// Owns its node handles exclusively. Nodes are kept in creation order,
/// which is also the order they are torn down in.
pub struct Cluster<P: NodeProvisioner> {
    pub(crate) provisioner: P,
    pub(crate) run: RunContext,
    pub(crate) config: ShepherdConfig,
    pub(crate) nodes: Vec<ClusterNode<P::Handle>>,
    pub(crate) forwarder: Option<Forwarder<P::Handle>>,
    pub(crate) forwarder_kind: ForwarderKind,
    artifacts: Vec<PathBuf>,
}

impl<P: NodeProvisioner> fmt::Debug for Cluster<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<(&str, NodeRole)> = self
            .nodes
            .iter()
            .map(|node| (node.server_name.as_str(), node.role))
            .collect();
        f.debug_struct("Cluster")
            .field("nodes", &nodes)
            .field(
                "forwarder",
                &self.forwarder.as_ref().map(|forwarder| forwarder.node.server_name.as_str()),
            )
            .field("forwarder_kind", &self.forwarder_kind)
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl<P: NodeProvisioner> Cluster<P> {
    /// An empty cluster; populate it with [`crate::RoleAssigner`] or
    /// [`Cluster::new_node`].
    pub fn new(provisioner: P, run: RunContext, config: ShepherdConfig) -> Self {
        Self {
            provisioner,
            run,
            config,
            nodes: Vec::new(),
            forwarder: None,
            forwarder_kind: ForwarderKind::default(),
            artifacts: Vec::new(),
        }
    }

    pub fn config(&self) -> &ShepherdConfig {
        &self.config
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// The ` -auth user:pass` suffix for node commands.
    pub(crate) fn auth(&self) -> String {
        self.config.credentials.auth()
    }

    /// Every node except the forwarder, in creation order.
    pub fn nodes(&self) -> &[ClusterNode<P::Handle>] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.forwarder.is_none()
    }

    pub fn master(&self) -> Option<&ClusterNode<P::Handle>> {
        self.nodes.iter().find(|node| node.role == NodeRole::Master)
    }

    pub fn slaves(&self) -> impl Iterator<Item = &ClusterNode<P::Handle>> {
        self.with_role(NodeRole::Slave)
    }

    pub fn search_heads(&self) -> impl Iterator<Item = &ClusterNode<P::Handle>> {
        self.with_role(NodeRole::SearchHead)
    }

    /// Nodes not configured as cluster members.
    pub fn other_nodes(&self) -> impl Iterator<Item = &ClusterNode<P::Handle>> {
        self.with_role(NodeRole::Unassigned)
    }

    fn with_role(&self, role: NodeRole) -> impl Iterator<Item = &ClusterNode<P::Handle>> {
        self.nodes.iter().filter(move |node| node.role == role)
    }

    pub fn nodes_in_site(&self, site: Site) -> impl Iterator<Item = &ClusterNode<P::Handle>> {
        self.nodes
            .iter()
            .filter(move |node| node.site == Some(site))
    }

    pub fn node(&self, server_name: &str) -> Option<&ClusterNode<P::Handle>> {
        self.nodes
            .iter()
            .find(|node| node.server_name == server_name)
    }

    pub fn forwarder(&self) -> Option<&Forwarder<P::Handle>> {
        self.forwarder.as_ref()
    }

    pub fn forwarder_mut(&mut self) -> Option<&mut Forwarder<P::Handle>> {
        self.forwarder.as_mut()
    }

    pub fn forwarder_kind(&self) -> ForwarderKind {
        self.forwarder_kind
    }

    /// Kind used the next time a forwarder is created. An existing forwarder
    /// is left as it is.
    pub fn set_forwarder_kind(&mut self, kind: ForwarderKind) {
        if let Some(forwarder) = &self.forwarder {
            if forwarder.kind != kind {
                tracing::warn!(
                    current = ?forwarder.kind,
                    requested = ?kind,
                    "forwarder already exists; new kind applies to the next one"
                );
            }
        }
        self.forwarder_kind = kind;
    }

    /// A file or directory removed when the cluster is torn down.
    pub fn register_artifact(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Stops and uninstalls every node, then the forwarder, then removes
    /// artifacts.
    ///
    /// Failures are logged and skipped so one broken node does not keep the
    /// rest from being cleaned up. The registry is empty afterwards.
    pub async fn teardown(&mut self) {
        tracing::info!(nodes = self.nodes.len(), "tearing down cluster");

        let nodes = std::mem::take(&mut self.nodes);
        for node in &nodes {
            node.teardown().await;
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.node.teardown().await;
        }

        for artifact in self.artifacts.drain(..) {
            remove_artifact(&artifact);
        }
    }

    /// Starts every node (and the forwarder) that is not running.
    ///
    /// A node that does not come up right away is re-checked at the
    /// node-start interval for at most the node-start budget.
    pub async fn start_nodes_which_are_down(&self) -> Result<()> {
        let policy = WaitPolicy::from(self.config.waits.node_start);
        let forwarder = self.forwarder.iter().map(|forwarder| &forwarder.node);

        for node in self.nodes.iter().chain(forwarder) {
            if node.handle.is_running().await? {
                continue;
            }

            tracing::info!(node = %node.server_name, role = %node.role, "starting node which is down");
            node.handle.start().await?;

            let mut checks = 0;
            let mut running = node.handle.is_running().await?;
            while !running && checks < policy.max_polls() {
                sleep(policy.poll_interval).await;
                running = node.handle.is_running().await?;
                checks += 1;
            }
            tracing::info!(node = %node.server_name, running, "node status");
        }
        Ok(())
    }

    /// Logs the status of every node and returns it.
    pub async fn log_info(&self) -> Vec<NodeInfo> {
        let forwarder = self.forwarder.iter().map(|forwarder| &forwarder.node);
        let mut infos = Vec::with_capacity(self.nodes.len() + 1);

        for node in self.nodes.iter().chain(forwarder) {
            let status = match node.handle.execute("status").await {
                Ok(output) => output.stdout,
                Err(e) => format!("unknown ({e})"),
            };
            infos.push(NodeInfo {
                server_name: node.server_name.clone(),
                role: node.role,
                site: node.site,
                host: node.host.host.clone(),
                home: node.handle.home().to_path_buf(),
                management_port: node.handle.management_port(),
                status,
            });
        }

        let report: Vec<String> = infos.iter().map(ToString::to_string).collect();
        tracing::info!("Cluster info\n\n{}", report.join("\n\n"));
        infos
    }
}

fn remove_artifact(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "removed artifact"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}
