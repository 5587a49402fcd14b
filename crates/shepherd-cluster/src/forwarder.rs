//! The cluster's forwarder: created on first use, one per cluster.

use crate::command::{
    FORWARDER_TUNING, add_forward_server, add_monitor, enable_app, list_forward_servers, login,
    parse_forward_servers, remove_forward_server, set_conf,
};
use crate::topology::{Cluster, ClusterNode};
use crate::{ForwarderKind, NodeHandle, NodeProvisioner, NodeRole, Package, Result};
use chrono::Utc;
use std::path::Path;

/// A forwarder and what it has been set up to do.
#[derive(Debug)]
pub struct Forwarder<H> {
    pub node: ClusterNode<H>,
    pub kind: ForwarderKind,
    /// Set by [`Cluster::configure_forwarding`], cleared by
    /// [`Cluster::remove_all_forward_servers`].
    pub configured: bool,
    /// Server names of the slaves data is forwarded to.
    pub indexer_slaves: Vec<String>,
    /// Monitored paths.
    pub forwarded_inputs: Vec<String>,
}

impl<H> Forwarder<H> {
    pub fn new(node: ClusterNode<H>, kind: ForwarderKind) -> Self {
        Self {
            node,
            kind,
            configured: false,
            indexer_slaves: Vec::new(),
            forwarded_inputs: Vec::new(),
        }
    }
}

impl<P: NodeProvisioner> Cluster<P> {
    /// Returns the forwarder, installing one on the local machine first if
    /// the cluster has none.
    pub async fn ensure_forwarder(&mut self) -> Result<&mut Forwarder<P::Handle>> {
        if self.forwarder.is_none() {
            self.create_forwarder().await?;
        }
        match self.forwarder.as_mut() {
            Some(forwarder) => Ok(forwarder),
            None => Err(crate::Error::NodeNotFound("forwarder".to_string())),
        }
    }

    async fn create_forwarder(&mut self) -> Result<()> {
        let kind = self.forwarder_kind;
        let auth = self.auth();
        let target = self.run.identity.target(self.run.identity.loopback());
        let package = match kind {
            ForwarderKind::Universal => Package::UniversalForwarder,
            ForwarderKind::Heavy | ForwarderKind::Light => Package::Full,
        };

        tracing::debug!(?kind, host = %target, "initializing forwarder");
        let handle = self.provisioner.provision(&target, package).await?;
        let (server_name, created_at) = self.run.names.issue(&target.host, Utc::now());
        let mut node = ClusterNode::new(handle, target, server_name, created_at);
        node.role = NodeRole::Forwarder;

        // Registered before installing so teardown reaches a half-installed forwarder.
        let forwarder = self.forwarder.insert(Forwarder::new(node, kind));
        let node = &forwarder.node;
        node.handle.install().await?;
        node.handle.start().await?;
        node.handle.set_server_name(&node.server_name).await?;
        if let Some(app) = kind.app() {
            node.handle.run(&enable_app(app, &auth)).await?;
            node.handle.restart().await?;
        }
        Ok(())
    }

    /// Forwards to the given slaves (all slaves when `None`), load-balanced.
    ///
    /// Forward-servers already present on the forwarder are not added
    /// again. Throughput limits and acknowledgements are tuned on a best
    /// effort basis. Ends with one forwarder restart.
    pub async fn configure_forwarding(&mut self, slaves: Option<&[String]>) -> Result<()> {
        let auth = self.auth();
        let targets: Vec<(String, String)> = match slaves {
            None => {
                tracing::info!("no slaves given, forwarding to every slave");
                self.slaves()
                    .filter_map(|slave| Some((slave.server_name.clone(), slave.listen_address()?)))
                    .collect()
            }
            Some(names) => {
                let mut targets = Vec::with_capacity(names.len());
                for name in names {
                    let slave = self
                        .node(name)
                        .ok_or_else(|| crate::Error::NodeNotFound(name.clone()))?;
                    match slave.listen_address() {
                        Some(address) => targets.push((name.clone(), address)),
                        None => tracing::warn!(node = %name, "node has no input port, skipping"),
                    }
                }
                targets
            }
        };

        let forwarder = self.ensure_forwarder().await?;
        let handle = &forwarder.node.handle;
        handle.run(&login(&auth)).await?;
        for (_, address) in &targets {
            let listed = handle.run(&list_forward_servers(&auth)).await?;
            if parse_forward_servers(&listed.stdout).contains(address) {
                tracing::debug!(server = %address, "forward-server already configured");
                continue;
            }
            handle.run(&add_forward_server(address, &auth)).await?;
            tracing::info!(server = %address, "added forward-server");
        }
        if !targets.is_empty() {
            for (conf, stanza, key, value) in FORWARDER_TUNING {
                match handle.execute(&set_conf(conf, stanza, key, value, &auth)).await {
                    Ok(output) if output.success() => {}
                    Ok(output) => {
                        tracing::error!(conf, stanza, code = output.code, "cannot tune forwarder conf");
                    }
                    Err(e) => tracing::error!(conf, stanza, error = %e, "cannot tune forwarder conf"),
                }
            }
        }
        handle.restart().await?;

        forwarder.configured = true;
        for (name, _) in targets {
            if !forwarder.indexer_slaves.contains(&name) {
                forwarder.indexer_slaves.push(name);
            }
        }
        tracing::info!(slaves = ?forwarder.indexer_slaves, "forwarding configured");
        Ok(())
    }

    /// Monitors `path` on the forwarder, configuring forwarding first if
    /// needed.
    pub async fn forward_data(&mut self, path: &Path) -> Result<()> {
        let configured = self
            .forwarder
            .as_ref()
            .is_some_and(|forwarder| forwarder.configured);
        if !configured {
            self.configure_forwarding(None).await?;
        }

        let source = std::path::absolute(path)?.display().to_string();
        let auth = self.auth();
        let forwarder = self.ensure_forwarder().await?;
        forwarder
            .node
            .handle
            .run(&add_monitor(&source, &auth))
            .await?;
        tracing::info!(source = %source, "monitoring input");
        forwarder.forwarded_inputs.push(source);
        Ok(())
    }

    /// Detaches every forward-server; forwarding is unconfigured afterwards.
    ///
    /// Does nothing unless forwarding was set up with
    /// [`Cluster::configure_forwarding`].
    pub async fn remove_all_forward_servers(&mut self) -> Result<()> {
        let auth = self.auth();
        let Some(forwarder) = self
            .forwarder
            .as_mut()
            .filter(|forwarder| forwarder.configured)
        else {
            tracing::info!("forwarding is not configured, so no forward-servers to remove");
            return Ok(());
        };

        let handle = &forwarder.node.handle;
        let listed = handle.run(&list_forward_servers(&auth)).await?;
        for server in parse_forward_servers(&listed.stdout) {
            handle.run(&remove_forward_server(&server, &auth)).await?;
            tracing::info!(server = %server, "removed forward-server");
        }

        forwarder.configured = false;
        forwarder.indexer_slaves.clear();
        Ok(())
    }
}
