//! Building topologies: node creation and role assignment.

use crate::command::{self, ClusterConfigCommand, ClusterMode, MasterParams};
use crate::hosts::RunContext;
use crate::topology::{Cluster, ClusterNode};
use crate::{Error, NodeHandle, NodeProvisioner, NodeRole, Package, Result, Site, TopologyShape};
use chrono::Utc;
use shepherd_config::ShepherdConfig;

/// What a new node should become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequest {
    /// Installed and started, but not made a cluster member.
    Unassigned,
    Master(MasterParams),
    Slave,
    SearchHead,
}

impl RoleRequest {
    pub fn role(&self) -> NodeRole {
        match self {
            RoleRequest::Unassigned => NodeRole::Unassigned,
            RoleRequest::Master(_) => NodeRole::Master,
            RoleRequest::Slave => NodeRole::Slave,
            RoleRequest::SearchHead => NodeRole::SearchHead,
        }
    }
}

/// A node to add to a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub request: RoleRequest,
    /// Pin the node to this host instead of taking one from the pool.
    pub host: Option<String>,
    pub site: Option<Site>,
}

impl NodeSpec {
    pub fn unassigned() -> Self {
        Self::with_request(RoleRequest::Unassigned, None)
    }

    pub fn master(params: MasterParams) -> Self {
        Self::with_request(RoleRequest::Master(params), None)
    }

    pub fn slave(site: Option<Site>) -> Self {
        Self::with_request(RoleRequest::Slave, site)
    }

    pub fn search_head(site: Option<Site>) -> Self {
        Self::with_request(RoleRequest::SearchHead, site)
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn with_request(request: RoleRequest, site: Option<Site>) -> Self {
        Self {
            request,
            host: None,
            site,
        }
    }
}

/// Ports allocated while configuring a node.
struct Assignment {
    replication_port: u16,
    tcp_input_port: Option<u16>,
    site: Option<Site>,
    available_sites: Vec<Site>,
}

/// Turns a [`TopologyShape`] into a running cluster.
pub struct RoleAssigner<P: NodeProvisioner> {
    provisioner: P,
    run: RunContext,
    config: ShepherdConfig,
}

impl<P: NodeProvisioner> RoleAssigner<P> {
    pub fn new(provisioner: P, run: RunContext, config: ShepherdConfig) -> Self {
        Self {
            provisioner,
            run,
            config,
        }
    }

    /// Creates the master first, then slaves, then search heads; per site
    /// when multisite.
    ///
    /// If any node fails, everything created so far is torn down before the
    /// error is returned.
    pub async fn build(self, shape: &TopologyShape) -> Result<Cluster<P>> {
        shape.validate()?;
        tracing::info!(
            masters = shape.masters,
            slaves = shape.slaves,
            search_heads = shape.search_heads,
            multisite = shape.multisite,
            sites = shape.sites,
            "building cluster"
        );

        let mut cluster = Cluster::new(self.provisioner, self.run, self.config);
        match populate(&mut cluster, shape).await {
            Ok(()) => {
                cluster.log_info().await;
                Ok(cluster)
            }
            Err(e) => {
                tracing::error!(error = %e, nodes = cluster.nodes().len(), "cluster build failed, tearing down");
                cluster.teardown().await;
                Err(e)
            }
        }
    }
}

async fn populate<P: NodeProvisioner>(cluster: &mut Cluster<P>, shape: &TopologyShape) -> Result<()> {
    if shape.multisite {
        if shape.masters > 0 {
            let params = MasterParams::Multisite {
                available_sites: shape.available_sites(),
                site_replication_factor: shape.site_replication_factor.clone(),
                site_search_factor: shape.site_search_factor.clone(),
            };
            cluster.new_node(NodeSpec::master(params)).await?;
        }
        for site in shape.available_sites() {
            for _ in 0..shape.slaves {
                cluster.new_node(NodeSpec::slave(Some(site))).await?;
            }
            for _ in 0..shape.search_heads {
                cluster.new_node(NodeSpec::search_head(Some(site))).await?;
            }
        }
    } else {
        if shape.masters > 0 {
            let params = MasterParams::SingleSite {
                replication_factor: shape.replication_factor,
                search_factor: shape.search_factor,
            };
            cluster.new_node(NodeSpec::master(params)).await?;
        }
        for _ in 0..shape.slaves {
            cluster.new_node(NodeSpec::slave(None)).await?;
        }
        for _ in 0..shape.search_heads {
            cluster.new_node(NodeSpec::search_head(None)).await?;
        }
    }
    Ok(())
}

impl<P: NodeProvisioner> Cluster<P> {
    /// Creates, starts and optionally configures one node.
    ///
    /// The node is registered as soon as it is provisioned, so teardown
    /// reaches it even when a later step fails. A node whose role
    /// configuration fails stays registered as [`NodeRole::Unassigned`] and
    /// the error is [`Error::ConfigurationFailed`].
    pub async fn new_node(&mut self, spec: NodeSpec) -> Result<&ClusterNode<P::Handle>> {
        let role = spec.request.role();
        if role == NodeRole::Master && self.master().is_some() {
            return Err(Error::InvalidShape(
                "cluster already has a master".to_string(),
            ));
        }
        if role.requires_master() && self.master().is_none() {
            return Err(Error::MissingMaster { role });
        }

        let target = self.run.resolve(spec.host.as_deref())?;
        tracing::debug!(%role, site = ?spec.site, host = %target, "creating node");

        let handle = self.provisioner.provision(&target, Package::Full).await?;
        let (server_name, created_at) = self.run.names.issue(&target.host, Utc::now());
        let index = self.nodes.len();
        self.nodes
            .push(ClusterNode::new(handle, target, server_name, created_at));

        let node = &self.nodes[index];
        node.handle.install().await?;
        node.handle.start().await?;
        node.handle.set_server_name(&node.server_name).await?;

        if spec.request != RoleRequest::Unassigned {
            let assignment = self
                .configure_as_role(node, &spec)
                .await
                .map_err(|e| Error::configuration(node.server_name.clone(), e))?;

            let node = &mut self.nodes[index];
            node.role = role;
            node.site = assignment.site;
            node.replication_port = Some(assignment.replication_port);
            node.tcp_input_port = assignment.tcp_input_port;
            node.available_sites = assignment.available_sites;
        }

        let node = &self.nodes[index];
        tracing::info!(node = %node.server_name, role = %node.role, host = %node.host, "node ready");
        Ok(node)
    }

    /// Issues `edit cluster-config` for the requested role and restarts the
    /// node once. The restart is not retried.
    async fn configure_as_role(
        &self,
        node: &ClusterNode<P::Handle>,
        spec: &NodeSpec,
    ) -> Result<Assignment> {
        let auth = self.auth();
        let replication_port = self.provisioner.find_open_port(&node.host).await?;

        let (mode, assignment) = match &spec.request {
            RoleRequest::Master(params) => {
                let (site, available_sites) = match params {
                    MasterParams::Multisite {
                        available_sites, ..
                    } => (Some(Site(1)), available_sites.clone()),
                    MasterParams::SingleSite { .. } => (None, Vec::new()),
                };
                let assignment = Assignment {
                    replication_port,
                    tcp_input_port: None,
                    site,
                    available_sites,
                };
                (ClusterMode::Master(params.clone()), assignment)
            }
            RoleRequest::Slave | RoleRequest::SearchHead => {
                let master = self.master().ok_or(Error::MissingMaster {
                    role: spec.request.role(),
                })?;

                let listen_port = self.provisioner.find_open_port(&node.host).await?;
                node.handle
                    .run(&command::enable_listen(listen_port, &auth))
                    .await?;

                let master_uri = command::master_uri(
                    &self.config.node.scheme,
                    &master.host.host,
                    master.handle.management_port(),
                );
                let mode = if spec.request == RoleRequest::Slave {
                    ClusterMode::Slave {
                        master_uri,
                        site: spec.site,
                    }
                } else {
                    ClusterMode::SearchHead {
                        master_uri,
                        site: spec.site,
                    }
                };
                let assignment = Assignment {
                    replication_port,
                    tcp_input_port: Some(listen_port),
                    site: spec.site,
                    available_sites: Vec::new(),
                };
                (mode, assignment)
            }
            RoleRequest::Unassigned => {
                return Err(Error::InvalidRole(NodeRole::Unassigned.to_string()));
            }
        };

        let command = ClusterConfigCommand {
            mode,
            replication_port,
        };
        node.handle.run(&command.render(&auth)).await?;
        node.handle.restart().await?;
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Op, RecordingProvisioner};
    use crate::{CommandOutput, HostIdentity, HostPool};

    fn cluster(provisioner: &RecordingProvisioner) -> Cluster<RecordingProvisioner> {
        Cluster::new(provisioner.clone(), RunContext::local(), ShepherdConfig::default())
    }

    fn single_site_master() -> NodeSpec {
        NodeSpec::master(MasterParams::SingleSite {
            replication_factor: 3,
            search_factor: 2,
        })
    }

    #[tokio::test]
    async fn test_master_configuration_ends_in_one_restart() {
        let provisioner = RecordingProvisioner::new();
        let mut cluster = cluster(&provisioner);
        cluster.new_node(single_site_master()).await.unwrap();

        let ops = provisioner.journal().ops_for(0);
        assert_eq!(ops[0], Op::Install);
        assert_eq!(ops[1], Op::Start);
        assert!(matches!(ops[2], Op::SetServerName(_)));
        assert_eq!(
            ops[3],
            Op::Execute(
                "edit cluster-config -mode master -replication_factor 3 -search_factor 2 -replication_port 9100 -auth admin:changeme"
                    .to_string()
            )
        );
        assert_eq!(ops[4], Op::Restart);
        assert_eq!(ops.len(), 5);

        let master = cluster.master().unwrap();
        assert_eq!(master.replication_port, Some(9100));
        assert_eq!(master.site, None);
    }

    #[tokio::test]
    async fn test_slave_points_at_master() {
        let provisioner = RecordingProvisioner::new();
        let mut cluster = cluster(&provisioner);
        cluster.new_node(single_site_master()).await.unwrap();
        let slave = cluster.new_node(NodeSpec::slave(None)).await.unwrap();
        assert_eq!(slave.role, NodeRole::Slave);
        assert_eq!(slave.tcp_input_port, Some(9102));

        let executed: Vec<String> = provisioner
            .journal()
            .executed()
            .into_iter()
            .filter(|(node, _)| *node == 1)
            .map(|(_, command)| command)
            .collect();
        assert_eq!(
            executed,
            vec![
                "enable listen 9102 -auth admin:changeme".to_string(),
                "edit cluster-config -mode slave -master_uri https://127.0.0.1:8089 -replication_port 9101 -auth admin:changeme"
                    .to_string(),
            ]
        );
        assert_eq!(provisioner.journal().ops_for(1).last(), Some(&Op::Restart));
    }

    #[tokio::test]
    async fn test_slave_without_master_is_rejected_before_provisioning() {
        let provisioner = RecordingProvisioner::new();
        let mut cluster = cluster(&provisioner);
        let err = cluster.new_node(NodeSpec::search_head(None)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MissingMaster {
                role: NodeRole::SearchHead
            }
        ));
        assert!(provisioner.journal().calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_master_is_rejected() {
        let provisioner = RecordingProvisioner::new();
        let mut cluster = cluster(&provisioner);
        cluster.new_node(single_site_master()).await.unwrap();
        let err = cluster.new_node(single_site_master()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[tokio::test]
    async fn test_failed_configuration_leaves_node_unassigned() {
        let provisioner = RecordingProvisioner::new();
        provisioner.respond("edit cluster-config", CommandOutput::failed(22, "bad factor"));
        let mut cluster = cluster(&provisioner);

        let err = cluster.new_node(single_site_master()).await.unwrap_err();
        match err {
            Error::ConfigurationFailed { source, .. } => {
                assert!(matches!(*source, Error::CommandFailed(ref f) if f.code == 22));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(cluster.nodes().len(), 1);
        assert_eq!(cluster.nodes()[0].role, NodeRole::Unassigned);
        assert_eq!(provisioner.journal().count("restart"), 0);
    }

    #[tokio::test]
    async fn test_unassigned_node_is_not_configured() {
        let provisioner = RecordingProvisioner::new();
        let mut cluster = cluster(&provisioner);
        cluster.new_node(NodeSpec::unassigned()).await.unwrap();

        assert_eq!(cluster.other_nodes().count(), 1);
        assert!(provisioner.journal().executed().is_empty());
        assert_eq!(provisioner.journal().count("restart"), 0);
    }

    #[tokio::test]
    async fn test_pinned_host_and_remote_transport() {
        let provisioner = RecordingProvisioner::new();
        let run = RunContext::new(HostPool::new(vec!["idx1".to_string()]), HostIdentity::default());
        let mut cluster = Cluster::new(provisioner.clone(), run, ShepherdConfig::default());

        let node = cluster
            .new_node(NodeSpec::unassigned().on_host("localhost"))
            .await
            .unwrap();
        assert!(!node.host.is_remote());

        let node = cluster.new_node(NodeSpec::unassigned()).await.unwrap();
        assert_eq!(node.host.host, "idx1");
        assert!(node.host.is_remote());
        assert!(node.server_name.starts_with("idx1-"));
    }
}
