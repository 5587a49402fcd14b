//! Persisted topology, so a cluster brought up by one `shepherd` invocation
//! can be driven and torn down by the next.

use crate::forwarder::Forwarder;
use crate::hosts::RunContext;
use crate::topology::{Cluster, ClusterNode};
use crate::{
    Error, ForwarderKind, HostTarget, NodeHandle, NodeProvisioner, NodeRole, Result, Site,
    TransportKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shepherd_config::{Paths, ShepherdConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything needed to re-attach to a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyManifest {
    /// Files removed on teardown.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,

    /// Nodes in creation order.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,

    pub forwarder: Option<ForwarderRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub server_name: String,
    pub role: NodeRole,
    pub host: String,
    pub transport: TransportKind,
    pub home: PathBuf,
    pub management_port: u16,
    pub site: Option<Site>,
    pub replication_port: Option<u16>,
    pub tcp_input_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub available_sites: Vec<Site>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderRecord {
    pub kind: ForwarderKind,
    pub configured: bool,
    #[serde(default)]
    pub indexer_slaves: Vec<String>,
    #[serde(default)]
    pub forwarded_inputs: Vec<String>,
    pub node: NodeRecord,
}

impl NodeRecord {
    fn of<H: NodeHandle>(node: &ClusterNode<H>) -> Self {
        Self {
            server_name: node.server_name.clone(),
            role: node.role,
            host: node.host.host.clone(),
            transport: node.host.transport,
            home: node.handle.home().to_path_buf(),
            management_port: node.handle.management_port(),
            site: node.site,
            replication_port: node.replication_port,
            tcp_input_port: node.tcp_input_port,
            created_at: node.created_at,
            available_sites: node.available_sites.clone(),
        }
    }

    async fn attach<P: NodeProvisioner>(&self, provisioner: &P) -> Result<ClusterNode<P::Handle>> {
        let target = HostTarget {
            host: self.host.clone(),
            transport: self.transport,
        };
        let handle = provisioner
            .attach(&target, &self.home, self.management_port)
            .await?;
        Ok(ClusterNode {
            handle,
            role: self.role,
            site: self.site,
            host: target,
            replication_port: self.replication_port,
            tcp_input_port: self.tcp_input_port,
            server_name: self.server_name.clone(),
            created_at: self.created_at,
            available_sites: self.available_sites.clone(),
        })
    }
}

impl TopologyManifest {
    /// `<state_dir>/cluster/topology.toml`.
    pub fn path(state_dir: &Path) -> PathBuf {
        Paths::manifest_file(state_dir)
    }

    pub fn exists(state_dir: &Path) -> bool {
        Self::path(state_dir).exists()
    }

    /// Loads the manifest written by [`TopologyManifest::save`].
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = Self::path(state_dir);

        if !path.exists() {
            return Err(Error::NotInitialized(state_dir.to_path_buf()));
        }

        let content = fs::read_to_string(&path)?;
        let manifest: Self = toml::from_str(&content)?;

        Ok(manifest)
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = Self::path(state_dir);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        tracing::debug!(path = %path.display(), nodes = self.nodes.len(), "saved topology manifest");

        Ok(())
    }

    /// Removes a saved manifest; a missing one is not an error.
    pub fn remove(state_dir: &Path) -> Result<()> {
        match fs::remove_file(Self::path(state_dir)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl<P: NodeProvisioner> Cluster<P> {
    pub fn manifest(&self) -> TopologyManifest {
        TopologyManifest {
            artifacts: self.artifacts().to_vec(),
            nodes: self.nodes.iter().map(NodeRecord::of).collect(),
            forwarder: self.forwarder.as_ref().map(|forwarder| ForwarderRecord {
                kind: forwarder.kind,
                configured: forwarder.configured,
                indexer_slaves: forwarder.indexer_slaves.clone(),
                forwarded_inputs: forwarder.forwarded_inputs.clone(),
                node: NodeRecord::of(&forwarder.node),
            }),
        }
    }

    /// Re-attaches to every node of a saved topology.
    pub async fn from_manifest(
        provisioner: P,
        run: RunContext,
        config: ShepherdConfig,
        manifest: &TopologyManifest,
    ) -> Result<Self> {
        let mut cluster = Cluster::new(provisioner, run, config);
        for record in &manifest.nodes {
            let node = record.attach(&cluster.provisioner).await?;
            cluster.nodes.push(node);
        }
        if let Some(record) = &manifest.forwarder {
            let node = record.node.attach(&cluster.provisioner).await?;
            let mut forwarder = Forwarder::new(node, record.kind);
            forwarder.configured = record.configured;
            forwarder.indexer_slaves.clone_from(&record.indexer_slaves);
            forwarder.forwarded_inputs.clone_from(&record.forwarded_inputs);
            cluster.forwarder_kind = record.kind;
            cluster.forwarder = Some(forwarder);
        }
        for artifact in &manifest.artifacts {
            cluster.register_artifact(artifact);
        }
        tracing::debug!(nodes = cluster.nodes.len(), "attached to saved topology");
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingProvisioner;
    use crate::{RoleAssigner, TopologyShape};
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_manifest() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            TopologyManifest::load(temp.path()),
            Err(Error::NotInitialized(_))
        ));
        assert!(TopologyManifest::remove(temp.path()).is_ok());
    }

    #[tokio::test]
    async fn test_save_and_reattach() {
        let temp = TempDir::new().unwrap();
        let provisioner = RecordingProvisioner::new();
        let shape = TopologyShape::multisite(2, 1, 1);
        let mut cluster = RoleAssigner::new(provisioner.clone(), RunContext::local(), ShepherdConfig::default())
            .build(&shape)
            .await
            .unwrap();
        cluster.configure_forwarding(None).await.unwrap();
        cluster.register_artifact(temp.path().join("build.tgz"));

        let manifest = cluster.manifest();
        manifest.save(temp.path()).unwrap();
        assert!(TopologyManifest::exists(temp.path()));

        let loaded = TopologyManifest::load(temp.path()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.nodes.len(), 5);
        assert_eq!(loaded.nodes[0].available_sites, vec![Site(1), Site(2)]);
        assert!(loaded.forwarder.as_ref().unwrap().configured);

        let attached = Cluster::from_manifest(provisioner, RunContext::local(), ShepherdConfig::default(), &loaded)
            .await
            .unwrap();
        assert_eq!(attached.nodes().len(), 5);
        assert_eq!(attached.master().unwrap().server_name, cluster.master().unwrap().server_name);
        assert_eq!(attached.slaves().count(), 2);
        assert_eq!(attached.forwarder().unwrap().indexer_slaves.len(), 2);
        assert_eq!(attached.artifacts().len(), 1);
    }
}
