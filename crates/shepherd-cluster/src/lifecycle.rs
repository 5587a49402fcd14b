//! Suite and per-test hooks for clustering test suites.

use crate::hosts::RunContext;
use crate::topology::Cluster;
use crate::{Error, NodeProvisioner, Result, RoleAssigner, TopologyShape};
use shepherd_config::ShepherdConfig;
use std::path::PathBuf;

/// Owns the cluster a suite of tests runs against.
///
/// Per test, `clean_between_tests` and `start_down_nodes` decide what
/// [`ClusteringSuite::teardown_test`] does; both are reset by
/// [`ClusteringSuite::setup_test`]. Diags of failed tests land in
/// `diags_dir`, the working directory by default.
pub struct ClusteringSuite<P: NodeProvisioner + Clone> {
    provisioner: P,
    run: RunContext,
    config: ShepherdConfig,
    cluster: Option<Cluster<P>>,
    pub clean_between_tests: bool,
    pub start_down_nodes: bool,
    pub diags_dir: PathBuf,
}

impl<P: NodeProvisioner + Clone> ClusteringSuite<P> {
    pub fn new(provisioner: P, run: RunContext, config: ShepherdConfig) -> Self {
        Self {
            provisioner,
            run,
            config,
            cluster: None,
            clean_between_tests: false,
            start_down_nodes: true,
            diags_dir: PathBuf::from("."),
        }
    }

    pub fn setup_suite(&mut self) {
        tracing::info!("*** Setup suite ***");
        self.run.hosts.reset();
    }

    pub fn setup_test(&mut self, name: &str) {
        tracing::info!("*** Executing {name} ***");
        self.clean_between_tests = false;
        self.start_down_nodes = true;
    }

    /// Cleans the cluster, or brings back nodes a failed test left down.
    pub async fn teardown_test(&mut self, name: &str) -> Result<()> {
        tracing::info!("*** Teardown test {name} ***");
        let Some(cluster) = self.cluster.as_mut() else {
            return Ok(());
        };

        if self.clean_between_tests {
            tracing::info!("cleaning the cluster");
            cluster.clean_cluster().await
        } else if self.start_down_nodes {
            cluster.start_nodes_which_are_down().await
        } else {
            Ok(())
        }
    }

    /// Collects diags for a failed test, then tears it down like
    /// [`ClusteringSuite::teardown_test`]. Returns the diag archive, if any.
    pub async fn teardown_failed_test(&mut self, name: &str) -> Result<Option<PathBuf>> {
        let archive = match self.cluster.as_ref() {
            Some(cluster) => match cluster.collect_diags(&self.diags_dir, name).await {
                Ok(archive) => archive,
                Err(e) => {
                    tracing::error!(test = name, error = %e, "cannot collect diags");
                    None
                }
            },
            None => None,
        };
        self.teardown_test(name).await?;
        Ok(archive)
    }

    /// Tears the cluster down and makes every pooled host available again.
    pub async fn teardown_suite(&mut self) {
        tracing::info!("*** Teardown suite ***");
        if let Some(mut cluster) = self.cluster.take() {
            cluster.teardown().await;
        }
        self.run.hosts.reset();
    }

    /// Builds a cluster for the suite, replacing (and tearing down) any
    /// previous one.
    pub async fn new_cluster(&mut self, shape: &TopologyShape) -> Result<&mut Cluster<P>> {
        if let Some(mut previous) = self.cluster.take() {
            tracing::info!("replacing existing cluster");
            previous.teardown().await;
        }

        tracing::debug!(available_hosts = self.run.hosts.remaining(), "creating cluster");
        let assigner = RoleAssigner::new(self.provisioner.clone(), self.run.clone(), self.config.clone());
        let cluster = assigner.build(shape).await?;
        Ok(self.cluster.insert(cluster))
    }

    pub fn cluster(&self) -> Result<&Cluster<P>> {
        self.cluster
            .as_ref()
            .ok_or_else(|| Error::NodeNotFound("cluster".to_string()))
    }

    pub fn cluster_mut(&mut self) -> Result<&mut Cluster<P>> {
        self.cluster
            .as_mut()
            .ok_or_else(|| Error::NodeNotFound("cluster".to_string()))
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn config(&self) -> &ShepherdConfig {
        &self.config
    }
}
