//! Returning a cluster to a fresh state between tests.

use crate::command::{CLEAN_TARGETS, clean, remove_monitor};
use crate::topology::Cluster;
use crate::{NodeHandle, NodeProvisioner, Result};
use std::path::Path;

/// Bundle directory on the master emptied by [`Cluster::remove_bundles`].
pub const MASTER_APPS_LOCAL: &str = "etc/master-apps/_cluster/local";

impl<P: NodeProvisioner> Cluster<P> {
    /// Deletes indexed data, detaches forward-servers and resets bundles.
    ///
    /// Data is only deleted while forwarding is configured, and removing
    /// the forward-servers unconfigures it, so the order is fixed.
    pub async fn clean_cluster(&mut self) -> Result<()> {
        self.delete_data().await;
        self.remove_all_forward_servers().await?;
        self.remove_bundles().await?;
        tracing::info!("done cleaning cluster");
        Ok(())
    }

    /// Wipes data on the forwarder and on every slave it forwards to.
    ///
    /// Best effort: failing steps are logged and skipped. Does nothing
    /// unless forwarding is configured.
    pub async fn delete_data(&mut self) {
        let auth = self.auth();
        let Some(forwarder) = self
            .forwarder
            .as_mut()
            .filter(|forwarder| forwarder.configured)
        else {
            tracing::info!("forwarding is not configured, so no data to delete");
            return;
        };

        tracing::info!("deleting data in the cluster");
        let handle = &forwarder.node.handle;
        best_effort(&forwarder.node.server_name, "stop", handle.stop().await);
        for source in &forwarder.forwarded_inputs {
            best_effort(
                &forwarder.node.server_name,
                "remove monitor",
                handle.run(&remove_monitor(source, &auth)).await,
            );
        }
        for target in CLEAN_TARGETS {
            best_effort(&forwarder.node.server_name, target, handle.run(&clean(target)).await);
        }
        best_effort(&forwarder.node.server_name, "start", handle.start().await);
        forwarder.forwarded_inputs.clear();

        let indexer_slaves = forwarder.indexer_slaves.clone();
        let slaves: Vec<_> = indexer_slaves
            .iter()
            .filter_map(|name| self.node(name))
            .collect();
        for slave in &slaves {
            best_effort(&slave.server_name, "stop", slave.handle.stop().await);
            for target in CLEAN_TARGETS {
                best_effort(&slave.server_name, target, slave.handle.run(&clean(target)).await);
            }
        }
        for slave in &slaves {
            best_effort(&slave.server_name, "start", slave.handle.start().await);
        }
        tracing::info!(slaves = slaves.len(), "deleted data in the cluster");
    }

    /// Empties the master's bundle directory and pushes the empty bundle.
    pub async fn remove_bundles(&self) -> Result<()> {
        let Some(master) = self.master() else {
            tracing::info!("no master, so no bundles to remove");
            return Ok(());
        };

        tracing::info!(dir = MASTER_APPS_LOCAL, "removing existing bundles");
        master.handle.reset_dir(Path::new(MASTER_APPS_LOCAL)).await?;
        self.apply_bundle().await?;
        Ok(())
    }
}

fn best_effort<T>(node: &str, step: &str, result: Result<T>) {
    if let Err(e) = result {
        tracing::warn!(node, step, error = %e, "cleanup step failed, continuing");
    }
}
