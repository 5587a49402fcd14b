//! Hot bucket rolls and waiting for indexing to go quiet.

use crate::command::{event_count_search, parse_event_count, roll_hot_buckets};
use crate::poller::wait_for_stable_count;
use crate::topology::Cluster;
use crate::{Error, NodeHandle, NodeProvisioner, Result};

impl<P: NodeProvisioner> Cluster<P> {
    /// Rolls the hot buckets of every slave so they replicate to the other
    /// peers.
    pub async fn roll_hot_buckets(&self) -> Result<()> {
        let command = roll_hot_buckets(&self.auth());
        for slave in self.slaves() {
            tracing::info!(node = %slave.server_name, "rolling hot buckets");
            slave.handle.run(&command).await?;
        }
        Ok(())
    }

    /// Events matching `search` in `index`, counted on the node named
    /// `server_name`.
    pub async fn event_count(&self, server_name: &str, index: &str, search: &str) -> Result<u64> {
        let node = self
            .node(server_name)
            .ok_or_else(|| Error::NodeNotFound(server_name.to_string()))?;
        let command = event_count_search(index, search, &self.auth());
        let output = node.handle.run(&command).await?;
        parse_event_count(&output.stdout).ok_or(Error::UnexpectedOutput {
            command,
            output: output.stdout,
        })
    }

    /// Waits until the event count seen by `server_name` has stopped
    /// changing for `waits.indexing.stable_secs`, and returns it.
    pub async fn wait_until_done_indexing(
        &self,
        server_name: &str,
        index: &str,
        search: &str,
    ) -> Result<u64> {
        let indexing = self.config.waits.indexing;
        let count = wait_for_stable_count(
            &format!("Indexing into {index}"),
            indexing.policy().into(),
            indexing.stable_for(),
            || self.event_count(server_name, index, search),
        )
        .await?;
        tracing::info!(index, count, "indexing is done");
        Ok(count)
    }
}
