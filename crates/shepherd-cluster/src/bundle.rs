//! Bundle pushes and the waits that follow them.

use crate::command::{apply_cluster_bundle, show_cluster_bundle_status};
use crate::poller::{Converged, ConvergenceRule, WaitPolicy, wait_for_convergence};
use crate::topology::{Cluster, ClusterNode};
use crate::{Error, NodeHandle, NodeProvisioner, Result};
use std::time::Duration;

pub const ROLLING_RESTART: &str = "Rolling restart";
pub const BUNDLE_VALIDATION: &str = "Bundle validation";
pub const BUNDLE_RELOAD: &str = "bundleReload";
pub const BUNDLE_CREATION: &str = "Bundle creation";

impl<P: NodeProvisioner> Cluster<P> {
    pub(crate) fn require_master(&self) -> Result<&ClusterNode<P::Handle>> {
        self.master()
            .ok_or_else(|| Error::NodeNotFound("master".to_string()))
    }

    /// Pushes the master's bundle to the peers and waits until
    /// `show cluster-bundle-status` stops changing.
    pub async fn apply_bundle(&self) -> Result<Converged> {
        let master = self.require_master()?;
        let auth = self.auth();

        let command = apply_cluster_bundle(&auth);
        let output = master.handle.execute(&command).await?;
        if !output.success() {
            let failure = output.into_failure(&command);
            tracing::error!(%failure, "apply cluster-bundle failed");
            return Err(Error::BundleApplyFailed(failure));
        }

        let status_command = show_cluster_bundle_status(&auth);
        let status_command = status_command.as_str();
        let handle = &master.handle;
        wait_for_convergence(
            "Cluster bundle apply",
            &ConvergenceRule::Unchanged,
            self.config.waits.bundle_status.into(),
            move || async move { handle.run(status_command).await.map(|output| output.stdout) },
        )
        .await
    }

    /// Waits for a rolling restart on the peers, if one is running.
    ///
    /// Without `max_wait` the budget grows with the number of slaves.
    pub async fn wait_for_rolling_restart_to_finish(
        &self,
        max_wait: Option<Duration>,
    ) -> Result<Converged> {
        let mut policy: WaitPolicy = self
            .config
            .waits
            .rolling_restart
            .policy_for(self.slaves().count())
            .into();
        if let Some(max_wait) = max_wait {
            policy.max_wait = max_wait;
        }
        tracing::info!(max_wait = ?policy.max_wait, "rolling restart wait budget");
        self.wait_on_master(ROLLING_RESTART, ConvergenceRule::keyword(ROLLING_RESTART), policy)
            .await
    }

    pub async fn wait_for_bundle_validation_to_finish(&self) -> Result<Converged> {
        let policy = self.config.waits.bundle_validation.into();
        self.wait_on_master(BUNDLE_VALIDATION, ConvergenceRule::keyword(BUNDLE_VALIDATION), policy)
            .await
    }

    pub async fn wait_for_bundle_reload_to_finish(&self) -> Result<Converged> {
        let policy = self.config.waits.bundle_reload.into();
        self.wait_on_master("Bundle reload", ConvergenceRule::keyword(BUNDLE_RELOAD), policy)
            .await
    }

    pub async fn wait_for_bundle_creation_to_finish(&self) -> Result<Converged> {
        let policy = self.config.waits.bundle_creation.into();
        self.wait_on_master(BUNDLE_CREATION, ConvergenceRule::keyword(BUNDLE_CREATION), policy)
            .await
    }

    /// Waits until nothing bundle-related reports itself in progress.
    pub async fn wait_for_in_progress_bundle_update_events(&self) -> Result<Converged> {
        let policy = self.config.waits.bundle_events.into();
        self.wait_on_master("Bundle in-progress events", ConvergenceRule::AnyActivity, policy)
            .await
    }

    async fn wait_on_master(
        &self,
        operation: &str,
        rule: ConvergenceRule,
        policy: WaitPolicy,
    ) -> Result<Converged> {
        let handle = &self.require_master()?.handle;
        wait_for_convergence(operation, &rule, policy, move || handle.apply_bundle_status()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::NodeSpec;
    use crate::command::MasterParams;
    use crate::hosts::RunContext;
    use crate::testing::{Op, RecordingProvisioner};
    use crate::CommandOutput;
    use shepherd_config::ShepherdConfig;

    async fn with_master(provisioner: &RecordingProvisioner) -> Cluster<RecordingProvisioner> {
        let mut cluster = Cluster::new(provisioner.clone(), RunContext::local(), ShepherdConfig::default());
        cluster
            .new_node(NodeSpec::master(MasterParams::SingleSite {
                replication_factor: 1,
                search_factor: 1,
            }))
            .await
            .unwrap();
        provisioner.journal().clear();
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_bundle_waits_for_stable_status() {
        let provisioner = RecordingProvisioner::new();
        let cluster = with_master(&provisioner).await;

        let converged = cluster.apply_bundle().await.unwrap();
        assert_eq!(converged.polls, 2);
        assert_eq!(converged.elapsed, Duration::from_secs(15));

        let executed: Vec<String> = provisioner
            .journal()
            .executed()
            .into_iter()
            .map(|(_, command)| command)
            .collect();
        assert_eq!(executed[0], "apply cluster-bundle --answer-yes -auth admin:changeme");
        assert_eq!(executed[1], "show cluster-bundle-status -auth admin:changeme");
        assert_eq!(executed.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_bundle_failure() {
        let provisioner = RecordingProvisioner::new();
        let cluster = with_master(&provisioner).await;
        provisioner.respond("apply cluster-bundle", CommandOutput::failed(1, "validation errors"));

        let err = cluster.apply_bundle().await.unwrap_err();
        match err {
            Error::BundleApplyFailed(failure) => {
                assert_eq!(failure.code, 1);
                assert_eq!(failure.stderr, "validation errors");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provisioner.journal().executed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_restart_idle() {
        let provisioner = RecordingProvisioner::new();
        let cluster = with_master(&provisioner).await;
        provisioner.script_statuses(["No rolling restart"]);

        let converged = cluster.wait_for_rolling_restart_to_finish(None).await.unwrap();
        assert_eq!(converged.polls, 1);
        assert_eq!(provisioner.journal().ops_for(0), vec![Op::Status]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_restart_budget_override() {
        let provisioner = RecordingProvisioner::new();
        let cluster = with_master(&provisioner).await;
        provisioner.script_statuses(["Rolling restart in progress"]);

        let err = cluster
            .wait_for_rolling_restart_to_finish(Some(Duration::from_secs(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConvergenceTimeout { polls: 4, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_reload_keyword() {
        let provisioner = RecordingProvisioner::new();
        let cluster = with_master(&provisioner).await;
        provisioner.script_statuses([
            "bundleReload in progress",
            "bundleReload in progress",
            "bundleReload complete",
        ]);

        let converged = cluster.wait_for_bundle_reload_to_finish().await.unwrap();
        assert_eq!(converged.polls, 3);
        assert_eq!(converged.elapsed, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_creation_uses_its_interval() {
        let provisioner = RecordingProvisioner::new();
        let cluster = with_master(&provisioner).await;
        provisioner.script_statuses(["Bundle creation in progress", "Bundle creation done"]);

        let converged = cluster.wait_for_bundle_creation_to_finish().await.unwrap();
        assert_eq!(converged.elapsed, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_need_a_master() {
        let provisioner = RecordingProvisioner::new();
        let cluster = Cluster::new(provisioner, RunContext::local(), ShepherdConfig::default());
        assert!(matches!(
            cluster.wait_for_bundle_validation_to_finish().await,
            Err(Error::NodeNotFound(_))
        ));
    }
}
