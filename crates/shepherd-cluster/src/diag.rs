//! Collecting node diagnostics after a failed test.

use crate::command::{diag, parse_diag_path};
use crate::topology::{Cluster, ClusterNode};
use crate::{CommandOutput, NodeHandle, NodeProvisioner, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Archive name for the diags of one test.
pub fn archive_name(label: &str, stamp: chrono::DateTime<Utc>) -> String {
    format!("{label}_diags_{}.tar", stamp.format("%Y-%m-%d-%H.%M.%S"))
}

impl<P: NodeProvisioner> Cluster<P> {
    /// Runs `diag` on every node and the forwarder and bundles the results
    /// into `<dir>/<label>_diags_<stamp>.tar`.
    ///
    /// Nodes whose diag fails are logged and left out. Returns `None` when
    /// no node produced one.
    pub async fn collect_diags(&self, dir: &Path, label: &str) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(dir).await?;

        let nodes = self
            .nodes
            .iter()
            .chain(self.forwarder.as_ref().map(|forwarder| &forwarder.node));
        let mut collected = Vec::new();
        for node in nodes {
            match collect_diag(node, dir).await {
                Ok(Some(path)) => collected.push(path),
                Ok(None) => {}
                Err(e) => tracing::error!(node = %node.server_name, error = %e, "cannot collect diag"),
            }
        }
        if collected.is_empty() {
            tracing::warn!("no node produced a diag");
            return Ok(None);
        }

        let archive = dir.join(archive_name(label, Utc::now()));
        let mut tar = Command::new("tar");
        tar.arg("-cf").arg(&archive).arg("-C").arg(dir);
        for path in &collected {
            tar.arg(path.strip_prefix(dir).unwrap_or(path));
        }
        let output = tar.output().await?;
        CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .check(&format!("tar -cf {}", archive.display()))?;

        for path in &collected {
            if let Some(staging) = path.parent() {
                if let Err(e) = tokio::fs::remove_dir_all(staging).await {
                    tracing::warn!(dir = %staging.display(), error = %e, "cannot remove collected diag");
                }
            }
        }
        tracing::info!(archive = %archive.display(), diags = collected.len(), "collected diags");
        Ok(Some(archive))
    }
}

/// Fetches one node's diag into `<dir>/<server name>/`.
async fn collect_diag<H: NodeHandle>(node: &ClusterNode<H>, dir: &Path) -> Result<Option<PathBuf>> {
    let output = node.handle.run(diag()).await?;
    tracing::debug!(node = %node.server_name, output = %output.stdout.trim(), "diag finished");
    let Some(path) = parse_diag_path(&output.stdout) else {
        tracing::warn!(node = %node.server_name, "diag reported no archive");
        return Ok(None);
    };

    let staging = dir.join(&node.server_name);
    tokio::fs::create_dir_all(&staging).await?;
    node.handle.fetch(Path::new(path), &staging).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_name() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            archive_name("test_rolling_restart", stamp),
            "test_rolling_restart_diags_2024-03-09-14.05.07.tar"
        );
    }
}
