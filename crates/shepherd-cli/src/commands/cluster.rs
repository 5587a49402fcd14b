//! Cluster commands.
//!
//! `up` builds a topology and saves its manifest under the state directory;
//! every later command re-attaches to the saved nodes, and `down` removes
//! both the nodes and the manifest.

use anyhow::{Context as _, Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use shepherd_cluster::{
    Cluster, Converged, ForwarderKind, NodeProvisioner, RoleAssigner, TopologyManifest,
    TopologyShape, run_context,
};
use shepherd_config::{Paths, TopologyConfig};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use super::Context;
use crate::style::{self, colors::SemanticStyle};

#[derive(Subcommand)]
pub enum ClusterCommand {
    /// Create a cluster and save its topology.
    Up(UpArgs),

    /// Show every node of the saved cluster.
    Status,

    /// Push the configuration bundle and wait for it to settle.
    ApplyBundle,

    /// Wait for a server-side operation on the master to finish.
    Wait {
        operation: WaitOperation,

        /// Overrides the rolling-restart budget, in seconds.
        #[arg(long)]
        max_wait: Option<u64>,
    },

    /// Forward data into the slaves, creating the forwarder if needed.
    Forward {
        /// File or directory to monitor.
        path: Option<PathBuf>,

        /// Forward only to these slaves (server names); repeatable.
        #[arg(long = "slave")]
        slaves: Vec<String>,

        /// Forwarder flavour: universal, light or heavy.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Delete indexed data, detach the forwarder and remove pushed bundles.
    Clean,

    /// Roll every slave's hot buckets so they replicate.
    RollHotBuckets,

    /// Collect a diag from every node into one tarball.
    Diag {
        /// Directory the tarball is written to; defaults to `diags/` in the
        /// state directory.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Tarball name prefix.
        #[arg(long, default_value = "shepherd")]
        label: String,
    },

    /// Tear the cluster down.
    Down,
}

/// Shape overrides; anything left out comes from `[topology]`.
#[derive(Args, Default)]
pub struct UpArgs {
    #[arg(long)]
    pub slaves: Option<u32>,

    #[arg(long)]
    pub search_heads: Option<u32>,

    #[arg(long)]
    pub replication_factor: Option<u32>,

    #[arg(long)]
    pub search_factor: Option<u32>,

    /// Build a multisite cluster; slave and search head counts are per site.
    #[arg(long)]
    pub multisite: bool,

    #[arg(long)]
    pub sites: Option<u32>,

    /// e.g. `origin:2,total:3`.
    #[arg(long)]
    pub site_replication_factor: Option<String>,

    #[arg(long)]
    pub site_search_factor: Option<String>,

    /// Tear down a previously saved cluster first.
    #[arg(long)]
    pub replace: bool,
}

impl UpArgs {
    pub fn shape(&self, config: &TopologyConfig) -> TopologyShape {
        let mut shape = TopologyShape::from(config);
        if let Some(slaves) = self.slaves {
            shape.slaves = slaves;
        }
        if let Some(search_heads) = self.search_heads {
            shape.search_heads = search_heads;
        }
        if let Some(factor) = self.replication_factor {
            shape.replication_factor = factor;
        }
        if let Some(factor) = self.search_factor {
            shape.search_factor = factor;
        }
        if self.multisite {
            shape.multisite = true;
        }
        if let Some(sites) = self.sites {
            shape.sites = sites;
        }
        if self.site_replication_factor.is_some() {
            shape.site_replication_factor.clone_from(&self.site_replication_factor);
        }
        if self.site_search_factor.is_some() {
            shape.site_search_factor.clone_from(&self.site_search_factor);
        }
        shape
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WaitOperation {
    RollingRestart,
    BundleValidation,
    BundleReload,
    BundleCreation,
    BundleEvents,
}

pub async fn run<P>(command: ClusterCommand, ctx: &Context, provisioner: P) -> Result<()>
where
    P: NodeProvisioner + Clone,
{
    match command {
        ClusterCommand::Up(args) => up(ctx, provisioner, &args).await,
        ClusterCommand::Status => status(ctx, provisioner).await,
        ClusterCommand::ApplyBundle => {
            let cluster = attach(ctx, provisioner).await?;
            let converged = spin("Applying cluster bundle", cluster.apply_bundle()).await?;
            report(&converged);
            Ok(())
        }
        ClusterCommand::Wait {
            operation,
            max_wait,
        } => wait(ctx, provisioner, operation, max_wait).await,
        ClusterCommand::Forward { path, slaves, kind } => {
            forward(ctx, provisioner, path, &slaves, kind.as_deref()).await
        }
        ClusterCommand::Clean => {
            let mut cluster = attach(ctx, provisioner).await?;
            spin("Cleaning cluster", cluster.clean_cluster()).await?;
            persist(ctx, &cluster)?;
            style::print_success("Cluster cleaned");
            Ok(())
        }
        ClusterCommand::RollHotBuckets => {
            let cluster = attach(ctx, provisioner).await?;
            spin("Rolling hot buckets", cluster.roll_hot_buckets()).await?;
            Ok(())
        }
        ClusterCommand::Diag { dir, label } => {
            let cluster = attach(ctx, provisioner).await?;
            let dir = dir.unwrap_or_else(|| Paths::diags_dir(ctx.state_dir()));
            match spin("Collecting diags", cluster.collect_diags(&dir, &label)).await? {
                Some(archive) => style::print_labeled("Diags", &archive.display().to_string()),
                None => style::print_warn("No node produced a diag"),
            }
            Ok(())
        }
        ClusterCommand::Down => down(ctx, provisioner).await,
    }
}

async fn up<P>(ctx: &Context, provisioner: P, args: &UpArgs) -> Result<()>
where
    P: NodeProvisioner + Clone,
{
    let state_dir = ctx.state_dir();
    if TopologyManifest::exists(state_dir) && !ctx.dry_run {
        if !args.replace {
            bail!(
                "A cluster is already up. Run {} first, or pass --replace",
                "shepherd down".code()
            );
        }
        let mut previous = attach(ctx, provisioner.clone()).await?;
        previous.teardown().await;
        TopologyManifest::remove(state_dir)?;
    }

    let shape = args.shape(&ctx.config.topology);
    let assigner = RoleAssigner::new(provisioner, run_context(&ctx.config), ctx.config.clone());
    let cluster = spin(
        &format!("Creating {} nodes", shape.node_count()),
        assigner.build(&shape),
    )
    .await
    .context("Failed to create cluster")?;

    persist(ctx, &cluster)?;

    println!();
    println!("{}", style::node_table(&cluster.log_info().await));
    println!();
    if !ctx.dry_run {
        style::print_labeled(
            "Manifest",
            &TopologyManifest::path(state_dir).display().to_string(),
        );
        style::print_hint("Tear it down with: shepherd down");
    }
    Ok(())
}

async fn status<P: NodeProvisioner>(ctx: &Context, provisioner: P) -> Result<()> {
    let cluster = attach(ctx, provisioner).await?;

    println!();
    println!("{}", style::node_table(&cluster.log_info().await));
    println!();
    match cluster.forwarder() {
        Some(forwarder) => {
            let state = if forwarder.configured {
                format!("forwarding to {}", forwarder.indexer_slaves.join(", "))
            } else {
                "not forwarding".to_string()
            };
            style::print_labeled(
                "Forwarder",
                &format!("{} ({}, {state})", forwarder.node.server_name, forwarder.kind),
            );
        }
        None => style::print_labeled("Forwarder", "none"),
    }
    Ok(())
}

async fn wait<P: NodeProvisioner>(
    ctx: &Context,
    provisioner: P,
    operation: WaitOperation,
    max_wait: Option<u64>,
) -> Result<()> {
    let cluster = attach(ctx, provisioner).await?;
    if max_wait.is_some() && !matches!(operation, WaitOperation::RollingRestart) {
        style::print_warn("--max-wait only applies to rolling-restart; using the configured budget");
    }

    let converged = match operation {
        WaitOperation::RollingRestart => {
            spin(
                "Waiting for rolling restart",
                cluster.wait_for_rolling_restart_to_finish(max_wait.map(Duration::from_secs)),
            )
            .await?
        }
        WaitOperation::BundleValidation => {
            spin(
                "Waiting for bundle validation",
                cluster.wait_for_bundle_validation_to_finish(),
            )
            .await?
        }
        WaitOperation::BundleReload => {
            spin("Waiting for bundle reload", cluster.wait_for_bundle_reload_to_finish()).await?
        }
        WaitOperation::BundleCreation => {
            spin(
                "Waiting for bundle creation",
                cluster.wait_for_bundle_creation_to_finish(),
            )
            .await?
        }
        WaitOperation::BundleEvents => {
            spin(
                "Waiting for bundle update events",
                cluster.wait_for_in_progress_bundle_update_events(),
            )
            .await?
        }
    };
    report(&converged);
    Ok(())
}

async fn forward<P: NodeProvisioner>(
    ctx: &Context,
    provisioner: P,
    path: Option<PathBuf>,
    slaves: &[String],
    kind: Option<&str>,
) -> Result<()> {
    let mut cluster = attach(ctx, provisioner).await?;
    if let Some(kind) = kind {
        let kind: ForwarderKind = kind.parse()?;
        if cluster.forwarder().is_some_and(|forwarder| forwarder.kind != kind) {
            style::print_warn("A forwarder already exists; keeping its kind");
        }
        cluster.set_forwarder_kind(kind);
    }

    let result = async {
        if !slaves.is_empty() {
            cluster.configure_forwarding(Some(slaves)).await?;
        }
        match &path {
            Some(path) => cluster.forward_data(path).await,
            None if slaves.is_empty() => cluster.configure_forwarding(None).await,
            None => Ok(()),
        }
    }
    .await;
    // A forwarder created before a failure still has to be torn down later.
    persist(ctx, &cluster)?;
    result.context("Failed to forward data")?;

    if let Some(forwarder) = cluster.forwarder() {
        style::print_success(&format!(
            "Forwarding to {}",
            forwarder.indexer_slaves.join(", ")
        ));
        for input in &forwarder.forwarded_inputs {
            style::print_labeled("Monitoring", input);
        }
    }
    Ok(())
}

async fn down<P: NodeProvisioner>(ctx: &Context, provisioner: P) -> Result<()> {
    let mut cluster = attach(ctx, provisioner).await?;
    let count = cluster.nodes().len() + usize::from(cluster.forwarder().is_some());

    let spinner = style::create_spinner(&format!("Tearing down {count} nodes"));
    cluster.teardown().await;
    style::finish_success(&spinner, "Cluster torn down");

    if !ctx.dry_run {
        TopologyManifest::remove(ctx.state_dir())?;
    }
    Ok(())
}

async fn attach<P: NodeProvisioner>(ctx: &Context, provisioner: P) -> Result<Cluster<P>> {
    let manifest = TopologyManifest::load(ctx.state_dir())
        .with_context(|| format!("No cluster is up. Run: {}", "shepherd up".code()))?;
    Cluster::from_manifest(
        provisioner,
        run_context(&ctx.config),
        ctx.config.clone(),
        &manifest,
    )
    .await
    .context("Failed to attach to the saved cluster")
}

fn persist<P: NodeProvisioner>(ctx: &Context, cluster: &Cluster<P>) -> Result<()> {
    if ctx.dry_run {
        return Ok(());
    }
    cluster
        .manifest()
        .save(ctx.state_dir())
        .context("Failed to save topology manifest")
}

/// Runs `future` behind a spinner that ends in a check or a cross.
async fn spin<T, E, F>(msg: &str, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let spinner = style::create_spinner(msg);
    let result = future.await;
    match &result {
        Ok(_) => style::finish_success(&spinner, msg),
        Err(_) => style::finish_error(&spinner, msg),
    }
    result
}

fn report(converged: &Converged) {
    style::print_success(&format!(
        "Settled after {} polls in {:.1}s",
        converged.polls,
        converged.elapsed.as_secs_f64()
    ));
    if !converged.status.is_empty() {
        style::print_labeled("Status", converged.status.lines().next().unwrap_or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_uses_config_defaults() {
        let config = TopologyConfig::default();
        let shape = UpArgs::default().shape(&config);
        assert_eq!(shape, TopologyShape::from(&config));
    }

    #[test]
    fn test_shape_overrides() {
        let args = UpArgs {
            slaves: Some(2),
            multisite: true,
            sites: Some(3),
            site_replication_factor: Some("origin:1,total:2".to_string()),
            ..UpArgs::default()
        };
        let shape = args.shape(&TopologyConfig::default());
        assert_eq!(shape.slaves, 2);
        assert!(shape.multisite);
        assert_eq!(shape.sites, 3);
        assert_eq!(shape.site_replication_factor.as_deref(), Some("origin:1,total:2"));
        assert_eq!(shape.node_count(), 1 + 3 * (2 + shape.search_heads as usize));
    }
}
