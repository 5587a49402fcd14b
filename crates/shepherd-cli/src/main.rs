//! Shepherd CLI.
//!
//! Brings up master/slave/search-head test clusters, waits on them and
//! tears them down again.
//!
//! # Quick Start
//!
//! ```bash
//! # Bring up a master, three slaves and a search head
//! shepherd up --slaves 3 --search-heads 1
//!
//! # Push the bundle and wait for the rolling restart
//! shepherd apply-bundle
//! shepherd wait rolling-restart
//!
//! # Done
//! shepherd down
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};
use shepherd_cluster::InstanceProvisioner;
use shepherd_cluster::testing::RecordingProvisioner;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::Context;
use commands::cluster::ClusterCommand;
use commands::config::ConfigCommand;

/// Shepherd - cluster topologies for integration test runs.
#[derive(Parser)]
#[command(name = "shepherd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding shepherd.toml.
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Record node calls and print them instead of running them.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Cluster(ClusterCommand),

    /// Configuration commands.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    style::set_no_color(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    if let Err(e) = run(cli).await {
        style::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(&cli.project, cli.dry_run)?;
    tracing::debug!(
        project = %ctx.project.display(),
        state_dir = %ctx.state_dir().display(),
        dry_run = ctx.dry_run,
        "loaded configuration"
    );

    match cli.command {
        Commands::Config(command) => commands::config::run(command, &ctx),
        Commands::Cluster(command) if ctx.dry_run => {
            let provisioner = RecordingProvisioner::new();
            let journal = provisioner.journal();
            let result = commands::cluster::run(command, &ctx, provisioner).await;
            commands::print_journal(&journal);
            result
        }
        Commands::Cluster(command) => {
            let provisioner = InstanceProvisioner::new(&ctx.config);
            commands::cluster::run(command, &ctx, provisioner).await
        }
    }
}
