//! Configuration commands.

use anyhow::Result;
use clap::{Subcommand, ValueEnum};

use super::Context;
use crate::style::{self, colors::SemanticStyle};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the merged configuration.
    Show {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check that the configuration loads and validates.
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Toml,
    Json,
}

pub fn run(command: ConfigCommand, ctx: &Context) -> Result<()> {
    match command {
        ConfigCommand::Show { format } => show(ctx, format),
        ConfigCommand::Validate => {
            // Loading already validated it.
            style::print_success(&format!(
                "Configuration in {} is valid",
                ctx.project.display().code()
            ));
            Ok(())
        }
    }
}

fn show(ctx: &Context, format: Format) -> Result<()> {
    let config = &ctx.config;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(config)?),
        Format::Toml => println!("{}", toml::to_string_pretty(config)?),
        Format::Text => {
            let topology = &config.topology;
            println!("Shepherd Configuration");
            println!();

            if ctx.sources.is_empty() {
                style::print_labeled("Sources", "built-in defaults");
            } else {
                for source in &ctx.sources {
                    style::print_labeled("Source", &source.display().to_string());
                }
            }
            println!();

            println!("Node:");
            style::print_labeled("Binary", &config.node.binary);
            style::print_labeled("Local home", &config.node.local_home.display().to_string());
            style::print_labeled("Remote home", &config.node.remote_home.display().to_string());
            style::print_labeled("Management port", &config.node.management_port.to_string());
            style::print_labeled("Status command", &config.node.status_command);
            println!();

            println!("Hosts:");
            let pool = if config.hosts.pool.is_empty() {
                "local only".to_string()
            } else {
                config.hosts.pool.join(", ")
            };
            style::print_labeled("Pool", &pool);
            style::print_labeled("SSH", &format!("{}@<host>:{}", config.ssh.user, config.ssh.port));
            style::print_labeled(
                "Ports",
                &format!("{}-{} ({} tries)", config.ports.min, config.ports.max, config.ports.tries),
            );
            println!();

            println!("Topology:");
            style::print_labeled("Masters", &topology.masters.to_string());
            style::print_labeled("Slaves", &topology.slaves.to_string());
            style::print_labeled("Search heads", &topology.search_heads.to_string());
            style::print_labeled(
                "Factors",
                &format!(
                    "replication {}, search {}",
                    topology.replication_factor, topology.search_factor
                ),
            );
            if topology.multisite {
                style::print_labeled("Sites", &topology.sites.to_string());
            }
            println!();

            println!("Waits:");
            let waits = &config.waits;
            for (name, policy) in [
                ("Bundle validation", &waits.bundle_validation),
                ("Bundle reload", &waits.bundle_reload),
                ("Bundle creation", &waits.bundle_creation),
                ("Bundle events", &waits.bundle_events),
                ("Bundle status", &waits.bundle_status),
                ("Node start", &waits.node_start),
            ] {
                style::print_labeled(
                    name,
                    &format!("{}s every {}s", policy.max_wait_secs, policy.poll_interval_secs),
                );
            }
            style::print_labeled(
                "Rolling restart",
                &format!(
                    "{}s per slave every {}s",
                    waits.rolling_restart.per_slave_secs, waits.rolling_restart.poll_interval_secs
                ),
            );
            style::print_labeled(
                "Indexing",
                &format!(
                    "stable for {}s, checked every {}s, at most {}s",
                    waits.indexing.stable_secs,
                    waits.indexing.poll_interval_secs,
                    waits.indexing.max_wait_secs
                ),
            );
            println!();

            style::print_labeled("State directory", &ctx.state_dir().display().to_string());
        }
    }
    Ok(())
}
