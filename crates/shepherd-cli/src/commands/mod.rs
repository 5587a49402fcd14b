//! CLI command implementations.

pub mod cluster;
pub mod config;

use anyhow::{Context as _, Result};
use shepherd_cluster::testing::{Journal, Op};
use shepherd_config::{ConfigLoader, ShepherdConfig};
use std::path::{Path, PathBuf};

use crate::style::colors::SemanticStyle;

/// What every command runs against: the project, its merged configuration
/// and whether node calls are only recorded.
pub struct Context {
    pub project: PathBuf,
    pub config: ShepherdConfig,
    /// Config files that were merged, lowest precedence first.
    pub sources: Vec<PathBuf>,
    pub dry_run: bool,
}

impl Context {
    pub fn load(project: &Path, dry_run: bool) -> Result<Self> {
        let loader = ConfigLoader::new().with_project_dir(project);
        let sources = loader.sources();
        let config = loader.load().with_context(|| {
            format!("Failed to load configuration from {}", project.display())
        })?;
        Ok(Self {
            project: project.to_path_buf(),
            config,
            sources,
            dry_run,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.config.run.state_dir
    }
}

fn describe(op: &Op) -> String {
    match op {
        Op::Execute(command) => command.clone(),
        Op::ResetDir(dir) => format!("reset {}", dir.display()),
        Op::SetServerName(name) => format!("set servername {name}"),
        Op::Fetch(path) => format!("fetch {}", path.display()),
        other => other.kind().to_string(),
    }
}

/// Lists the node calls a dry run would have made.
pub fn print_journal(journal: &Journal) {
    let calls = journal.calls();
    println!();
    println!("{}", format!("Dry run: {} node calls recorded", calls.len()).muted());
    for call in calls {
        println!(
            "  {} {}",
            format!("node{}@{}", call.node, call.host).code(),
            describe(&call.op)
        );
    }
}
