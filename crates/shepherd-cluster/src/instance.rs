//! Nodes backed by a real installation, driven through a shell locally or
//! over SSH.

use crate::command::quote;
use crate::ports::PortScanner;
use crate::{CommandOutput, Error, HostTarget, NodeHandle, NodeProvisioner, Package, Result};
use shepherd_config::ShepherdConfig;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;

const NO_PROMPT: &str = "--accept-license --answer-yes --no-prompt";

/// SSH login used for remote hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

/// How shell scripts reach a node's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Local,
    Remote(SshTarget),
}

impl Transport {
    fn command(&self, script: &str) -> Command {
        match self {
            Transport::Local => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(script);
                command
            }
            Transport::Remote(ssh) => {
                let mut command = Command::new("ssh");
                command
                    .arg("-p")
                    .arg(ssh.port.to_string())
                    .arg("-o")
                    .arg("BatchMode=yes");
                if let Some(identity) = &ssh.identity_file {
                    command.arg("-i").arg(identity);
                }
                command.arg(format!("{}@{}", ssh.user, ssh.host)).arg(script);
                command
            }
        }
    }

    /// Moves `path` on the node's host into the local directory `dir`.
    fn fetch_command(&self, path: &Path, dir: &Path) -> Command {
        match self {
            Transport::Local => {
                let mut command = Command::new("mv");
                command.arg(path).arg(dir);
                command
            }
            Transport::Remote(ssh) => {
                let mut command = Command::new("scp");
                command
                    .arg("-P")
                    .arg(ssh.port.to_string())
                    .arg("-o")
                    .arg("BatchMode=yes");
                if let Some(identity) = &ssh.identity_file {
                    command.arg("-i").arg(identity);
                }
                command
                    .arg(format!("{}@{}:{}", ssh.user, ssh.host, path.display()))
                    .arg(dir);
                command
            }
        }
    }
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// An installed node.
#[derive(Debug, Clone)]
pub struct Instance {
    transport: Transport,
    host: String,
    home: PathBuf,
    management_port: u16,
    binary: String,
    auth: String,
    install_command: Option<String>,
    status_command: String,
}

impl Instance {
    pub fn new(
        config: &ShepherdConfig,
        transport: Transport,
        host: impl Into<String>,
        home: PathBuf,
        management_port: u16,
    ) -> Self {
        Self {
            transport,
            host: host.into(),
            home,
            management_port,
            binary: config.node.binary.clone(),
            auth: config.credentials.auth(),
            install_command: config.node.install_command.clone(),
            status_command: config.node.status_command.clone(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn binary_path(&self) -> PathBuf {
        self.home.join("bin").join(&self.binary)
    }

    async fn run_shell(&self, script: &str) -> Result<CommandOutput> {
        tracing::debug!(host = %self.host, script, "running");
        self.output(self.transport.command(script)).await
    }

    async fn output(&self, mut command: Command) -> Result<CommandOutput> {
        let output = command
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Transport {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_shell_checked(&self, script: &str) -> Result<CommandOutput> {
        self.run_shell(script).await?.check(script)
    }
}

impl NodeHandle for Instance {
    fn host(&self) -> &str {
        &self.host
    }

    fn home(&self) -> &Path {
        &self.home
    }

    fn management_port(&self) -> u16 {
        self.management_port
    }

    async fn install(&self) -> Result<()> {
        match &self.install_command {
            Some(template) => {
                let script = template
                    .replace("{home}", &quote_path(&self.home))
                    .replace("{management_port}", &self.management_port.to_string());
                tracing::info!(host = %self.host, home = %self.home.display(), "installing");
                self.run_shell_checked(&script).await?;
            }
            None => {
                tracing::debug!(host = %self.host, home = %self.home.display(), "no install command, using the existing installation");
                self.run_shell_checked(&format!("test -x {}", quote_path(&self.binary_path())))
                    .await?;
                // The installation keeps whatever port it had; move it to ours.
                let command = format!("set splunkd-port {}{}", self.management_port, self.auth);
                self.run(&command).await?;
            }
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.run(&format!("start {NO_PROMPT}")).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.run("stop -f").await?;
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.execute("status").await?.success())
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let script = format!("{} {command}", quote_path(&self.binary_path()));
        self.run_shell(&script).await
    }

    async fn uninstall(&self) -> Result<()> {
        self.run_shell_checked(&format!("rm -rf {}", quote_path(&self.home)))
            .await?;
        Ok(())
    }

    async fn reset_dir(&self, relative: &Path) -> Result<()> {
        let dir = quote_path(&self.home.join(relative));
        self.run_shell_checked(&format!("rm -rf {dir} && mkdir -p {dir}"))
            .await?;
        Ok(())
    }

    async fn set_server_name(&self, name: &str) -> Result<()> {
        self.run(&format!("set servername {}{}", quote(name), self.auth))
            .await?;
        Ok(())
    }

    async fn apply_bundle_status(&self) -> Result<String> {
        let output = self
            .run(&format!("{}{}", self.status_command, self.auth))
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn fetch(&self, path: &Path, dir: &Path) -> Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} names no file", path.display()),
            ))
        })?;
        tracing::debug!(host = %self.host, path = %path.display(), dir = %dir.display(), "fetching");
        let description = format!("fetch {}", path.display());
        self.output(self.transport.fetch_command(path, dir))
            .await?
            .check(&description)?;
        Ok(dir.join(name))
    }
}

/// Creates [`Instance`]s from configuration.
///
/// Local nodes get their own home directory and a scanned management port
/// so several can share the machine; remote nodes use the configured ones.
/// With an install command each local node gets a fresh home next to
/// `local_home`. Without one, homes are existing installations: `local_home`
/// first, then `local_home0`, `local_home1`, ...
#[derive(Debug, Clone)]
pub struct InstanceProvisioner {
    config: Arc<ShepherdConfig>,
    scanner: Arc<PortScanner>,
    local_homes: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InstanceProvisioner {
    pub fn new(config: &ShepherdConfig) -> Self {
        Self {
            config: Arc::new(config.clone()),
            scanner: Arc::new(PortScanner::new(config.ports)),
            local_homes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn transport(&self, target: &HostTarget) -> Transport {
        if target.is_remote() {
            Transport::Remote(SshTarget {
                user: self.config.ssh.user.clone(),
                host: target.host.clone(),
                port: self.config.ssh.port,
                identity_file: self.config.ssh.identity_file.clone(),
            })
        } else {
            Transport::Local
        }
    }

    /// `base`, then `base0`, `base1`, ... whichever is not handed out yet.
    /// When `fresh`, directories already present on disk are skipped too.
    fn claim_local_home(&self, base: &Path, fresh: bool) -> PathBuf {
        let mut claimed = self
            .local_homes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let taken = |path: &Path| claimed.contains(path) || (fresh && path.exists());

        let mut home = base.to_path_buf();
        let mut suffix = 0u32;
        while taken(&home) {
            let mut name = base.file_name().map(OsString::from).unwrap_or_default();
            name.push(suffix.to_string());
            home = base.with_file_name(name);
            suffix += 1;
        }
        claimed.insert(home.clone());
        home
    }
}

fn forwarder_home(home: &Path) -> PathBuf {
    let mut name = home.file_name().map(OsString::from).unwrap_or_default();
    name.push("forwarder");
    home.with_file_name(name)
}

impl NodeProvisioner for InstanceProvisioner {
    type Handle = Instance;

    async fn provision(&self, target: &HostTarget, package: Package) -> Result<Instance> {
        let node = &self.config.node;
        let (home, management_port) = if target.is_remote() {
            (node.remote_home.clone(), node.management_port)
        } else {
            let port = self.scanner.find_open_port(&target.host).await?;
            let fresh = node.install_command.is_some();
            (self.claim_local_home(&node.local_home, fresh), port)
        };
        let home = match package {
            Package::Full => home,
            Package::UniversalForwarder => forwarder_home(&home),
        };

        tracing::debug!(host = %target, home = %home.display(), management_port, "provisioned node");
        Ok(Instance::new(
            &self.config,
            self.transport(target),
            target.host.clone(),
            home,
            management_port,
        ))
    }

    async fn attach(&self, target: &HostTarget, home: &Path, management_port: u16) -> Result<Instance> {
        if !target.is_remote() {
            self.local_homes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(home.to_path_buf());
        }
        Ok(Instance::new(
            &self.config,
            self.transport(target),
            target.host.clone(),
            home.to_path_buf(),
            management_port,
        ))
    }

    async fn find_open_port(&self, target: &HostTarget) -> Result<u16> {
        self.scanner.find_open_port(&target.host).await
    }
}
