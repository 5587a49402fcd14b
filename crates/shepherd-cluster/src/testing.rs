//! An in-memory provisioner that records every call.
//!
//! Nodes answer commands from scripted responses, so whole topologies can be
//! built, polled, cleaned and torn down without installing anything. Used by
//! the test suites and by `shepherd --dry-run`.

use crate::{CommandOutput, Error, HostTarget, NodeHandle, NodeProvisioner, Package, Result};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// First port handed out by [`NodeProvisioner::find_open_port`].
const FIRST_OPEN_PORT: u16 = 9100;

/// First management port; node `n` gets `FIRST_MANAGEMENT_PORT + n`.
const FIRST_MANAGEMENT_PORT: u16 = 8089;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Install,
    Start,
    Stop,
    Restart,
    IsRunning,
    Execute(String),
    Uninstall,
    ResetDir(PathBuf),
    SetServerName(String),
    Status,
    Fetch(PathBuf),
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Install => "install",
            Op::Start => "start",
            Op::Stop => "stop",
            Op::Restart => "restart",
            Op::IsRunning => "is_running",
            Op::Execute(_) => "execute",
            Op::Uninstall => "uninstall",
            Op::ResetDir(_) => "reset_dir",
            Op::SetServerName(_) => "set_server_name",
            Op::Status => "status",
            Op::Fetch(_) => "fetch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Provisioning order of the node, from 0.
    pub node: usize,
    pub host: String,
    pub op: Op,
}

/// Shared, append-only log of calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, node: usize, host: &str, op: Op) {
        lock(&self.0).push(Call {
            node,
            host: host.to_string(),
            op,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.0).clone()
    }

    /// Calls made on one node, in order.
    pub fn ops_for(&self, node: usize) -> Vec<Op> {
        lock(&self.0)
            .iter()
            .filter(|call| call.node == node)
            .map(|call| call.op.clone())
            .collect()
    }

    /// Number of calls of one kind, e.g. `"stop"`.
    pub fn count(&self, kind: &str) -> usize {
        lock(&self.0)
            .iter()
            .filter(|call| call.op.kind() == kind)
            .count()
    }

    /// Every executed command line as `(node, command)`.
    pub fn executed(&self) -> Vec<(usize, String)> {
        lock(&self.0)
            .iter()
            .filter_map(|call| match &call.op {
                Op::Execute(command) => Some((call.node, command.clone())),
                _ => None,
            })
            .collect()
    }

    /// Nodes that received a call of `kind`, in call order.
    pub fn nodes_with(&self, kind: &str) -> Vec<usize> {
        lock(&self.0)
            .iter()
            .filter(|call| call.op.kind() == kind)
            .map(|call| call.node)
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

#[derive(Debug, Default)]
struct Script {
    /// `(command prefix, output)`; the first matching prefix wins.
    responses: Vec<(String, CommandOutput)>,
    /// Returned by `apply_bundle_status`; the last entry repeats.
    statuses: VecDeque<String>,
    /// `(host, op kind)` pairs that fail.
    failures: HashSet<(String, String)>,
}

#[derive(Debug)]
struct Shared {
    journal: Journal,
    script: Mutex<Script>,
    next_node: AtomicUsize,
    next_port: AtomicU16,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            journal: Journal::default(),
            script: Mutex::new(Script::default()),
            next_node: AtomicUsize::new(0),
            next_port: AtomicU16::new(FIRST_OPEN_PORT),
        }
    }
}

/// Provisioner whose nodes only record what is asked of them.
#[derive(Debug, Clone, Default)]
pub struct RecordingProvisioner {
    shared: Arc<Shared>,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> Journal {
        self.shared.journal.clone()
    }

    /// Answers commands starting with `prefix` with `output`.
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        lock(&self.shared.script)
            .responses
            .push((prefix.into(), output));
        self
    }

    /// Status strings returned by successive `apply_bundle_status` calls.
    pub fn script_statuses<I, S>(&self, statuses: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.shared.script).statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Makes every `kind` call (e.g. `"stop"`) on `host` fail.
    pub fn fail(&self, host: impl Into<String>, kind: &str) -> &Self {
        lock(&self.shared.script)
            .failures
            .insert((host.into(), kind.to_string()));
        self
    }

    fn response(&self, command: &str) -> CommandOutput {
        let script = lock(&self.shared.script);
        script
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map_or_else(|| CommandOutput::ok(""), |(_, output)| output.clone())
    }

    fn next_status(&self) -> String {
        let mut script = lock(&self.shared.script);
        if script.statuses.len() > 1 {
            script.statuses.pop_front().unwrap_or_default()
        } else {
            script.statuses.front().cloned().unwrap_or_default()
        }
    }

    fn fails(&self, host: &str, kind: &str) -> bool {
        lock(&self.shared.script)
            .failures
            .contains(&(host.to_string(), kind.to_string()))
    }

    fn node(
        &self,
        target: &HostTarget,
        home: impl FnOnce(usize) -> PathBuf,
        management_port: Option<u16>,
        running: bool,
    ) -> RecordingNode {
        let id = self.shared.next_node.fetch_add(1, Ordering::SeqCst);
        let home = home(id);
        let management_port = management_port
            .unwrap_or_else(|| FIRST_MANAGEMENT_PORT.saturating_add(u16::try_from(id).unwrap_or(u16::MAX)));
        RecordingNode {
            id,
            host: target.host.clone(),
            home,
            management_port,
            running: Mutex::new(running),
            provisioner: self.clone(),
        }
    }
}

impl NodeProvisioner for RecordingProvisioner {
    type Handle = RecordingNode;

    async fn provision(&self, target: &HostTarget, package: Package) -> Result<RecordingNode> {
        let dir = match package {
            Package::Full => "splunk",
            Package::UniversalForwarder => "splunkforwarder",
        };
        Ok(self.node(target, |id| PathBuf::from(format!("/opt/{dir}{id}")), None, false))
    }

    async fn attach(&self, target: &HostTarget, home: &Path, management_port: u16) -> Result<RecordingNode> {
        Ok(self.node(target, |_| home.to_path_buf(), Some(management_port), true))
    }

    async fn find_open_port(&self, _target: &HostTarget) -> Result<u16> {
        Ok(self.shared.next_port.fetch_add(1, Ordering::SeqCst))
    }
}

/// A node that exists only in the journal.
#[derive(Debug)]
pub struct RecordingNode {
    id: usize,
    host: String,
    home: PathBuf,
    management_port: u16,
    running: Mutex<bool>,
    provisioner: RecordingProvisioner,
}

impl RecordingNode {
    pub fn id(&self) -> usize {
        self.id
    }

    fn record(&self, op: Op) -> Result<()> {
        let kind = op.kind();
        self.provisioner.shared.journal.record(self.id, &self.host, op);
        if self.provisioner.fails(&self.host, kind) {
            return Err(Error::Transport {
                host: self.host.clone(),
                reason: format!("scripted {kind} failure"),
            });
        }
        Ok(())
    }

    fn set_running(&self, running: bool) {
        *lock(&self.running) = running;
    }
}

impl NodeHandle for RecordingNode {
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
        self.record(Op::Install)
    }

    async fn start(&self) -> Result<()> {
        self.record(Op::Start)?;
        self.set_running(true);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(Op::Stop)?;
        self.set_running(false);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.record(Op::Restart)?;
        self.set_running(true);
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        self.record(Op::IsRunning)?;
        Ok(*lock(&self.running))
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        self.record(Op::Execute(command.to_string()))?;
        Ok(self.provisioner.response(command))
    }

    async fn uninstall(&self) -> Result<()> {
        self.record(Op::Uninstall)
    }

    async fn reset_dir(&self, relative: &Path) -> Result<()> {
        self.record(Op::ResetDir(relative.to_path_buf()))
    }

    async fn set_server_name(&self, name: &str) -> Result<()> {
        self.record(Op::SetServerName(name.to_string()))
    }

    async fn apply_bundle_status(&self) -> Result<String> {
        self.record(Op::Status)?;
        Ok(self.provisioner.next_status())
    }

    /// Leaves an empty file where the fetched one would land.
    async fn fetch(&self, path: &Path, dir: &Path) -> Result<PathBuf> {
        self.record(Op::Fetch(path.to_path_buf()))?;
        let local = dir.join(path.file_name().unwrap_or(path.as_os_str()));
        tokio::fs::write(&local, b"").await?;
        Ok(local)
    }
}
