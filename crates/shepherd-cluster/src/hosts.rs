//! Run-wide host allocation and node naming.
//!
//! A test run hands hosts out in pool order and never gives the same host to
//! two clusters, whether they exist at the same time or one after another.
//! The pool is an explicit value shared through [`RunContext`].

use crate::{Error, HostTarget, Result};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};

/// Loopback identity used when no host pool is configured.
pub const LOOPBACK: &str = "127.0.0.1";

/// Hosts available to every cluster of one run.
#[derive(Debug, Default)]
pub struct HostPool {
    hosts: Vec<String>,
    cursor: Mutex<usize>,
}

impl HostPool {
    /// A pool with no hosts: every node runs on the local machine.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            cursor: Mutex::new(0),
        }
    }

    /// Next unused host, `None` when the pool is empty (run locally).
    pub fn next(&self) -> Result<Option<String>> {
        if self.hosts.is_empty() {
            return Ok(None);
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(host) = self.hosts.get(*cursor) else {
            tracing::error!(pool_size = self.hosts.len(), "running out of hosts");
            return Err(Error::HostPoolExhausted {
                pool_size: self.hosts.len(),
            });
        };
        *cursor += 1;
        Ok(Some(host.clone()))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn remaining(&self) -> usize {
        let cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        self.hosts.len() - *cursor
    }

    /// Makes every host available again; called when a suite ends.
    pub fn reset(&self) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }
}

/// Decides which host names refer to the machine running the tests.
#[derive(Debug, Clone, Default)]
pub struct HostIdentity {
    hostname: Option<String>,
    aliases: Vec<String>,
    addresses: Vec<IpAddr>,
}

impl HostIdentity {
    pub fn new(hostname: Option<String>, aliases: Vec<String>) -> Self {
        Self {
            hostname,
            aliases,
            addresses: Vec::new(),
        }
    }

    /// Also treats `address` as the local machine.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
        self
    }

    /// Reads the kernel's host name and collects the machine's own
    /// addresses: those the host name resolves to and the one outbound
    /// traffic leaves from.
    pub fn detect(aliases: Vec<String>) -> Self {
        let hostname = ["/proc/sys/kernel/hostname", "/etc/hostname"]
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let mut addresses: Vec<IpAddr> = hostname
            .as_deref()
            .and_then(|name| (name, 0).to_socket_addrs().ok())
            .into_iter()
            .flatten()
            .map(|addr| addr.ip())
            .collect();
        addresses.extend(outbound_address());

        let identity = addresses
            .into_iter()
            .fold(Self::new(hostname, aliases), Self::with_address);
        tracing::debug!(hostname = ?identity.hostname, addresses = ?identity.addresses, "detected local identity");
        identity
    }

    pub fn loopback(&self) -> &str {
        LOOPBACK
    }

    pub fn is_local(&self, host: &str) -> bool {
        matches!(host, "localhost" | LOOPBACK | "::1")
            || self.hostname.as_deref() == Some(host)
            || self.aliases.iter().any(|alias| alias == host)
            || host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback() || self.addresses.contains(&ip))
    }

    /// Picks the transport for `host`.
    pub fn target(&self, host: &str) -> HostTarget {
        if self.is_local(host) {
            HostTarget::local(host)
        } else {
            HostTarget::remote(host)
        }
    }
}

/// Source address of the default route. Connecting a UDP socket sends
/// nothing.
fn outbound_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("192.0.2.1", 9)).ok()?;
    socket
        .local_addr()
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified())
}

/// Issues server names that are unique across the run.
///
/// Names are `{host}-{UTC timestamp}` at second precision. Stamps never
/// repeat: a name requested within the same second as the previous one is
/// stamped one second later.
#[derive(Debug, Default)]
pub struct ServerNames {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ServerNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name and the stamp it carries.
    pub fn issue(&self, host: &str, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stamp = now.trunc_subsecs(0);
        if let Some(previous) = *last {
            if stamp <= previous {
                stamp = previous + TimeDelta::seconds(1);
            }
        }
        *last = Some(stamp);
        (format_server_name(host, stamp), stamp)
    }
}

pub fn format_server_name(host: &str, stamp: DateTime<Utc>) -> String {
    format!("{host}-{}", stamp.format("%Y-%m-%d-%H.%M.%S"))
}

/// State shared by every cluster created during one test run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub hosts: Arc<HostPool>,
    pub identity: HostIdentity,
    pub names: Arc<ServerNames>,
}

impl RunContext {
    pub fn new(hosts: HostPool, identity: HostIdentity) -> Self {
        Self {
            hosts: Arc::new(hosts),
            identity,
            names: Arc::new(ServerNames::new()),
        }
    }

    /// Everything on the local machine.
    pub fn local() -> Self {
        Self::new(HostPool::local(), HostIdentity::default())
    }

    /// Resolves where the next node goes: an explicit host, the next pooled
    /// host, or the loopback identity.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<HostTarget> {
        let host = match explicit {
            Some(host) => host.to_string(),
            None => match self.hosts.next()? {
                Some(host) => host,
                None => {
                    tracing::debug!("no host pool, using the local machine");
                    self.identity.loopback().to_string()
                }
            },
        };
        Ok(self.identity.target(&host))
    }
}
