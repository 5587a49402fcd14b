//! Finding a port nobody listens on yet.

use crate::{Error, Result};
use rand::seq::index;
use shepherd_config::PortRange;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes random ports of a range until a connection is refused.
///
/// Ports already handed out are not handed out again, even before whatever
/// they were given to starts listening.
#[derive(Debug)]
pub struct PortScanner {
    range: PortRange,
    connect_timeout: Duration,
    handed_out: Mutex<HashSet<(String, u16)>>,
}

impl PortScanner {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            connect_timeout: CONNECT_TIMEOUT,
            handed_out: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Up to `tries` distinct random ports, in the order they are tried.
    fn candidates(&self) -> Vec<u16> {
        let span = usize::from(self.range.max.saturating_sub(self.range.min)) + 1;
        let tries = usize::try_from(self.range.tries).unwrap_or(usize::MAX).min(span);
        index::sample(&mut rand::thread_rng(), span, tries)
            .into_iter()
            .filter_map(|offset| u16::try_from(offset).ok())
            .map(|offset| self.range.min + offset)
            .collect()
    }

    pub async fn find_open_port(&self, host: &str) -> Result<u16> {
        tracing::debug!(host, min = self.range.min, max = self.range.max, "scanning for an open port");

        for port in self.candidates() {
            if self.was_handed_out(host, port) {
                continue;
            }
            if self.is_open(host, port).await {
                self.hand_out(host, port);
                tracing::debug!(host, port, "found open port");
                return Ok(port);
            }
        }

        Err(Error::NoOpenPort {
            host: host.to_string(),
            tries: self.range.tries,
        })
    }

    /// Open means nothing accepted the connection: it was refused.
    async fn is_open(&self, host: &str, port: u16) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Err(e)) => e.kind() == ErrorKind::ConnectionRefused,
            Ok(Ok(_)) | Err(_) => false,
        }
    }

    fn was_handed_out(&self, host: &str, port: u16) -> bool {
        self.handed_out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(host.to_string(), port))
    }

    fn hand_out(&self, host: &str, port: u16) {
        self.handed_out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((host.to_string(), port));
    }
}
