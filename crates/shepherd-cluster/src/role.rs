//! Node roles, sites and forwarder kinds.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The part a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Coordinates peers and distributes bundles.
    Master,

    /// Data-replicating peer.
    Slave,

    /// Query front-end.
    SearchHead,

    /// Ships data into the slaves.
    Forwarder,

    /// Installed but not configured as a cluster node.
    Unassigned,
}

impl NodeRole {
    /// The value passed to `edit cluster-config -mode`.
    pub fn cli_mode(self) -> Option<&'static str> {
        match self {
            NodeRole::Master => Some("master"),
            NodeRole::Slave => Some("slave"),
            NodeRole::SearchHead => Some("searchhead"),
            NodeRole::Forwarder | NodeRole::Unassigned => None,
        }
    }

    /// Slaves and search heads point at a master and need one to exist.
    pub fn requires_master(self) -> bool {
        matches!(self, NodeRole::Slave | NodeRole::SearchHead)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Master => "master",
            NodeRole::Slave => "slave",
            NodeRole::SearchHead => "searchhead",
            NodeRole::Forwarder => "forwarder",
            NodeRole::Unassigned => "unassigned",
        };
        f.write_str(name)
    }
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "slave" | "peer" => Ok(NodeRole::Slave),
            "searchhead" | "search-head" | "search_head" => Ok(NodeRole::SearchHead),
            "forwarder" => Ok(NodeRole::Forwarder),
            _ => Err(Error::InvalidRole(s.to_string())),
        }
    }
}

/// A site of a multisite topology, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Site(pub u32);

impl Site {
    /// `site1..=siteN`.
    pub fn all(count: u32) -> Vec<Site> {
        (1..=count).map(Site).collect()
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site{}", self.0)
    }
}

impl FromStr for Site {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix("site")
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .map(Site)
            .ok_or_else(|| Error::InvalidShape(format!("'{s}' is not a site (expected siteN)")))
    }
}

/// Flavour of forwarder installed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwarderKind {
    /// No web server, no parsing.
    #[default]
    Universal,

    /// Full instance with the forwarder app enabled.
    Heavy,

    /// Full instance with the light forwarder app enabled.
    Light,
}

impl ForwarderKind {
    /// App enabled after install to turn a full instance into this forwarder.
    pub fn app(self) -> Option<&'static str> {
        match self {
            ForwarderKind::Universal => None,
            ForwarderKind::Heavy => Some("SplunkForwarder"),
            ForwarderKind::Light => Some("SplunkLightForwarder"),
        }
    }
}

impl fmt::Display for ForwarderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForwarderKind::Universal => "universal",
            ForwarderKind::Heavy => "heavy",
            ForwarderKind::Light => "light",
        })
    }
}

impl FromStr for ForwarderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "universal" => Ok(ForwarderKind::Universal),
            "heavy" => Ok(ForwarderKind::Heavy),
            "light" => Ok(ForwarderKind::Light),
            _ => Err(Error::InvalidForwarderKind(s.to_string())),
        }
    }
}
