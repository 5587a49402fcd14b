//! Requested topology shapes.

use crate::{Error, Result, Site};
use shepherd_config::TopologyConfig;

/// How many nodes of each role to create and how to replicate between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyShape {
    pub masters: u32,
    /// Slaves per site (total slaves when single-site).
    pub slaves: u32,
    /// Search heads per site (total search heads when single-site).
    pub search_heads: u32,
    pub replication_factor: u32,
    pub search_factor: u32,
    pub multisite: bool,
    pub sites: u32,
    /// Passed through verbatim, e.g. `origin:2,total:3`.
    pub site_replication_factor: Option<String>,
    pub site_search_factor: Option<String>,
}

impl Default for TopologyShape {
    fn default() -> Self {
        Self::from(&TopologyConfig::default())
    }
}

impl From<&TopologyConfig> for TopologyShape {
    fn from(config: &TopologyConfig) -> Self {
        Self {
            masters: config.masters,
            slaves: config.slaves,
            search_heads: config.search_heads,
            replication_factor: config.replication_factor,
            search_factor: config.search_factor,
            multisite: config.multisite,
            sites: config.sites,
            site_replication_factor: config.site_replication_factor.clone(),
            site_search_factor: config.site_search_factor.clone(),
        }
    }
}

impl TopologyShape {
    /// A single-site cluster with the default replication and search factors.
    pub fn single_site(masters: u32, slaves: u32, search_heads: u32) -> Self {
        Self {
            masters,
            slaves,
            search_heads,
            multisite: false,
            sites: 1,
            ..Self::default()
        }
    }

    /// A multisite cluster with one master and `slaves`/`search_heads` per site.
    pub fn multisite(sites: u32, slaves: u32, search_heads: u32) -> Self {
        Self {
            masters: 1,
            slaves,
            search_heads,
            multisite: true,
            sites,
            ..Self::default()
        }
    }

    pub fn with_factors(mut self, replication_factor: u32, search_factor: u32) -> Self {
        self.replication_factor = replication_factor;
        self.search_factor = search_factor;
        self
    }

    pub fn with_site_factors(
        mut self,
        site_replication_factor: impl Into<String>,
        site_search_factor: impl Into<String>,
    ) -> Self {
        self.site_replication_factor = Some(site_replication_factor.into());
        self.site_search_factor = Some(site_search_factor.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.masters > 1 {
            return Err(Error::InvalidShape(format!(
                "at most one master is supported, {} requested",
                self.masters
            )));
        }
        if self.masters == 0 && (self.slaves > 0 || self.search_heads > 0) {
            return Err(Error::InvalidShape(
                "slaves and search heads need a master".to_string(),
            ));
        }
        if self.replication_factor == 0 || self.search_factor == 0 {
            return Err(Error::InvalidShape(
                "replication and search factors must be at least 1".to_string(),
            ));
        }
        if self.multisite {
            if self.sites == 0 {
                return Err(Error::InvalidShape(
                    "a multisite topology needs at least one site".to_string(),
                ));
            }
            for (name, factor) in [
                ("site_replication_factor", &self.site_replication_factor),
                ("site_search_factor", &self.site_search_factor),
            ] {
                if factor.as_deref().is_some_and(|f| f.trim().is_empty()) {
                    return Err(Error::InvalidShape(format!("{name} must not be empty")));
                }
            }
        }
        Ok(())
    }

    /// Every site of the topology; empty when single-site.
    pub fn available_sites(&self) -> Vec<Site> {
        if self.multisite {
            Site::all(self.sites)
        } else {
            Vec::new()
        }
    }

    /// Number of cluster nodes (and therefore hosts) `build` will create.
    pub fn node_count(&self) -> usize {
        let per_site = (self.slaves + self.search_heads) as usize;
        let sites = if self.multisite { self.sites as usize } else { 1 };
        self.masters.min(1) as usize + per_site * sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shape() {
        let shape = TopologyShape::default();
        assert_eq!(shape.masters, 1);
        assert_eq!(shape.slaves, 3);
        assert_eq!(shape.search_heads, 1);
        assert_eq!(shape.node_count(), 5);
        assert!(shape.validate().is_ok());
        assert!(shape.available_sites().is_empty());
    }

    #[test]
    fn test_multisite_node_count() {
        let shape = TopologyShape::multisite(3, 2, 1);
        assert_eq!(shape.node_count(), 1 + 3 * 3);
        assert_eq!(shape.available_sites(), vec![Site(1), Site(2), Site(3)]);
    }

    #[test]
    fn test_rejects_second_master() {
        let shape = TopologyShape::single_site(2, 3, 1);
        assert!(matches!(shape.validate(), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn test_rejects_peers_without_master() {
        let shape = TopologyShape::single_site(0, 1, 0);
        assert!(shape.validate().is_err());

        let bare = TopologyShape::single_site(0, 0, 0);
        assert!(bare.validate().is_ok());
        assert_eq!(bare.node_count(), 0);
    }

    #[test]
    fn test_rejects_empty_site_factor_override() {
        let shape = TopologyShape::multisite(2, 1, 1).with_site_factors("  ", "origin:1,total:2");
        assert!(shape.validate().is_err());

        let shape = TopologyShape::multisite(2, 1, 1).with_site_factors("origin:2,total:3", "origin:1,total:2");
        assert!(shape.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sites() {
        let shape = TopologyShape::multisite(0, 1, 1);
        assert!(shape.validate().is_err());
    }
}
