//! Node CLI command lines.
//!
//! Everything the cluster sends to a node binary is rendered here so the
//! exact strings can be checked without a node.

use crate::Site;
use std::fmt::Write as _;

/// Flags that make the data-destroying `clean` verbs non-interactive.
const NO_PROMPT: &str = "-f --accept-license --answer-yes --no-prompt";

/// The three stores wiped when a cluster is cleaned between tests.
pub const CLEAN_TARGETS: [&str; 3] = ["eventdata", "globaldata", "inputdata"];

/// Marker preceding the archive path in `diag` output.
const DIAG_CREATED: &str = "Splunk diagnosis file created:";

/// `(conf, stanza, key, value)` settings applied to a forwarder once it
/// forwards anywhere: no throughput cap, acknowledged delivery.
pub const FORWARDER_TUNING: [(&str, &str, &str, &str); 2] = [
    ("limits", "thruput", "maxKBps", "1000000"),
    ("outputs", "tcpout:default-autolb-group", "useACK", "true"),
];

/// Single-quotes `value` for `sh`.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Clustering parameters for the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterParams {
    SingleSite {
        replication_factor: u32,
        search_factor: u32,
    },
    Multisite {
        available_sites: Vec<Site>,
        site_replication_factor: Option<String>,
        site_search_factor: Option<String>,
    },
}

/// What `edit cluster-config` turns a node into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMode {
    Master(MasterParams),
    Slave { master_uri: String, site: Option<Site> },
    SearchHead { master_uri: String, site: Option<Site> },
}

/// `edit cluster-config ...` for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfigCommand {
    pub mode: ClusterMode,
    pub replication_port: u16,
}

impl ClusterConfigCommand {
    /// Renders the command; `auth` is the ` -auth user:pass` suffix.
    pub fn render(&self, auth: &str) -> String {
        let mut command = String::from("edit cluster-config -mode ");
        match &self.mode {
            ClusterMode::Master(params) => {
                command.push_str("master");
                match params {
                    MasterParams::SingleSite {
                        replication_factor,
                        search_factor,
                    } => {
                        let _ = write!(
                            command,
                            " -replication_factor {replication_factor} -search_factor {search_factor}"
                        );
                    }
                    MasterParams::Multisite {
                        available_sites,
                        site_replication_factor,
                        site_search_factor,
                    } => {
                        command.push_str(" -multisite 1 -site site1");
                        if let Some(factor) = site_replication_factor {
                            let _ = write!(command, " -site_replication_factor {factor}");
                        }
                        if let Some(factor) = site_search_factor {
                            let _ = write!(command, " -site_search_factor {factor}");
                        }
                        let sites: Vec<String> =
                            available_sites.iter().map(ToString::to_string).collect();
                        let _ = write!(command, " -available_sites {}", sites.join(","));
                    }
                }
            }
            ClusterMode::Slave { master_uri, site } | ClusterMode::SearchHead { master_uri, site } => {
                command.push_str(if matches!(self.mode, ClusterMode::Slave { .. }) {
                    "slave"
                } else {
                    "searchhead"
                });
                let _ = write!(command, " -master_uri {master_uri}");
                if let Some(site) = site {
                    let _ = write!(command, " -site {site}");
                }
            }
        }
        let _ = write!(command, " -replication_port {}", self.replication_port);
        command.push_str(auth);
        command
    }
}

/// `<scheme>://<host>:<port>` of the master's management endpoint.
pub fn master_uri(scheme: &str, host: &str, port: u16) -> String {
    format!("{scheme}://{host}:{port}")
}

pub fn enable_listen(port: u16, auth: &str) -> String {
    format!("enable listen {port}{auth}")
}

pub fn clean(target: &str) -> String {
    format!("clean {target} {NO_PROMPT}")
}

pub fn apply_cluster_bundle(auth: &str) -> String {
    format!("apply cluster-bundle --answer-yes{auth}")
}

pub fn show_cluster_bundle_status(auth: &str) -> String {
    format!("show cluster-bundle-status{auth}")
}

pub fn login(auth: &str) -> String {
    format!("login{auth}")
}

pub fn list_forward_servers(auth: &str) -> String {
    format!("list forward-server{auth}")
}

pub fn add_forward_server(server: &str, auth: &str) -> String {
    format!("add forward-server {server}{auth}")
}

pub fn remove_forward_server(server: &str, auth: &str) -> String {
    format!("remove forward-server {server}{auth}")
}

pub fn add_monitor(source: &str, auth: &str) -> String {
    format!("add monitor {}{auth}", quote(source))
}

pub fn remove_monitor(source: &str, auth: &str) -> String {
    format!("remove monitor {}{auth}", quote(source))
}

/// Writes one setting through the configs REST endpoint.
pub fn set_conf(conf: &str, stanza: &str, key: &str, value: &str, auth: &str) -> String {
    let endpoint = format!("/servicesNS/nobody/system/configs/conf-{conf}/{stanza}");
    format!(
        "_internal call {} -method POST -post:{key} {}{auth}",
        quote(&endpoint),
        quote(value)
    )
}

/// Forces every index's hot buckets to roll so they replicate.
pub fn roll_hot_buckets(auth: &str) -> String {
    format!("_internal call '/data/indexes/*/roll-hot-buckets'{auth}")
}

/// Counts events matching `search` in `index`.
pub fn event_count_search(index: &str, search: &str, auth: &str) -> String {
    let query = format!("index={index} {search} | stats count");
    format!("search {} -preview false{auth}", quote(&query))
}

/// The count printed below the `count` header of a `stats count` search.
pub fn parse_event_count(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
}

/// `diag` takes no credentials.
pub fn diag() -> &'static str {
    "diag"
}

/// Path of the archive a `diag` run reports.
pub fn parse_diag_path(stdout: &str) -> Option<&str> {
    stdout
        .split(DIAG_CREATED)
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
}

pub fn enable_app(app: &str, auth: &str) -> String {
    format!("enable app {app}{auth}")
}

/// Extracts the `host:port` entries from `list forward-server` output.
///
/// Servers are listed one per line, indented with a tab, below section
/// headers such as `Active forwards:`.
pub fn parse_forward_servers(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix('\t'))
        .map(str::trim)
        .filter(|server| server.contains(':'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH: &str = " -auth admin:changeme";

    #[test]
    fn test_single_site_master() {
        let command = ClusterConfigCommand {
            mode: ClusterMode::Master(MasterParams::SingleSite {
                replication_factor: 3,
                search_factor: 2,
            }),
            replication_port: 9100,
        };
        assert_eq!(
            command.render(AUTH),
            "edit cluster-config -mode master -replication_factor 3 -search_factor 2 -replication_port 9100 -auth admin:changeme"
        );
    }

    #[test]
    fn test_multisite_master() {
        let command = ClusterConfigCommand {
            mode: ClusterMode::Master(MasterParams::Multisite {
                available_sites: Site::all(3),
                site_replication_factor: Some("origin:2,total:3".to_string()),
                site_search_factor: None,
            }),
            replication_port: 9100,
        };
        assert_eq!(
            command.render(AUTH),
            "edit cluster-config -mode master -multisite 1 -site site1 -site_replication_factor origin:2,total:3 -available_sites site1,site2,site3 -replication_port 9100 -auth admin:changeme"
        );
    }

    #[test]
    fn test_slave_and_search_head() {
        let uri = master_uri("https", "10.0.0.1", 8089);
        let slave = ClusterConfigCommand {
            mode: ClusterMode::Slave {
                master_uri: uri.clone(),
                site: Some(Site(2)),
            },
            replication_port: 9200,
        };
        assert_eq!(
            slave.render(AUTH),
            "edit cluster-config -mode slave -master_uri https://10.0.0.1:8089 -site site2 -replication_port 9200 -auth admin:changeme"
        );

        let search_head = ClusterConfigCommand {
            mode: ClusterMode::SearchHead {
                master_uri: uri,
                site: None,
            },
            replication_port: 9300,
        };
        assert_eq!(
            search_head.render(AUTH),
            "edit cluster-config -mode searchhead -master_uri https://10.0.0.1:8089 -replication_port 9300 -auth admin:changeme"
        );
    }

    #[test]
    fn test_bundle_commands() {
        assert_eq!(
            apply_cluster_bundle(AUTH),
            "apply cluster-bundle --answer-yes -auth admin:changeme"
        );
        assert_eq!(
            show_cluster_bundle_status(AUTH),
            "show cluster-bundle-status -auth admin:changeme"
        );
        assert_eq!(
            clean("eventdata"),
            "clean eventdata -f --accept-license --answer-yes --no-prompt"
        );
    }

    #[test]
    fn test_monitor_paths_are_quoted() {
        assert_eq!(
            add_monitor("/var/log/my app/x.log", AUTH),
            "add monitor '/var/log/my app/x.log' -auth admin:changeme"
        );
        assert_eq!(
            remove_monitor("/tmp/a;rm -rf b", AUTH),
            "remove monitor '/tmp/a;rm -rf b' -auth admin:changeme"
        );
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_forwarder_tuning_commands() {
        let rendered: Vec<String> = FORWARDER_TUNING
            .iter()
            .map(|(conf, stanza, key, value)| set_conf(conf, stanza, key, value, AUTH))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "_internal call '/servicesNS/nobody/system/configs/conf-limits/thruput' -method POST -post:maxKBps '1000000' -auth admin:changeme",
                "_internal call '/servicesNS/nobody/system/configs/conf-outputs/tcpout:default-autolb-group' -method POST -post:useACK 'true' -auth admin:changeme",
            ]
        );
    }

    #[test]
    fn test_index_commands() {
        assert_eq!(
            roll_hot_buckets(AUTH),
            "_internal call '/data/indexes/*/roll-hot-buckets' -auth admin:changeme"
        );
        assert_eq!(
            event_count_search("main", "*", AUTH),
            "search 'index=main * | stats count' -preview false -auth admin:changeme"
        );
        assert_eq!(parse_event_count("count\n-----\n  42  \n\n"), Some(42));
        assert_eq!(parse_event_count("FATAL: no such index\n"), None);
        assert_eq!(parse_event_count(""), None);
    }

    #[test]
    fn test_parse_diag_path() {
        let stdout = "Collecting components...\nSplunk diagnosis file created: /opt/splunk/diag-idx1-2024-01-01.tar.gz\n";
        assert_eq!(
            parse_diag_path(stdout),
            Some("/opt/splunk/diag-idx1-2024-01-01.tar.gz")
        );
        assert_eq!(parse_diag_path("diag failed\n"), None);
    }

    #[test]
    fn test_parse_forward_servers() {
        let stdout = "Active forwards:\n\tidx1.example.com:9997\n\tidx2.example.com:9998\nConfigured but inactive forwards:\n\tNone\n";
        assert_eq!(
            parse_forward_servers(stdout),
            vec!["idx1.example.com:9997", "idx2.example.com:9998"]
        );
        assert!(parse_forward_servers("Active forwards:\n\tNone\n").is_empty());
    }
}
