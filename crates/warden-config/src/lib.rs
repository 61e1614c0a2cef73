//! Shared configuration for the warden node supervisor.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then a
//! TOML file (`--config-path` or `WARDEN_CONFIG_PATH`), then `WARDEN_*`
//! environment variables, then command-line flags. Every field is optional
//! on disk; the accessor methods resolve the documented defaults so callers
//! never deal with missing values.

mod cluster;
mod defaults;
mod logging;
mod paths;

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use warden_types::ProcessKind;

pub use cluster::NodeType;
pub use defaults::*;
pub use logging::{LogFormat, LogFormatParseError};
pub use paths::{IPC_FILE_NAME, NodePaths};

/// Names of the properties that must not change across an in-place restart.
pub const PROTECTED_PROPERTIES: [&str; 5] = [
    "data_path",
    "web_path",
    "logs_path",
    "temp_path",
    "cluster_enabled",
];

/// Node configuration resolved from every configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "WARDEN")]
pub struct Config {
    /// Installation home; other relative paths resolve against it.
    pub home_path: Option<PathBuf>,
    /// Persistent data directory.
    pub data_path: Option<PathBuf>,
    /// Static web assets directory.
    pub web_path: Option<PathBuf>,
    /// Log directory.
    pub logs_path: Option<PathBuf>,
    /// Scratch directory holding runtime artefacts and the IPC flag store.
    pub temp_path: Option<PathBuf>,
    /// Enables cluster mode.
    pub cluster_enabled: Option<bool>,
    /// Name of this node inside the cluster.
    pub cluster_node_name: Option<String>,
    /// Role of this node inside the cluster.
    pub cluster_node_type: Option<NodeType>,
    /// Host advertised to the other nodes.
    pub cluster_node_host: Option<String>,
    /// Enables the graceful stop command watcher.
    pub enable_stop_command: Option<bool>,
    /// Graceful stop budget of the compute engine, in milliseconds.
    pub ce_graceful_stop_timeout_ms: Option<u64>,
    /// Graceful stop budget of the web server, in milliseconds.
    pub web_graceful_stop_timeout_ms: Option<u64>,
    /// Poll interval of the per-process watchers, in milliseconds.
    pub process_watcher_delay_ms: Option<u64>,
    /// Poll interval of the stop request watchers, in milliseconds.
    pub stop_request_poll_ms: Option<u64>,
    /// Interpreter used for the web server and compute engine.
    pub java_path: Option<PathBuf>,
    /// JVM options of the web server.
    pub web_java_opts: Option<String>,
    /// JVM options of the compute engine.
    pub ce_java_opts: Option<String>,
    /// JVM options of the search engine.
    pub search_java_opts: Option<String>,
    /// Host of the search engine HTTP endpoint.
    pub search_host: Option<String>,
    /// Port of the search engine HTTP endpoint.
    pub search_port: Option<u16>,
    /// Bootstrap password of the search engine; enables security when set.
    pub search_password: Option<String>,
    /// Keystore used for search engine transport encryption.
    pub search_keystore_path: Option<PathBuf>,
    /// Password of the search engine keystore.
    pub search_keystore_password: Option<String>,
    /// Truststore used for search engine transport encryption.
    pub search_truststore_path: Option<PathBuf>,
    /// Password of the search engine truststore.
    pub search_truststore_password: Option<String>,
    /// Tracing filter expression.
    pub log_filter: Option<String>,
    /// Tracing output format.
    pub log_format: Option<LogFormat>,
}

impl Config {
    /// Directory layout derived from the configured paths.
    #[must_use]
    pub fn paths(&self) -> NodePaths {
        NodePaths::from_config(self)
    }

    /// Returns `true` when the node takes part in a cluster.
    #[must_use]
    pub fn cluster_enabled(&self) -> bool {
        self.cluster_enabled.unwrap_or(false)
    }

    /// Role of the node; meaningful only in cluster mode.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.cluster_node_type.unwrap_or_default()
    }

    /// Name identifying this node in logs and cluster state.
    #[must_use]
    pub fn node_name(&self) -> &str {
        self.cluster_node_name
            .as_deref()
            .unwrap_or(DEFAULT_NODE_NAME)
    }

    /// Host advertised to the other nodes.
    #[must_use]
    pub fn node_host(&self) -> &str {
        self.cluster_node_host
            .as_deref()
            .unwrap_or(DEFAULT_NODE_HOST)
    }

    /// Returns `true` when the graceful stop command watcher must run.
    #[must_use]
    pub fn stop_command_enabled(&self) -> bool {
        self.enable_stop_command.unwrap_or(false)
    }

    /// Child processes this node launches, in startup dependency order.
    #[must_use]
    pub fn enabled_processes(&self) -> Vec<ProcessKind> {
        if !self.cluster_enabled() {
            return ProcessKind::SUPERVISED.to_vec();
        }
        match self.node_type() {
            NodeType::Application => vec![ProcessKind::WebServer, ProcessKind::ComputeEngine],
            NodeType::Search => vec![ProcessKind::Elasticsearch],
        }
    }

    /// Returns `true` when the search dependency must be operational locally.
    ///
    /// Application nodes of a cluster delegate search to remote nodes.
    #[must_use]
    pub fn require_local_search(&self) -> bool {
        !self.cluster_enabled() || self.node_type() == NodeType::Search
    }

    /// Graceful stop budget granted to a process before escalating.
    #[must_use]
    pub fn graceful_stop_timeout(&self, kind: ProcessKind) -> Duration {
        match kind {
            ProcessKind::ComputeEngine => self
                .ce_graceful_stop_timeout_ms
                .map_or(DEFAULT_CE_GRACEFUL_STOP_TIMEOUT, Duration::from_millis),
            ProcessKind::WebServer => self
                .web_graceful_stop_timeout_ms
                .map_or(DEFAULT_WEB_GRACEFUL_STOP_TIMEOUT, Duration::from_millis),
            ProcessKind::Elasticsearch | ProcessKind::App => DEFAULT_SEARCH_GRACEFUL_STOP_TIMEOUT,
        }
    }

    /// Poll interval of the per-process watchers.
    #[must_use]
    pub fn process_watcher_delay(&self) -> Duration {
        self.process_watcher_delay_ms
            .map_or(DEFAULT_WATCHER_DELAY, Duration::from_millis)
    }

    /// Poll interval of the stop request watchers.
    #[must_use]
    pub fn stop_request_poll(&self) -> Duration {
        self.stop_request_poll_ms
            .map_or(DEFAULT_WATCHER_DELAY, Duration::from_millis)
    }

    /// Interpreter used for the web server and compute engine.
    #[must_use]
    pub fn java_path(&self) -> PathBuf {
        self.java_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JAVA_PATH))
    }

    /// JVM options configured for a process kind.
    #[must_use]
    pub fn java_opts(&self, kind: ProcessKind) -> Vec<String> {
        let raw = match kind {
            ProcessKind::WebServer => self.web_java_opts.as_deref().unwrap_or(DEFAULT_WEB_JAVA_OPTS),
            ProcessKind::ComputeEngine => {
                self.ce_java_opts.as_deref().unwrap_or(DEFAULT_CE_JAVA_OPTS)
            }
            ProcessKind::Elasticsearch => self
                .search_java_opts
                .as_deref()
                .unwrap_or(DEFAULT_SEARCH_JAVA_OPTS),
            ProcessKind::App => "",
        };
        raw.split_whitespace().map(str::to_owned).collect()
    }

    /// Host of the search engine HTTP endpoint.
    #[must_use]
    pub fn search_host(&self) -> &str {
        self.search_host.as_deref().unwrap_or(DEFAULT_SEARCH_HOST)
    }

    /// Port of the search engine HTTP endpoint.
    #[must_use]
    pub fn search_port(&self) -> u16 {
        self.search_port.unwrap_or(DEFAULT_SEARCH_PORT)
    }

    /// Returns `true` when search engine security material must be installed.
    #[must_use]
    pub fn search_security_enabled(&self) -> bool {
        self.search_password
            .as_deref()
            .is_some_and(|password| !password.is_empty())
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Tracing output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Resolved value of a protected property, rendered for comparison.
    ///
    /// Returns `None` for names outside [`PROTECTED_PROPERTIES`].
    #[must_use]
    pub fn protected_value(&self, property: &str) -> Option<String> {
        let paths = self.paths();
        let value = match property {
            "data_path" => paths.data().display().to_string(),
            "web_path" => paths.web().display().to_string(),
            "logs_path" => paths.logs().display().to_string(),
            "temp_path" => paths.temp().display().to_string(),
            "cluster_enabled" => self.cluster_enabled().to_string(),
            _ => return None,
        };
        Some(value)
    }
}
