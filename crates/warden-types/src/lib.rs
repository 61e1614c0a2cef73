//! Shared identifiers for the processes cooperating inside one warden node.
//!
//! Every node runs the supervisor itself plus up to three child processes.
//! Each kind owns a fixed slot in the node's IPC flag store, addressed by
//! [`ProcessKind::ipc_index`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Roles of the processes that make up one running node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// The supervisor process.
    App,
    /// The search engine.
    Elasticsearch,
    /// The web server.
    WebServer,
    /// The background compute engine.
    ComputeEngine,
}

impl ProcessKind {
    /// Every kind, ordered by IPC index.
    pub const ALL: [Self; 4] = [
        Self::App,
        Self::Elasticsearch,
        Self::WebServer,
        Self::ComputeEngine,
    ];

    /// Kinds launched as child processes, in startup dependency order.
    pub const SUPERVISED: [Self; 3] = [Self::Elasticsearch, Self::WebServer, Self::ComputeEngine];

    /// Index of the slot reserved for this kind in the IPC flag store.
    #[must_use]
    pub const fn ipc_index(self) -> usize {
        match self {
            Self::App => 0,
            Self::Elasticsearch => 1,
            Self::WebServer => 2,
            Self::ComputeEngine => 3,
        }
    }

    /// Short stable key used in logs, file names, and thread names.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Elasticsearch => "es",
            Self::WebServer => "web",
            Self::ComputeEngine => "ce",
        }
    }

    /// Human-readable name used in operator-facing messages.
    #[must_use]
    pub const fn human_name(self) -> &'static str {
        match self {
            Self::App => "Warden",
            Self::Elasticsearch => "ElasticSearch",
            Self::WebServer => "Web Server",
            Self::ComputeEngine => "Compute Engine",
        }
    }

    /// Looks up a kind from its IPC index.
    #[must_use]
    pub fn from_ipc_index(index: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.ipc_index() == index)
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.key())
    }
}

/// Error returned when parsing a process kind fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported process kind: {0}")]
pub struct ProcessKindParseError(String);

impl ProcessKindParseError {
    /// Creates a parse error describing the unsupported value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the offending value that could not be parsed.
    #[must_use]
    pub fn value(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for ProcessKind {
    type Err = ProcessKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "app" => Ok(Self::App),
            "es" | "elasticsearch" | "search" => Ok(Self::Elasticsearch),
            "web" | "web_server" => Ok(Self::WebServer),
            "ce" | "compute_engine" => Ok(Self::ComputeEngine),
            other => Err(ProcessKindParseError::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProcessKind::App, 0)]
    #[case(ProcessKind::Elasticsearch, 1)]
    #[case(ProcessKind::WebServer, 2)]
    #[case(ProcessKind::ComputeEngine, 3)]
    fn ipc_indexes_are_stable(#[case] kind: ProcessKind, #[case] index: usize) {
        assert_eq!(kind.ipc_index(), index);
        assert_eq!(ProcessKind::from_ipc_index(index), Some(kind));
    }

    #[rstest]
    #[case("es", ProcessKind::Elasticsearch)]
    #[case(" Web ", ProcessKind::WebServer)]
    #[case("compute_engine", ProcessKind::ComputeEngine)]
    fn parses_known_keys(#[case] raw: &str, #[case] expected: ProcessKind) {
        assert_eq!(raw.parse::<ProcessKind>(), Ok(expected));
    }

    #[rstest]
    fn rejects_unknown_keys() {
        let error = "scanner"
            .parse::<ProcessKind>()
            .err()
            .map(|error| error.value().to_owned());
        assert_eq!(error.as_deref(), Some("scanner"));
    }

    #[rstest]
    fn display_round_trips_through_from_str() {
        for kind in ProcessKind::ALL {
            assert_eq!(kind.to_string().parse::<ProcessKind>(), Ok(kind));
        }
    }
}
