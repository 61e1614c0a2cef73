use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Role played by a node when clustering is enabled.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum NodeType {
    /// Runs the web server and compute engine against a remote search cluster.
    #[default]
    Application,
    /// Runs only the search engine.
    Search,
}
