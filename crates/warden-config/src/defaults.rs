use std::time::Duration;

use crate::logging::LogFormat;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Poll interval used by process watchers and stop request watchers.
pub const DEFAULT_WATCHER_DELAY: Duration = Duration::from_millis(500);

/// Graceful stop budget granted to the compute engine.
pub const DEFAULT_CE_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Graceful stop budget granted to the web server.
pub const DEFAULT_WEB_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Graceful stop budget granted to the search engine.
pub const DEFAULT_SEARCH_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default HTTP port of the search engine.
pub const DEFAULT_SEARCH_PORT: u16 = 9001;

/// Default host of the search engine.
pub const DEFAULT_SEARCH_HOST: &str = "127.0.0.1";

/// Default host name advertised by this node in cluster mode.
pub const DEFAULT_NODE_HOST: &str = "127.0.0.1";

/// Default node name used when none is configured.
pub const DEFAULT_NODE_NAME: &str = "warden";

/// Interpreter used to launch the web server and compute engine.
pub const DEFAULT_JAVA_PATH: &str = "java";

/// Default JVM options of the web server.
pub const DEFAULT_WEB_JAVA_OPTS: &str = "-Xmx512m -Xms128m -XX:+HeapDumpOnOutOfMemoryError";

/// Default JVM options of the compute engine.
pub const DEFAULT_CE_JAVA_OPTS: &str = "-Xmx512m -Xms128m -XX:+HeapDumpOnOutOfMemoryError";

/// Default JVM options of the search engine.
pub const DEFAULT_SEARCH_JAVA_OPTS: &str = "-Xmx512m -Xms512m -XX:MaxDirectMemorySize=256m";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
