//! Search engine specifics: installation layout, health probe, and keystore.
//!
//! The search engine does not read the IPC flag store. Readiness is probed
//! over its HTTP cluster health endpoint, and stop requests are delivered
//! as `SIGTERM`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use warden_config::Config;
use warden_types::ProcessKind;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::managed::{ChildProcess, ManagedProcess};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const BOOTSTRAP_USER: &str = "elastic";
const BOOTSTRAP_PASSWORD_KEY: &str = "bootstrap.password";
const KEYSTORE_FILE_NAME: &str = "http-keystore.p12";
const TRUSTSTORE_FILE_NAME: &str = "http-truststore.p12";

/// Errors raised by the search engine health connector.
#[derive(Debug, Error)]
pub enum EsConnectorError {
    /// Building the HTTP client failed.
    #[error("failed to build the health client: {0}")]
    Client(#[source] reqwest::Error),
    /// The health request failed.
    #[error("cluster health request failed: {0}")]
    Request(#[source] reqwest::Error),
}

/// Cluster health as reported by the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    /// Every shard is allocated.
    Green,
    /// Primaries are allocated; replicas are missing.
    Yellow,
    /// Some primaries are unallocated.
    Red,
}

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: ClusterStatus,
}

/// Source of search engine cluster health.
pub trait EsConnector: Send + Sync {
    /// Fetches the current cluster status.
    fn cluster_status(&self) -> Result<ClusterStatus, EsConnectorError>;
}

/// Connector querying `/_cluster/health` over HTTP.
#[derive(Debug)]
pub struct HttpEsConnector {
    client: reqwest::blocking::Client,
    url: String,
    password: Option<String>,
}

impl HttpEsConnector {
    /// Builds a connector for the search engine described by `installation`.
    ///
    /// HTTPS is used when an HTTP keystore is installed; the node-local
    /// certificate is not verified.
    pub fn for_installation(installation: &EsInstallation) -> Result<Self, EsConnectorError> {
        let security = installation.security();
        let tls = security.is_some_and(|security| security.keystore.is_some());
        let client = reqwest::blocking::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .danger_accept_invalid_certs(tls)
            .build()
            .map_err(EsConnectorError::Client)?;
        let scheme = if tls { "https" } else { "http" };
        Ok(Self {
            client,
            url: format!(
                "{scheme}://{}:{}/_cluster/health",
                installation.host(),
                installation.port()
            ),
            password: security.map(|security| security.password.clone()),
        })
    }
}

impl EsConnector for HttpEsConnector {
    fn cluster_status(&self) -> Result<ClusterStatus, EsConnectorError> {
        let mut request = self.client.get(&self.url);
        if let Some(password) = &self.password {
            request = request.basic_auth(BOOTSTRAP_USER, Some(password));
        }
        let health: ClusterHealth = request
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::json)
            .map_err(EsConnectorError::Request)?;
        Ok(health.status)
    }
}

/// Search engine child process.
pub struct EsManagedProcess {
    child: ChildProcess,
    connector: Box<dyn EsConnector>,
    operational: AtomicBool,
}

impl EsManagedProcess {
    pub(super) fn new(child: ChildProcess, connector: Box<dyn EsConnector>) -> Self {
        Self {
            child,
            connector,
            operational: AtomicBool::new(false),
        }
    }

    fn terminate(&self) {
        let Ok(raw) = i32::try_from(self.child.pid()) else {
            return;
        };
        if let Err(errno) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(
                target: PROCESS_TARGET,
                process = %ProcessKind::Elasticsearch,
                error = %errno,
                "failed to signal search engine"
            );
        }
    }
}

impl ManagedProcess for EsManagedProcess {
    fn is_alive(&self) -> bool {
        self.child.is_alive()
    }

    fn destroy_forcibly(&self) {
        self.child.kill();
    }

    fn is_operational(&self) -> bool {
        if self.operational.load(Ordering::SeqCst) {
            return true;
        }
        match self.connector.cluster_status() {
            Ok(ClusterStatus::Green | ClusterStatus::Yellow) => {
                self.operational.store(true, Ordering::SeqCst);
                true
            }
            Ok(ClusterStatus::Red) => false,
            Err(error) => {
                debug!(
                    target: PROCESS_TARGET,
                    process = %ProcessKind::Elasticsearch,
                    error = %error,
                    "search engine not reachable yet"
                );
                false
            }
        }
    }

    fn ask_for_stop(&self) {
        self.terminate();
    }

    fn ask_for_hard_stop(&self) {
        self.terminate();
    }

    fn asked_for_restart(&self) -> bool {
        false
    }

    fn acknowledge_ask_for_restart(&self) {}
}

/// Store file and its password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFile {
    /// Location of the source store.
    pub path: PathBuf,
    /// Password protecting the store.
    pub password: Option<String>,
}

/// Security material installed next to the search engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsSecurity {
    /// Bootstrap password of the built-in user.
    pub password: String,
    /// HTTP keystore copied into the configuration directory.
    pub keystore: Option<StoreFile>,
    /// HTTP truststore copied into the configuration directory.
    pub truststore: Option<StoreFile>,
}

/// Files and settings the search engine is launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsInstallation {
    home: PathBuf,
    conf_dir: PathBuf,
    data_dir: PathBuf,
    logs_dir: PathBuf,
    host: String,
    port: u16,
    node_name: String,
    jvm_options: Vec<String>,
    security: Option<EsSecurity>,
}

impl EsInstallation {
    /// Derives the installation from the node configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let paths = config.paths();
        let security = config.search_security_enabled().then(|| EsSecurity {
            password: config.search_password.clone().unwrap_or_default(),
            keystore: config.search_keystore_path.clone().map(|path| StoreFile {
                path,
                password: config.search_keystore_password.clone(),
            }),
            truststore: config.search_truststore_path.clone().map(|path| StoreFile {
                path,
                password: config.search_truststore_password.clone(),
            }),
        });
        Self {
            home: paths.home().join("elasticsearch"),
            conf_dir: paths.search_conf_dir(),
            data_dir: paths.data().join("es"),
            logs_dir: paths.logs().to_path_buf(),
            host: config.search_host().to_owned(),
            port: config.search_port(),
            node_name: config.node_name().to_owned(),
            jvm_options: config.java_opts(ProcessKind::Elasticsearch),
            security,
        }
    }

    /// Search engine distribution directory.
    pub fn home(&self) -> &Path {
        self.home.as_path()
    }

    /// Scratch configuration directory, recreated on every launch.
    pub fn conf_dir(&self) -> &Path {
        self.conf_dir.as_path()
    }

    /// HTTP host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// HTTP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Security material, when enabled.
    pub fn security(&self) -> Option<&EsSecurity> {
        self.security.as_ref()
    }

    /// Path of the search engine launcher script.
    pub fn executable(&self) -> PathBuf {
        self.home.join("bin").join("elasticsearch")
    }

    fn keystore_tool(&self) -> PathBuf {
        self.home.join("bin").join("elasticsearch-keystore")
    }

    /// Recreates the configuration directory and writes derived files.
    pub(super) fn prepare(&self) -> Result<(), LaunchError> {
        let prepare_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| LaunchError::Prepare {
                kind: ProcessKind::Elasticsearch,
                path,
                source,
            }
        };
        match fs::remove_dir_all(&self.conf_dir) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                return Err(prepare_error(&self.conf_dir)(error));
            }
            _ => {}
        }
        fs::create_dir_all(&self.conf_dir).map_err(prepare_error(&self.conf_dir))?;
        fs::create_dir_all(&self.data_dir).map_err(prepare_error(&self.data_dir))?;

        let files = [
            ("elasticsearch.yml", self.render_settings()),
            ("jvm.options", self.render_jvm_options()),
            ("log4j2.properties", self.render_log_settings()),
        ];
        for (name, content) in files {
            let path = self.conf_dir.join(name);
            fs::write(&path, content).map_err(prepare_error(&path))?;
        }
        if let Some(security) = &self.security {
            for (store, name) in [
                (&security.keystore, KEYSTORE_FILE_NAME),
                (&security.truststore, TRUSTSTORE_FILE_NAME),
            ] {
                if let Some(store) = store {
                    let target = self.conf_dir.join(name);
                    fs::copy(&store.path, &target).map_err(prepare_error(&store.path))?;
                }
            }
        }
        info!(
            target: PROCESS_TARGET,
            process = %ProcessKind::Elasticsearch,
            conf_dir = %self.conf_dir.display(),
            "search engine configuration written"
        );
        Ok(())
    }

    fn render_settings(&self) -> String {
        let mut lines = vec![
            format!("node.name: {}", self.node_name),
            format!("path.data: {}", self.data_dir.display()),
            format!("path.logs: {}", self.logs_dir.display()),
            format!("network.host: {}", self.host),
            format!("http.port: {}", self.port),
            "discovery.type: single-node".to_owned(),
            "action.auto_create_index: false".to_owned(),
        ];
        match &self.security {
            Some(security) => {
                lines.push("xpack.security.enabled: true".to_owned());
                if security.keystore.is_some() {
                    lines.push("xpack.security.http.ssl.enabled: true".to_owned());
                    lines.push(format!(
                        "xpack.security.http.ssl.keystore.path: {KEYSTORE_FILE_NAME}"
                    ));
                }
                if security.truststore.is_some() {
                    lines.push(format!(
                        "xpack.security.http.ssl.truststore.path: {TRUSTSTORE_FILE_NAME}"
                    ));
                }
            }
            None => lines.push("xpack.security.enabled: false".to_owned()),
        }
        lines.join("\n") + "\n"
    }

    fn render_jvm_options(&self) -> String {
        let mut content = self.jvm_options.join("\n");
        content.push('\n');
        content
    }

    fn render_log_settings(&self) -> String {
        [
            "status = error",
            "appender.console.type = Console",
            "appender.console.name = console",
            "appender.console.layout.type = PatternLayout",
            "appender.console.layout.pattern = %d{yyyy.MM.dd HH:mm:ss} %-5p es[][%c{1.}] %m%n",
            "rootLogger.level = info",
            "rootLogger.appenderRef.console.ref = console",
        ]
        .join("\n")
            + "\n"
    }

    /// Stores the bootstrap password and store passwords in the keystore.
    pub(super) fn install_secrets(&self) -> Result<(), LaunchError> {
        let Some(security) = &self.security else {
            return Ok(());
        };
        self.run_keystore(&["create"], None)?;
        self.run_keystore(
            &["add", "-x", "-f", BOOTSTRAP_PASSWORD_KEY],
            Some(&security.password),
        )?;
        let stores = [
            (
                &security.keystore,
                "xpack.security.http.ssl.keystore.secure_password",
            ),
            (
                &security.truststore,
                "xpack.security.http.ssl.truststore.secure_password",
            ),
        ];
        for (store, key) in stores {
            if let Some(password) = store.as_ref().and_then(|store| store.password.as_deref()) {
                self.run_keystore(&["add", "-x", "-f", key], Some(password))?;
            }
        }
        Ok(())
    }

    fn run_keystore(&self, args: &[&str], secret: Option<&str>) -> Result<(), LaunchError> {
        let keystore_error = |message: String| LaunchError::Keystore {
            kind: ProcessKind::Elasticsearch,
            message,
        };
        let step = args.first().copied().unwrap_or_default();
        let mut child = Command::new(self.keystore_tool())
            .args(args)
            .env("ES_PATH_CONF", &self.conf_dir)
            .stdin(if secret.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| keystore_error(format!("failed to run '{step}': {error}")))?;
        if let (Some(secret), Some(mut stdin)) = (secret, child.stdin.take())
            && let Err(error) = stdin.write_all(secret.as_bytes())
        {
            warn!(
                target: PROCESS_TARGET,
                process = %ProcessKind::Elasticsearch,
                step,
                error = %error,
                "failed to pass secret to keystore tool"
            );
        }
        let output = child
            .wait_with_output()
            .map_err(|error| keystore_error(format!("'{step}' did not complete: {error}")))?;
        if output.status.success() {
            debug!(
                target: PROCESS_TARGET,
                process = %ProcessKind::Elasticsearch,
                step,
                "keystore step completed"
            );
            return Ok(());
        }
        Err(keystore_error(format!(
            "'{step}' exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct ScriptedConnector {
        answers: Mutex<Vec<ClusterStatus>>,
    }

    impl EsConnector for ScriptedConnector {
        fn cluster_status(&self) -> Result<ClusterStatus, EsConnectorError> {
            let mut answers = self.answers.lock().expect("answers mutex poisoned");
            Ok(answers.pop().unwrap_or(ClusterStatus::Red))
        }
    }

    struct Node {
        dir: TempDir,
        config: Config,
    }

    #[fixture]
    fn node() -> Node {
        let dir = TempDir::new().expect("temp dir");
        let config = Config {
            home_path: Some(dir.path().to_path_buf()),
            search_port: Some(9123),
            ..Config::default()
        };
        Node { dir, config }
    }

    #[rstest]
    fn operational_once_status_is_yellow_and_then_cached() {
        let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        // Answers are popped from the back.
        let connector = ScriptedConnector {
            answers: Mutex::new(vec![
                ClusterStatus::Red,
                ClusterStatus::Yellow,
                ClusterStatus::Red,
            ]),
        };
        let process = EsManagedProcess::new(
            ChildProcess::new(ProcessKind::Elasticsearch, child),
            Box::new(connector),
        );

        assert!(!process.is_operational());
        assert!(process.is_operational());
        assert!(process.is_operational(), "operational status is cached");
        assert!(!process.asked_for_restart());

        process.ask_for_hard_stop();
        assert!(process.wait_for(Duration::from_secs(5)));
    }

    #[rstest]
    fn prepare_recreates_the_configuration_directory(node: Node) {
        let installation = EsInstallation::from_config(&node.config);
        fs::create_dir_all(installation.conf_dir()).expect("conf dir");
        let stale = installation.conf_dir().join("stale.yml");
        fs::write(&stale, "old").expect("stale file");

        installation.prepare().expect("prepare");

        assert!(!stale.exists());
        let settings = fs::read_to_string(installation.conf_dir().join("elasticsearch.yml"))
            .expect("settings");
        assert!(settings.contains("http.port: 9123"));
        assert!(settings.contains("xpack.security.enabled: false"));
        assert!(installation.conf_dir().join("jvm.options").is_file());
        assert!(installation.conf_dir().join("log4j2.properties").is_file());
        assert!(installation.conf_dir().starts_with(node.dir.path()));
    }

    #[rstest]
    fn security_copies_stores_into_the_configuration_directory(mut node: Node) {
        let keystore = node.dir.path().join("source.p12");
        fs::write(&keystore, b"store").expect("keystore");
        node.config.search_password = Some("s3cret".to_owned());
        node.config.search_keystore_path = Some(keystore);
        let installation = EsInstallation::from_config(&node.config);

        installation.prepare().expect("prepare");

        let copied = installation.conf_dir().join(KEYSTORE_FILE_NAME);
        assert_eq!(fs::read(copied).expect("copied keystore"), b"store");
        let settings = fs::read_to_string(installation.conf_dir().join("elasticsearch.yml"))
            .expect("settings");
        assert!(settings.contains("xpack.security.http.ssl.enabled: true"));
    }

    #[rstest]
    fn missing_keystore_tool_reports_a_keystore_error(mut node: Node) {
        node.config.search_password = Some("s3cret".to_owned());
        let installation = EsInstallation::from_config(&node.config);
        installation.prepare().expect("prepare");

        let error = installation.install_secrets().expect_err("tool is missing");
        assert!(matches!(error, LaunchError::Keystore { .. }));
        assert_eq!(error.kind(), ProcessKind::Elasticsearch);
    }
}
