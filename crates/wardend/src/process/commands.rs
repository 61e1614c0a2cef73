//! Launch specifications of the supervised processes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use warden_config::Config;
use warden_types::ProcessKind;

use super::es::EsInstallation;

/// Argument telling the web server whether it performs first-time setup.
pub const STARTUP_LEADER_ARGUMENT: &str = "process.startupLeader";

/// Argument carrying the IPC slot index of the launched process.
pub const PROCESS_INDEX_ARGUMENT: &str = "process.index";

/// Argument carrying the location of the IPC flag store.
pub const SHARED_PATH_ARGUMENT: &str = "process.sharedDir";

/// Environment variables never inherited by child processes.
pub const SUPPRESSED_ENVIRONMENT: [&str; 2] = ["JAVA_TOOL_OPTIONS", "_JAVA_OPTIONS"];

const WEB_ENTRY_POINT: &str = "org.warden.server.app.WebServer";
const CE_ENTRY_POINT: &str = "org.warden.ce.app.CeServer";

/// Everything needed to spawn one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    kind: ProcessKind,
    executable: PathBuf,
    work_dir: PathBuf,
    options: Vec<String>,
    classpath: Vec<PathBuf>,
    entry_point: Option<String>,
    arguments: BTreeMap<String, String>,
    arguments_file: bool,
    environment: BTreeMap<String, String>,
    suppressed_environment: Vec<String>,
    search: Option<EsInstallation>,
}

impl LaunchCommand {
    /// Starts a command for `kind` running `executable` inside `work_dir`.
    #[must_use]
    pub fn new(kind: ProcessKind, executable: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            executable: executable.into(),
            work_dir: work_dir.into(),
            options: Vec::new(),
            classpath: Vec::new(),
            entry_point: None,
            arguments: BTreeMap::new(),
            arguments_file: false,
            environment: BTreeMap::new(),
            suppressed_environment: Vec::new(),
            search: None,
        }
    }

    /// Appends interpreter options.
    #[must_use]
    pub fn with_options(mut self, options: impl IntoIterator<Item = String>) -> Self {
        self.options.extend(options);
        self
    }

    /// Appends a classpath entry.
    #[must_use]
    pub fn with_classpath(mut self, entry: impl Into<PathBuf>) -> Self {
        self.classpath.push(entry.into());
        self
    }

    /// Sets the class started by the interpreter.
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Adds a `key=value` program argument.
    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.arguments.insert(key.into(), value.to_string());
        self
    }

    /// Passes program arguments through a temporary file instead of argv.
    #[must_use]
    pub fn with_arguments_file(mut self, enabled: bool) -> Self {
        self.arguments_file = enabled;
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Removes a variable from the inherited environment.
    #[must_use]
    pub fn suppress_env(mut self, key: impl Into<String>) -> Self {
        self.suppressed_environment.push(key.into());
        self
    }

    /// Attaches the search engine installation prepared before launch.
    #[must_use]
    pub fn with_search_installation(mut self, installation: EsInstallation) -> Self {
        self.search = Some(installation);
        self
    }

    /// Process kind.
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Program started by the launcher.
    pub fn executable(&self) -> &Path {
        self.executable.as_path()
    }

    /// Working directory of the child.
    pub fn work_dir(&self) -> &Path {
        self.work_dir.as_path()
    }

    /// Value of one program argument.
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }

    /// Every program argument, sorted by key.
    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }

    /// Returns `true` when arguments travel through a temporary file.
    pub fn uses_arguments_file(&self) -> bool {
        self.arguments_file
    }

    /// Environment set on the child.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Environment removed from the child.
    pub fn suppressed_environment(&self) -> &[String] {
        &self.suppressed_environment
    }

    /// Search engine installation, for search engine commands.
    pub fn search_installation(&self) -> Option<&EsInstallation> {
        self.search.as_ref()
    }

    /// Arguments passed after the executable.
    ///
    /// `arguments_path` replaces the `key=value` arguments when the command
    /// uses an arguments file.
    #[must_use]
    pub fn argv(&self, arguments_path: Option<&Path>) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self.options.iter().map(OsString::from).collect();
        if !self.classpath.is_empty() {
            argv.push(OsString::from("-cp"));
            argv.push(join_classpath(&self.classpath));
        }
        if let Some(entry_point) = &self.entry_point {
            argv.push(OsString::from(entry_point));
        }
        match arguments_path {
            Some(path) if self.arguments_file => argv.push(path.as_os_str().to_owned()),
            _ => argv.extend(
                self.arguments
                    .iter()
                    .map(|(key, value)| OsString::from(format!("{key}={value}"))),
            ),
        }
        argv
    }

    /// Content of the arguments file, one `key=value` pair per line.
    #[must_use]
    pub fn arguments_file_content(&self) -> String {
        self.arguments
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }
}

fn join_classpath(entries: &[PathBuf]) -> OsString {
    let mut joined = OsString::new();
    for (position, entry) in entries.iter().enumerate() {
        if position > 0 {
            joined.push(":");
        }
        joined.push(entry.as_os_str());
    }
    joined
}

/// Builds the launch specification of each supervised process.
pub trait CommandFactory: Send + Sync {
    /// Command of the search engine.
    fn create_es_command(&self, config: &Config) -> LaunchCommand;

    /// Command of the web server; `first_start` selects first-time setup.
    fn create_web_command(&self, config: &Config, first_start: bool) -> LaunchCommand;

    /// Command of the compute engine.
    fn create_ce_command(&self, config: &Config) -> LaunchCommand;
}

/// Factory producing the standard layout of a warden installation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCommandFactory;

impl DefaultCommandFactory {
    /// Builds a factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn java_command(config: &Config, kind: ProcessKind, jar: &str, entry_point: &str) -> LaunchCommand {
        let paths = config.paths();
        let base = LaunchCommand::new(kind, config.java_path(), paths.home())
            .with_options(config.java_opts(kind))
            .with_options([format!("-Djava.io.tmpdir={}", paths.temp().display())])
            .with_classpath(paths.home().join("lib").join(jar))
            .with_entry_point(entry_point)
            .with_arguments_file(true)
            .with_argument(PROCESS_INDEX_ARGUMENT, kind.ipc_index())
            .with_argument(SHARED_PATH_ARGUMENT, paths.temp().display())
            .with_argument("path.home", paths.home().display())
            .with_argument("path.data", paths.data().display())
            .with_argument("path.logs", paths.logs().display())
            .with_argument("path.temp", paths.temp().display())
            .with_argument("path.web", paths.web().display())
            .with_argument("search.host", config.search_host())
            .with_argument("search.port", config.search_port());
        SUPPRESSED_ENVIRONMENT
            .into_iter()
            .fold(base, LaunchCommand::suppress_env)
    }
}

impl CommandFactory for DefaultCommandFactory {
    fn create_es_command(&self, config: &Config) -> LaunchCommand {
        let installation = EsInstallation::from_config(config);
        let base = LaunchCommand::new(
            ProcessKind::Elasticsearch,
            installation.executable(),
            installation.home(),
        )
        .with_env("ES_PATH_CONF", installation.conf_dir().display().to_string())
        .with_env("ES_TMPDIR", config.paths().temp().display().to_string())
        .suppress_env("ES_JAVA_OPTS");
        SUPPRESSED_ENVIRONMENT
            .into_iter()
            .fold(base, LaunchCommand::suppress_env)
            .with_search_installation(installation)
    }

    fn create_web_command(&self, config: &Config, first_start: bool) -> LaunchCommand {
        Self::java_command(
            config,
            ProcessKind::WebServer,
            "warden-web.jar",
            WEB_ENTRY_POINT,
        )
        .with_argument(STARTUP_LEADER_ARGUMENT, first_start)
    }

    fn create_ce_command(&self, config: &Config) -> LaunchCommand {
        Self::java_command(
            config,
            ProcessKind::ComputeEngine,
            "warden-ce.jar",
            CE_ENTRY_POINT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> Config {
        Config {
            home_path: Some(PathBuf::from("/opt/warden")),
            web_java_opts: Some("-Xmx1g".to_owned()),
            ..Config::default()
        }
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn web_command_carries_the_startup_mode(config: Config, #[case] first_start: bool) {
        let command = DefaultCommandFactory::new().create_web_command(&config, first_start);
        assert_eq!(command.kind(), ProcessKind::WebServer);
        assert_eq!(
            command.argument(STARTUP_LEADER_ARGUMENT),
            Some(first_start.to_string().as_str())
        );
        assert_eq!(command.argument(PROCESS_INDEX_ARGUMENT), Some("2"));
        assert!(command.uses_arguments_file());
    }

    #[rstest]
    fn argv_places_options_before_the_entry_point(config: Config) {
        let command = DefaultCommandFactory::new().create_web_command(&config, false);
        let arguments_path = Path::new("/opt/warden/temp/web-args.properties");
        let argv = command.argv(Some(arguments_path));

        assert_eq!(argv.first().map(OsString::as_os_str), Some(OsStr::new("-Xmx1g")));
        let cp = argv.iter().position(|arg| arg == "-cp").expect("classpath flag");
        assert_eq!(
            argv.get(cp + 1).map(OsString::as_os_str),
            Some(OsStr::new("/opt/warden/lib/warden-web.jar"))
        );
        assert_eq!(
            argv.get(cp + 2).map(OsString::as_os_str),
            Some(OsStr::new(WEB_ENTRY_POINT))
        );
        assert_eq!(argv.last().map(OsString::as_os_str), Some(arguments_path.as_os_str()));
    }

    #[rstest]
    fn inline_arguments_are_used_without_a_file() {
        let command = LaunchCommand::new(ProcessKind::ComputeEngine, "/bin/true", "/")
            .with_argument("b", 2)
            .with_argument("a", 1);
        let argv = command.argv(None);
        assert_eq!(argv, vec![OsString::from("a=1"), OsString::from("b=2")]);
        assert_eq!(command.arguments_file_content(), "a=1\nb=2\n");
    }

    #[rstest]
    fn search_command_points_at_the_scratch_configuration(config: Config) {
        let command = DefaultCommandFactory::new().create_es_command(&config);
        let installation = command.search_installation().expect("installation");
        assert_eq!(
            command.environment().get("ES_PATH_CONF").map(String::as_str),
            Some("/opt/warden/temp/conf/es")
        );
        assert_eq!(command.executable(), installation.executable());
        assert!(
            command
                .suppressed_environment()
                .iter()
                .any(|name| name == "JAVA_TOOL_OPTIONS")
        );
        assert!(!command.uses_arguments_file());
    }
}
