//! Child process launch, monitoring, and signalling.

mod commands;
mod errors;
mod es;
mod handler;
mod handler_lifecycle;
pub mod ipc;
mod launcher;
mod managed;

pub use commands::{
    CommandFactory, DefaultCommandFactory, LaunchCommand, PROCESS_INDEX_ARGUMENT,
    SHARED_PATH_ARGUMENT, STARTUP_LEADER_ARGUMENT, SUPPRESSED_ENVIRONMENT,
};
pub use errors::LaunchError;
pub use es::{
    ClusterStatus, EsConnector, EsConnectorError, EsInstallation, EsManagedProcess, EsSecurity,
    HttpEsConnector, StoreFile,
};
pub use handler::{
    DEFAULT_HARD_STOP_TIMEOUT, ManagedProcessHandler, ManagedProcessHandlerBuilder, ProcessEvent,
    ProcessEventListener, ProcessSupplier,
};
pub use handler_lifecycle::{ProcessLifecycleListener, ProcessState};
pub use launcher::{ProcessLauncher, SystemProcessLauncher};
pub use managed::{ManagedProcess, ProcessCommandsManagedProcess};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
