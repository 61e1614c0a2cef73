use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use super::RUNTIME_TARGET;

/// Callback run when a termination signal arrives.
pub type ShutdownAction = Box<dyn FnOnce() + Send>;

/// Abstraction over termination notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Arranges for `action` to run once shutdown is requested.
    fn listen(&self, action: ShutdownAction) -> Result<ShutdownListener, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Running listener returned by [`ShutdownSignal::listen`].
pub struct ShutdownListener {
    close: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl ShutdownListener {
    /// Listener owning no resources.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            close: None,
            thread: None,
        }
    }

    /// Builds a listener from its thread and a closure unblocking it.
    pub fn new(thread: JoinHandle<()>, close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            close: Some(Box::new(close)),
            thread: Some(thread),
        }
    }

    /// Stops listening and joins the listener thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: RUNTIME_TARGET, "shutdown listener panicked");
        }
    }
}

impl Drop for ShutdownListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Listener reacting to SIGTERM, SIGINT, SIGQUIT, and SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn listen(&self, action: ShutdownAction) -> Result<ShutdownListener, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("SignalListener".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(target: RUNTIME_TARGET, signal, "shutdown signal received");
                    action();
                }
            })
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(ShutdownListener::new(thread, move || handle.close()))
    }
}
