//! File-backed IPC flag store shared by the supervisor and its children.
//!
//! One file holds a fixed-size slot per [`ProcessKind::ipc_index`]. Each slot
//! is a handful of flag bytes; a flag is set when its byte equals
//! [`FLAG_SET`]. Both sides poll the flags at a fixed interval, which works
//! for any child process able to read and write a plain file.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use warden_types::ProcessKind;

use super::PROCESS_TARGET;

/// Number of slots in the store; indexes above the last kind are reserved.
pub const MAX_SLOTS: usize = 5;

/// Bytes reserved per slot.
pub const SLOT_SIZE: u64 = 16;

/// Value of a raised flag byte.
pub const FLAG_SET: u8 = 0xFF;

const FLAG_CLEARED: u8 = 0x00;

/// Flags addressable inside a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// The process reported itself ready to serve.
    Operational = 0,
    /// A graceful stop was requested.
    AskForStop = 1,
    /// A hard stop was requested.
    AskForHardStop = 2,
    /// The process asked the supervisor for a node restart.
    AskForRestart = 3,
    /// The process attached to its slot.
    Up = 4,
}

/// Errors raised by the IPC flag store.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Opening or sizing the backing file failed.
    #[error("failed to open IPC file '{path}': {source}")]
    Open {
        /// Path of the backing file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading or writing a flag failed.
    #[error("failed to access IPC slot {index}: {source}")]
    Io {
        /// Slot index being accessed.
        index: usize,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The slot index lies outside the store.
    #[error("IPC slot {index} is out of range (max {max})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of slots in the store.
        max: usize,
    },
    /// The store was closed.
    #[error("IPC file has been closed")]
    Closed,
}

/// The whole flag store of one node.
#[derive(Debug)]
pub struct AllProcessesCommands {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AllProcessesCommands {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, IpcError> {
        let open_error = |source| IpcError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(open_error)?;
        let expected = SLOT_SIZE * MAX_SLOTS as u64;
        let length = file.metadata().map_err(open_error)?.len();
        if length < expected {
            file.set_len(expected).map_err(open_error)?;
        }
        debug!(
            target: PROCESS_TARGET,
            file = %path.display(),
            "IPC flag store opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Returns a handle addressing the slot of `index`.
    pub fn slot(self: &Arc<Self>, index: usize) -> Result<ProcessCommands, IpcError> {
        check_index(index)?;
        Ok(ProcessCommands {
            store: Arc::clone(self),
            index,
        })
    }

    /// Zeroes the slot of `index` and returns a handle to it.
    ///
    /// Called before launching a process so stale flags from a previous run
    /// cannot leak into the new one.
    pub fn create_after_clean(self: &Arc<Self>, index: usize) -> Result<ProcessCommands, IpcError> {
        let commands = self.slot(index)?;
        self.write_at(index, 0, &[FLAG_CLEARED; SLOT_SIZE as usize])?;
        Ok(commands)
    }

    /// Releases the backing file; subsequent reads report cleared flags.
    pub fn close(&self) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if file.take().is_some() {
            debug!(
                target: PROCESS_TARGET,
                file = %self.path.display(),
                "IPC flag store closed"
            );
        }
    }

    /// Returns `true` until [`AllProcessesCommands::close`] is called.
    pub fn is_open(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn read_flag(&self, index: usize, flag: Flag) -> Result<bool, IpcError> {
        let guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = guard.as_ref() else {
            return Err(IpcError::Closed);
        };
        let mut byte = [FLAG_CLEARED; 1];
        file.read_exact_at(&mut byte, offset(index, flag))
            .map_err(|source| IpcError::Io { index, source })?;
        Ok(byte == [FLAG_SET])
    }

    fn write_flag(&self, index: usize, flag: Flag, value: bool) -> Result<(), IpcError> {
        let byte = if value { FLAG_SET } else { FLAG_CLEARED };
        self.write_at(index, flag as u64, &[byte])
    }

    fn write_at(&self, index: usize, relative: u64, bytes: &[u8]) -> Result<(), IpcError> {
        let guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = guard.as_ref() else {
            return Err(IpcError::Closed);
        };
        file.write_all_at(bytes, index as u64 * SLOT_SIZE + relative)
            .map_err(|source| IpcError::Io { index, source })
    }
}

impl Drop for AllProcessesCommands {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_index(index: usize) -> Result<(), IpcError> {
    if index >= MAX_SLOTS {
        return Err(IpcError::IndexOutOfRange {
            index,
            max: MAX_SLOTS,
        });
    }
    Ok(())
}

fn offset(index: usize, flag: Flag) -> u64 {
    index as u64 * SLOT_SIZE + flag as u64
}

/// Flag accessors for the slot of one process.
#[derive(Debug, Clone)]
pub struct ProcessCommands {
    store: Arc<AllProcessesCommands>,
    index: usize,
}

impl ProcessCommands {
    /// Slot index addressed by this handle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Process kind owning the slot, when the index maps to one.
    pub fn kind(&self) -> Option<ProcessKind> {
        ProcessKind::from_ipc_index(self.index)
    }

    fn get(&self, flag: Flag) -> bool {
        match self.store.read_flag(self.index, flag) {
            Ok(value) => value,
            Err(IpcError::Closed) => false,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    index = self.index,
                    ?flag,
                    error = %error,
                    "failed to read IPC flag"
                );
                false
            }
        }
    }

    fn set(&self, flag: Flag, value: bool) {
        if let Err(error) = self.store.write_flag(self.index, flag, value) {
            warn!(
                target: PROCESS_TARGET,
                index = self.index,
                ?flag,
                error = %error,
                "failed to write IPC flag"
            );
        }
    }

    /// Whether the process reported itself operational.
    pub fn is_operational(&self) -> bool {
        self.get(Flag::Operational)
    }

    /// Marks the process operational.
    pub fn set_operational(&self) {
        self.set(Flag::Operational, true);
    }

    /// Whether the process attached to its slot.
    pub fn is_up(&self) -> bool {
        self.get(Flag::Up)
    }

    /// Marks the process attached.
    pub fn set_up(&self) {
        self.set(Flag::Up, true);
    }

    /// Requests a graceful stop.
    pub fn ask_for_stop(&self) {
        self.set(Flag::AskForStop, true);
    }

    /// Whether a graceful stop was requested.
    pub fn asked_for_stop(&self) -> bool {
        self.get(Flag::AskForStop)
    }

    /// Requests a hard stop.
    pub fn ask_for_hard_stop(&self) {
        self.set(Flag::AskForHardStop, true);
    }

    /// Whether a hard stop was requested.
    pub fn asked_for_hard_stop(&self) -> bool {
        self.get(Flag::AskForHardStop)
    }

    /// Requests a node restart.
    pub fn ask_for_restart(&self) {
        self.set(Flag::AskForRestart, true);
    }

    /// Whether a node restart was requested.
    pub fn asked_for_restart(&self) -> bool {
        self.get(Flag::AskForRestart)
    }

    /// Clears a pending restart request once the supervisor has seen it.
    pub fn acknowledge_ask_for_restart(&self) {
        self.set(Flag::AskForRestart, false);
    }
}
