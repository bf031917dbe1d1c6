//! Detaches a listener or relay from its terminal.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use daemonize_me::{Daemon, DaemonError};
use ddbus_config::RuntimePaths;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;
use super::launch::ServingRole;

/// Moves the serving process into the background.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process that will serve `role`. Runtime files live in
    /// `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonizeError`] when the process cannot detach.
    fn daemonize(&self, role: &ServingRole, paths: &RuntimePaths) -> Result<(), DaemonizeError>;
}

/// Errors surfaced while detaching.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The console log could not be opened.
    #[error("cannot open console log '{path}': {source}")]
    ConsoleLog {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Forking or detaching failed.
    #[error("cannot detach {role}: {source}")]
    Detach {
        /// What the process was about to serve.
        role: String,
        /// Underlying daemonisation error.
        #[source]
        source: DaemonError,
    },
}

/// Detaches with `daemonize-me`, keeping stdout and stderr in the console
/// log beside the other runtime files.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, role: &ServingRole, paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        let console = paths.console_path();
        let stdout = open_console_log(console)?;
        let stderr = stdout
            .try_clone()
            .map_err(|source| DaemonizeError::ConsoleLog {
                path: console.to_path_buf(),
                source,
            })?;
        info!(
            target: PROCESS_TARGET,
            %role,
            runtime = %paths.runtime_dir().display(),
            console = %console.display(),
            "daemonising into background"
        );
        Daemon::new()
            .work_dir(paths.runtime_dir())
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .stdout(stdout)
            .stderr(stderr)
            .start()
            .map_err(|source| DaemonizeError::Detach {
                role: role.to_string(),
                source,
            })?;
        info!(target: PROCESS_TARGET, %role, "detached; serving from the background");
        Ok(())
    }
}

fn open_console_log(path: &Path) -> Result<File, DaemonizeError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .map_err(|source| DaemonizeError::ConsoleLog {
            path: path.to_path_buf(),
            source,
        })
}
