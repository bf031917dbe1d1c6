//! Locates the files a running listener or relay keeps beside its socket.
//!
//! A Unix endpoint keeps its files in the socket's directory, named after the
//! socket. TCP endpoints share a per-user runtime directory and name their
//! files after the port, so several processes can serve one host.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{Config, SocketEndpoint};

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Runtime files owned by the process serving one endpoint.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
    console_path: PathBuf,
}

impl RuntimePaths {
    /// Runtime files of the process serving the configured listen socket.
    ///
    /// # Errors
    ///
    /// See [`RuntimePaths::for_endpoint`].
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        Self::for_endpoint(config.listen_socket())
    }

    /// Runtime files of the process serving `endpoint`, creating their
    /// directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError`] when a Unix socket path names no
    /// directory or the directory cannot be created.
    pub fn for_endpoint(endpoint: &SocketEndpoint) -> Result<Self, RuntimePathsError> {
        let runtime_dir = match endpoint {
            SocketEndpoint::Unix { path } => path
                .parent()
                .filter(|parent| !parent.as_str().is_empty())
                .map(|parent| parent.as_std_path().to_path_buf())
                .ok_or_else(|| RuntimePathsError::MissingSocketParent {
                    path: path.to_string(),
                })?,
            SocketEndpoint::Tcp { .. } => shared_runtime_directory(),
        };
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        let stem = endpoint.runtime_stem();
        let file = |extension: &str| runtime_dir.join(format!("{stem}.{extension}"));
        Ok(Self {
            lock_path: file("lock"),
            pid_path: file("pid"),
            health_path: file("health"),
            console_path: file("log"),
            runtime_dir,
        })
    }

    /// Directory holding the runtime files.
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Lock file held while the endpoint is served.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// File recording the serving process id.
    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// JSON health snapshot.
    pub fn health_path(&self) -> &Path {
        &self.health_path
    }

    /// Receives standard output and error once the process detaches.
    pub fn console_path(&self) -> &Path {
        &self.console_path
    }
}

fn shared_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(dir) = runtime_dir() {
            return dir.join("ddbus");
        }
        env::temp_dir()
            .join("ddbus")
            .join(format!("uid-{}", unsafe { geteuid() }))
    }

    #[cfg(not(unix))]
    {
        env::temp_dir().join("ddbus")
    }
}

/// Errors raised while locating runtime files.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// The socket path lacked a parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingSocketParent { path: String },
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
