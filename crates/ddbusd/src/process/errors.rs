//! Reasons a listener or relay process fails to start or stops early.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTimeError;

use ddbus_config::{EndpointConflict, RuntimePathsError, SocketPreparationError};
use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::core::RouteError;
use crate::transport::TransportError;

use super::daemonizer::DaemonizeError;
use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising a listener or relay.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// The configured endpoints cannot be served together.
    #[error("conflicting endpoints: {source}")]
    Endpoints {
        /// Offending endpoint pair.
        #[source]
        source: EndpointConflict,
    },
    /// The Unix listen socket's directory could not be prepared.
    #[error("cannot prepare listen socket: {source}")]
    ListenSocket {
        /// Underlying filesystem error.
        #[source]
        source: SocketPreparationError,
    },
    /// The runtime directory could not be located or created.
    #[error("cannot locate runtime files: {source}")]
    RuntimePaths {
        /// Underlying path error.
        #[source]
        source: RuntimePathsError,
    },
    /// A lock, pid or health file could not be written or removed.
    #[error("failed to {action} '{path}': {source}")]
    RuntimeFile {
        /// What was being done to the file.
        action: FileAction,
        /// File concerned.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Another live process already serves the endpoint.
    #[error("endpoint is already served by ddbusd pid {pid}")]
    AlreadyServed {
        /// PID recorded by the serving process.
        pid: u32,
    },
    /// The recorded owner of the endpoint could not be checked.
    #[error("cannot tell whether pid {pid} still serves the endpoint: {source}")]
    OwnerCheck {
        /// PID recorded in the existing pid file.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Health was published before the pid file was written.
    #[error("pid must be written before updating health state")]
    MissingPid,
    /// Serialising the health snapshot failed.
    #[error("failed to serialise health snapshot: {source}")]
    HealthSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Obtaining the snapshot timestamp failed.
    #[error("failed to read system time: {source}")]
    Clock {
        /// Underlying system time error.
        #[source]
        source: SystemTimeError,
    },
    /// Detaching into the background failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Waiting for the stop signal failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// The listener core or its services could not be built.
    #[error("listener bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// A transport or the relay failed to start or stop.
    #[error("transport failed: {source}")]
    Transport {
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },
    /// The listener core rejected a transport.
    #[error("listener core failed: {source}")]
    Router {
        /// Underlying routing error.
        #[source]
        source: RouteError,
    },
    /// The relay's upstream listener went away while tools were served.
    #[error("relay lost its upstream listener {upstream}")]
    UpstreamLost {
        /// Upstream endpoint.
        upstream: String,
    },
}

/// Operation on a runtime file named by [`LaunchError::RuntimeFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Taking the single-instance lock.
    CreateLock,
    /// Clearing a file left by a dead process.
    RemoveStale,
    /// Recording the process id.
    WritePid,
    /// Publishing the health snapshot.
    WriteHealth,
}

impl fmt::Display for FileAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::CreateLock => "create lock file",
            Self::RemoveStale => "remove stale file",
            Self::WritePid => "write pid file",
            Self::WriteHealth => "write health snapshot",
        })
    }
}

impl LaunchError {
    /// Builds the error for a failed runtime file operation, for use with
    /// `map_err`.
    pub(super) fn runtime_file(
        action: FileAction,
        path: &Path,
    ) -> impl FnOnce(io::Error) -> Self + use<> {
        let path = path.to_path_buf();
        move |source| Self::RuntimeFile {
            action,
            path,
            source,
        }
    }
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<EndpointConflict> for LaunchError {
    fn from(source: EndpointConflict) -> Self {
        Self::Endpoints { source }
    }
}

impl From<SocketPreparationError> for LaunchError {
    fn from(source: SocketPreparationError) -> Self {
        Self::ListenSocket { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        Self::RuntimePaths { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<TransportError> for LaunchError {
    fn from(source: TransportError) -> Self {
        Self::Transport { source }
    }
}

impl From<RouteError> for LaunchError {
    fn from(source: RouteError) -> Self {
        match source {
            RouteError::Transport(source) => Self::Transport { source },
            other => Self::Router { source: other },
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::lock(FileAction::CreateLock, "failed to create lock file '/run/ddbusd.lock': denied")]
    #[case::stale(FileAction::RemoveStale, "failed to remove stale file '/run/ddbusd.lock': denied")]
    fn runtime_file_errors_name_the_action_and_file(
        #[case] action: FileAction,
        #[case] message: &str,
    ) {
        let error = LaunchError::runtime_file(action, Path::new("/run/ddbusd.lock"))(
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(error.to_string(), message);
    }

    #[test]
    fn transport_failures_inside_the_router_surface_as_transport_errors() {
        let error = LaunchError::from(RouteError::Transport(TransportError::UpstreamUnreachable {
            endpoint: "tcp://127.0.0.1:1".to_owned(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        }));
        assert!(matches!(error, LaunchError::Transport { .. }));
        assert!(
            error
                .to_string()
                .contains("failed to connect to upstream listener tcp://127.0.0.1:1")
        );
    }
}
