//! Endpoints a listener binds and a relay forwards to.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Stem of runtime files when the endpoint names none of its own.
const RUNTIME_STEM: &str = "ddbusd";

/// Address a listener binds or a relay connects to.
///
/// Endpoints are written as `unix:///path/to/socket` or `tcp://host:port` on
/// the command line and as tagged tables in configuration files.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Unix domain socket at a filesystem path.
    Unix { path: Utf8PathBuf },
    /// TCP socket on a host and port. Port 0 asks the OS for a free port.
    Tcp { host: String, port: u16 },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket path of a Unix endpoint.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_path()),
            Self::Tcp { .. } => None,
        }
    }

    /// Reports whether the endpoint lives on the local filesystem.
    #[must_use]
    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix { .. })
    }

    /// Reports whether binding both endpoints in one process would clash.
    ///
    /// TCP endpoints on the same fixed port clash when their hosts match or
    /// either binds every interface. Ephemeral ports never clash.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unix { path: left }, Self::Unix { path: right }) => left == right,
            (
                Self::Tcp {
                    host: left_host,
                    port: left_port,
                },
                Self::Tcp {
                    host: right_host,
                    port: right_port,
                },
            ) => {
                *left_port != 0
                    && left_port == right_port
                    && (left_host == right_host
                        || binds_every_interface(left_host)
                        || binds_every_interface(right_host))
            }
            _ => false,
        }
    }

    /// Base name of the lock, pid and health files of a process serving this
    /// endpoint.
    ///
    /// Unix sockets lend their file stem. TCP endpoints share one runtime
    /// directory, so their files carry the port.
    #[must_use]
    pub fn runtime_stem(&self) -> String {
        match self {
            Self::Unix { path } => path
                .file_stem()
                .filter(|stem| !stem.is_empty())
                .unwrap_or(RUNTIME_STEM)
                .to_owned(),
            Self::Tcp { port, .. } => format!("{RUNTIME_STEM}-{port}"),
        }
    }

    /// Creates the directory holding a Unix socket, readable only by its
    /// owner. TCP endpoints need no preparation.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the socket path has no parent
    /// or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .ok_or_else(|| SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            })?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        match builder.create(parent) {
            Err(source) if source.kind() != io::ErrorKind::AlreadyExists => {
                Err(SocketPreparationError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }
}

fn binds_every_interface(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" if url.path().is_empty() => {
                Err(SocketParseError::MissingUnixPath(input.to_owned()))
            }
            "unix" => Ok(Self::unix(url.path())),
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Scheme was neither `unix` nor `tcp`.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP host name was missing.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing from the address.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// Unix socket path was absent.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing the directory of a Unix listen socket.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path names no directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent { path: Utf8PathBuf },
    /// The socket directory could not be created.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Two configured endpoints would bind or forward to the same place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointConflict {
    /// The relay socket clashes with the listen socket.
    #[error("relay socket {relay} clashes with listen socket {listen}")]
    RelaySocket {
        listen: SocketEndpoint,
        relay: SocketEndpoint,
    },
    /// A relay would forward to its own listen socket.
    #[error("relay upstream {upstream} is the relay's own listen socket")]
    UpstreamLoop { upstream: SocketEndpoint },
}
