//! Errors raised by transports and the relay proxy.

use std::io;

use thiserror::Error;

/// Failures serving, relaying or closing a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be resolved or bound.
    #[error("listen endpoint {endpoint} is unavailable: {source}")]
    EndpointUnavailable {
        /// Endpoint as configured.
        endpoint: String,
        /// Resolution or bind failure.
        #[source]
        source: io::Error,
    },
    /// Another listener answers on the endpoint.
    #[error("another listener is already serving {endpoint}")]
    EndpointInUse {
        /// Endpoint as configured.
        endpoint: String,
    },
    /// A non-socket file occupies the Unix socket path.
    #[error("{path} exists and is not a socket")]
    NotASocket {
        /// Occupied path.
        path: String,
    },
    /// A leftover socket file could not be inspected or removed.
    #[error("cannot reclaim stale socket {path}: {source}")]
    StaleSocket {
        /// Socket path.
        path: String,
        /// Underlying filesystem or connect failure.
        #[source]
        source: io::Error,
    },
    /// Unix domain sockets are not available on this platform.
    #[cfg(not(unix))]
    #[error("unix socket endpoints are unsupported on this platform: {endpoint}")]
    UnsupportedUnix {
        /// Endpoint as configured.
        endpoint: String,
    },
    /// The relay could not reach the listener it forwards to.
    #[error("failed to connect to upstream listener {endpoint}: {source}")]
    UpstreamUnreachable {
        /// Upstream endpoint.
        endpoint: String,
        /// Connect failure.
        #[source]
        source: io::Error,
    },
    /// A peer's outbound frame channel could not be opened.
    #[error("cannot open a frame channel for a peer: {source}")]
    PeerChannel {
        /// Handle duplication failure.
        #[source]
        source: io::Error,
    },
    /// A transport thread could not be started.
    #[error("could not start a transport thread: {source}")]
    WorkerSpawn {
        /// Spawn failure.
        #[source]
        source: io::Error,
    },
    /// A transport thread panicked.
    #[error("transport worker thread panicked")]
    WorkerPanicked,
}
