//! Error types for the listener core.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::transport::{PeerId, TransportError, TransportHandle};
use crate::uri::UriError;

/// Errors surfaced by [`super::ListenerCore`].
#[derive(Debug, Error)]
pub enum RouteError {
    /// The client registry rejected the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A transport failed to start or stop.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Service registration failed.
    #[error(transparent)]
    Service(#[from] UriError),
    /// The handle does not name an active transport.
    #[error("transport {handle} is not managed by this listener")]
    UnknownTransport {
        /// Handle that failed to resolve.
        handle: TransportHandle,
    },
    /// The peer is not attached.
    #[error("peer {peer} is not attached")]
    UnknownPeer {
        /// Peer that failed to resolve.
        peer: PeerId,
    },
    /// Shared router state is unusable.
    #[error("internal listener error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
    /// The listener has shut down.
    #[error("listener has shut down")]
    ShutDown,
}

impl RouteError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal {
            message: format!("{what} lock poisoned"),
        }
    }
}
