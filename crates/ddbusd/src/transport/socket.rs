//! Socket transport serving TCP or Unix domain endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use ddbus_config::SocketEndpoint;
use tracing::info;

use super::session::RouterSessions;
use super::{
    LISTENER_TARGET, ListenerHandle, SocketListener, Transport, TransportBinding,
    TransportControl, TransportError,
};

/// Listener transport bound to one socket endpoint.
///
/// Binding happens eagerly in [`SocketTransport::bind`] so configuration
/// mistakes surface before the transport is handed to the core.
pub struct SocketTransport {
    name: String,
    forwarding: bool,
    listener: SocketListener,
}

impl SocketTransport {
    /// Binds a transport that terminates clients locally.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint cannot be bound.
    pub fn bind(name: impl Into<String>, endpoint: &SocketEndpoint) -> Result<Self, TransportError> {
        Self::bind_with(name, endpoint, false)
    }

    /// Binds a transport that accepts relay proxies.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint cannot be bound.
    pub fn bind_forwarding(
        name: impl Into<String>,
        endpoint: &SocketEndpoint,
    ) -> Result<Self, TransportError> {
        Self::bind_with(name, endpoint, true)
    }

    fn bind_with(
        name: impl Into<String>,
        endpoint: &SocketEndpoint,
        forwarding: bool,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            name: name.into(),
            forwarding,
            listener: SocketListener::bind(endpoint)?,
        })
    }

    /// Bound TCP address, when the endpoint is TCP.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Endpoint the transport listens on.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        self.listener.endpoint()
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    fn start(
        self: Box<Self>,
        binding: TransportBinding,
    ) -> Result<Box<dyn TransportControl>, TransportError> {
        let Self {
            name,
            forwarding,
            listener,
        } = *self;
        info!(
            target: LISTENER_TARGET,
            transport = %binding.handle(),
            name = %name,
            forwarding,
            endpoint = %listener.endpoint(),
            "starting socket transport"
        );
        let sessions = Arc::new(RouterSessions::new(binding));
        let handle = listener.start(name, sessions)?;
        Ok(Box::new(SocketTransportControl { handle }))
    }
}

struct SocketTransportControl {
    handle: ListenerHandle,
}

impl TransportControl for SocketTransportControl {
    fn close(self: Box<Self>) -> Result<(), TransportError> {
        let peers = self.handle.active_peers();
        self.handle.shutdown();
        info!(target: LISTENER_TARGET, peers, "closing socket transport");
        self.handle.join()
    }
}
