//! Transports multiplexed by the listener core.
//!
//! A [`Transport`] is started against a [`TransportBinding`] and reports each
//! connection it accepts as a peer. Peers deliver inbound envelopes through
//! the binding and receive outbound envelopes through a [`PeerChannel`].

mod channel;
mod errors;
mod identity;
mod listener;
mod relay;
mod session;
mod socket;
mod stream;
#[cfg(test)]
mod test_utils;

use std::fmt;
use std::sync::{Arc, Weak};

use ddbus_protocol::Envelope;

use crate::core::ListenerCore;

pub(crate) use self::channel::StreamChannel;
pub use self::errors::TransportError;
pub(crate) use self::identity::{PeerCredentialIdentity, ProcessIdentity};
pub(crate) use self::listener::{ListenerHandle, PeerSink, SocketListener};
pub use self::relay::{RelayHandle, RelayProxy};
pub use self::socket::SocketTransport;
pub(crate) use self::stream::ConnectionStream;
#[cfg(test)]
pub(crate) use self::test_utils::{RecordingChannel, RecordingSink, SinkEvent};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Handle identifying a transport for as long as the listener runs.
///
/// Handles are allocated monotonically and never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransportHandle(u32);

impl TransportHandle {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifies one connection accepted by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl PeerId {
    /// Wraps a raw peer identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Outbound half of a peer connection.
///
/// Frames sent on one channel are delivered in order; there is no ordering
/// between channels.
pub trait PeerChannel: Send + Sync {
    /// Queues an envelope. Returns `false` once the channel has closed.
    fn send(&self, envelope: Envelope) -> bool;

    /// Closes the connection and wakes any blocked receive on it.
    fn close(&self);
}

/// A connection mechanism the listener core can multiplex.
pub trait Transport: Send {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Whether the transport carries clients relayed from another process.
    fn is_forwarding(&self) -> bool;

    /// Starts accepting connections, reporting them through `binding`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint cannot be served.
    fn start(
        self: Box<Self>,
        binding: TransportBinding,
    ) -> Result<Box<dyn TransportControl>, TransportError>;
}

/// Control surface of a started transport.
pub trait TransportControl: Send + Sync {
    /// Stops accepting connections and releases the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WorkerPanicked`] when a worker thread
    /// panicked.
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// Connects a started transport to the core that owns it.
///
/// The binding holds a weak reference so transports never keep a torn-down
/// core alive.
#[derive(Clone)]
pub struct TransportBinding {
    handle: TransportHandle,
    core: Weak<ListenerCore>,
}

impl TransportBinding {
    pub(crate) fn new(handle: TransportHandle, core: Weak<ListenerCore>) -> Self {
        Self { handle, core }
    }

    /// Handle of the bound transport.
    #[must_use]
    pub fn handle(&self) -> TransportHandle {
        self.handle
    }

    /// Announces a new connection. Returns `None` when the core no longer
    /// accepts peers on this transport.
    pub fn attach_peer(
        &self,
        channel: Arc<dyn PeerChannel>,
        process_id: Option<u32>,
    ) -> Option<PeerId> {
        let core = self.core.upgrade()?;
        core.attach_peer(self.handle, channel, process_id).ok()
    }

    /// Hands an inbound envelope to the router.
    pub fn deliver(&self, peer: PeerId, envelope: Envelope) {
        if let Some(core) = self.core.upgrade() {
            core.handle_frame(peer, envelope);
        }
    }

    /// Reports that a connection ended.
    pub fn detach_peer(&self, peer: PeerId) {
        if let Some(core) = self.core.upgrade() {
            core.detach_peer(peer);
        }
    }
}

impl fmt::Debug for TransportBinding {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransportBinding")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
