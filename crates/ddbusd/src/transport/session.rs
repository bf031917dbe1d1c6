//! Admits socket peers into the listener core.

use std::sync::Arc;

use ddbus_protocol::{Envelope, Frame, ResultCode};

use super::{PeerChannel, PeerId, PeerSink, StreamChannel, TransportBinding};

/// Peer sink registering each connection with the core as a router peer.
pub(crate) struct RouterSessions {
    binding: TransportBinding,
}

impl RouterSessions {
    pub(crate) fn new(binding: TransportBinding) -> Self {
        Self { binding }
    }
}

impl PeerSink for RouterSessions {
    type Peer = PeerId;

    fn attach(
        &self,
        channel: &Arc<StreamChannel>,
        process_id: Option<u32>,
    ) -> Result<PeerId, Frame> {
        let channel: Arc<dyn PeerChannel> = channel.clone();
        self.binding
            .attach_peer(channel, process_id)
            .ok_or_else(|| Frame::error(ResultCode::TransportClosed, "transport is closing"))
    }

    fn deliver(&self, peer: PeerId, envelope: Envelope, _channel: &StreamChannel) -> bool {
        self.binding.deliver(peer, envelope);
        true
    }

    fn detach(&self, peer: PeerId) {
        self.binding.detach_peer(peer);
    }
}
