//! Test helpers for the transport module.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ddbus_protocol::{Envelope, Frame, ResultCode};

use super::{PeerChannel, PeerSink, StreamChannel};

/// What a [`RecordingSink`] observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkEvent {
    Attached { peer: u32, process_id: Option<u32> },
    Delivered { peer: u32, frame: Frame },
    Detached { peer: u32 },
}

/// Peer sink numbering peers from 1 and recording every callback.
///
/// With `refuse` set every peer is turned away with an error frame.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    next_peer: AtomicU32,
    refuse: bool,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::default()
        })
    }

    pub(crate) fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("recording sink poisoned").clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events().iter().filter(|event| matches(event)).count()
    }

    /// Polls until `expected` events satisfy `matches`.
    pub(crate) fn wait_for_count(
        &self,
        expected: usize,
        matches: impl Fn(&SinkEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.count(&matches) >= expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn record(&self, event: SinkEvent) {
        self.events
            .lock()
            .expect("recording sink poisoned")
            .push(event);
    }
}

impl PeerSink for RecordingSink {
    type Peer = u32;

    fn attach(
        &self,
        _channel: &Arc<StreamChannel>,
        process_id: Option<u32>,
    ) -> Result<u32, Frame> {
        if self.refuse {
            return Err(Frame::error(ResultCode::Error, "not accepting peers"));
        }
        let peer = self.next_peer.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(SinkEvent::Attached { peer, process_id });
        Ok(peer)
    }

    fn deliver(&self, peer: u32, envelope: Envelope, _channel: &StreamChannel) -> bool {
        self.record(SinkEvent::Delivered {
            peer,
            frame: envelope.frame,
        });
        true
    }

    fn detach(&self, peer: u32) {
        self.record(SinkEvent::Detached { peer });
    }
}

/// In-memory peer channel capturing everything the router sends.
#[derive(Debug, Default)]
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<Envelope>>,
    closed: AtomicBool,
}

impl RecordingChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().expect("recording channel poisoned").clone()
    }

    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.sent().into_iter().map(|envelope| envelope.frame).collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Polls until a sent frame satisfies `predicate`; local dispatch
    /// answers from a worker thread.
    pub(crate) fn wait_for<F>(&self, predicate: F) -> Option<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(found) = self.sent().into_iter().find(|envelope| predicate(envelope)) {
                return Some(found);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }
}

impl PeerChannel for RecordingChannel {
    fn send(&self, envelope: Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sent
            .lock()
            .expect("recording channel poisoned")
            .push(envelope);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
