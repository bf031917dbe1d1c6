//! Forwarding relay that multiplexes local tools onto one upstream link.
//!
//! Each local connection receives a relay tag. Frames travel upstream wrapped
//! in that tag and responses are routed back by it, so the upstream listener
//! sees one forwarding peer carrying many clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use ddbus_config::SocketEndpoint;
use ddbus_protocol::{Envelope, Frame, FrameReader, ResultCode};
use tracing::{debug, info, warn};

use super::{
    ConnectionStream, LISTENER_TARGET, ListenerHandle, PeerChannel, PeerSink, SocketListener,
    StreamChannel, TransportError,
};

/// Relay bound locally and ready to connect upstream.
#[derive(Debug)]
pub struct RelayProxy {
    listener: SocketListener,
    upstream: SocketEndpoint,
}

impl RelayProxy {
    /// Binds the local endpoint tools connect to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the local endpoint cannot be bound.
    pub fn bind(local: &SocketEndpoint, upstream: SocketEndpoint) -> Result<Self, TransportError> {
        Ok(Self {
            listener: SocketListener::bind(local)?,
            upstream,
        })
    }

    /// Bound TCP address, when the local endpoint is TCP.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connects upstream and starts accepting local tools.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UpstreamUnreachable`] when the upstream
    /// listener is not reachable.
    pub fn start(self) -> Result<RelayHandle, TransportError> {
        let Self { listener, upstream } = self;
        let stream = ConnectionStream::connect(&upstream).map_err(|source| {
            TransportError::UpstreamUnreachable {
                endpoint: upstream.to_string(),
                source,
            }
        })?;
        let (channel, writer) = StreamChannel::spawn(&stream)?;
        let state = Arc::new(RelayState {
            upstream: channel,
            tools: Mutex::new(HashMap::new()),
            tags: RelayTags::default(),
            live: AtomicBool::new(true),
        });
        info!(
            target: LISTENER_TARGET,
            upstream = %upstream,
            local = %listener.endpoint(),
            "relay connected upstream"
        );

        let reader_state = Arc::clone(&state);
        let reader = thread::Builder::new()
            .name("ddbusd-relay".to_owned())
            .spawn(move || pump_upstream(stream, &reader_state))
            .map_err(|source| TransportError::WorkerSpawn { source })?;
        let listener = listener.start("relay", Arc::clone(&state))?;
        Ok(RelayHandle {
            listener,
            state,
            threads: vec![reader, writer],
        })
    }
}

/// Handle to a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    listener: ListenerHandle,
    state: Arc<RelayState>,
    threads: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Stops accepting tools and closes the upstream link.
    pub fn shutdown(&self) {
        self.listener.shutdown();
        self.state.upstream.close();
    }

    /// Reports whether the upstream link is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Waits for the relay threads to finish.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WorkerPanicked`] when a relay thread
    /// panicked.
    pub fn join(self) -> Result<(), TransportError> {
        let Self {
            listener, threads, ..
        } = self;
        listener.join()?;
        for thread in threads {
            thread.join().map_err(|_| TransportError::WorkerPanicked)?;
        }
        Ok(())
    }
}

/// Hands out relay tags; a tag is never reissued.
#[derive(Debug)]
struct RelayTags {
    next: AtomicU32,
}

impl Default for RelayTags {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }
}

impl RelayTags {
    /// Returns `None` once the tag space is spent.
    fn allocate(&self) -> Option<u32> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tag| tag.checked_add(1))
            .ok()
    }
}

#[derive(Debug)]
struct RelayState {
    upstream: StreamChannel,
    tools: Mutex<HashMap<u32, Arc<StreamChannel>>>,
    tags: RelayTags,
    live: AtomicBool,
}

impl RelayState {
    fn tool(&self, tag: u32) -> Option<Arc<StreamChannel>> {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tag)
            .cloned()
    }

    fn upstream_lost(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!(target: LISTENER_TARGET, "relay lost its upstream listener");
        self.upstream.close();
        let tools: Vec<_> = self
            .tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, tool) in tools {
            tool.send(Envelope::direct(Frame::error(
                ResultCode::TransportClosed,
                "upstream listener closed",
            )));
            tool.close();
        }
    }
}

fn pump_upstream(stream: ConnectionStream, state: &RelayState) {
    let mut frames = FrameReader::new(stream);
    loop {
        match frames.read_frame() {
            Ok(Some(Envelope {
                relay: Some(tag),
                frame,
            })) => match state.tool(tag) {
                Some(tool) => {
                    tool.send(Envelope::direct(frame));
                }
                None => debug!(
                    target: LISTENER_TARGET,
                    tag,
                    kind = frame.kind(),
                    "dropping frame for departed tool"
                ),
            },
            Ok(Some(Envelope { relay: None, frame })) => warn!(
                target: LISTENER_TARGET,
                kind = frame.kind(),
                "upstream frame without relay tag"
            ),
            Ok(None) => break,
            Err(error) if error.is_recoverable() => warn!(
                target: LISTENER_TARGET,
                error = %error,
                "malformed upstream frame"
            ),
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    error = %error,
                    "upstream link failed"
                );
                break;
            }
        }
    }
    state.upstream_lost();
}

impl PeerSink for RelayState {
    type Peer = u32;

    fn attach(
        &self,
        channel: &Arc<StreamChannel>,
        _process_id: Option<u32>,
    ) -> Result<u32, Frame> {
        if !self.live.load(Ordering::SeqCst) {
            return Err(Frame::error(ResultCode::TransportClosed, "upstream listener closed"));
        }
        let Some(tag) = self.tags.allocate() else {
            warn!(target: LISTENER_TARGET, "relay tags exhausted; refusing tool");
            return Err(Frame::error(ResultCode::Error, "relay has no free tags"));
        };
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag, Arc::clone(channel));
        Ok(tag)
    }

    fn deliver(&self, tag: u32, envelope: Envelope, channel: &StreamChannel) -> bool {
        match envelope {
            Envelope { relay: Some(_), .. } => {
                channel.send(Envelope::direct(Frame::error(
                    ResultCode::Error,
                    "relay tags are assigned by the relay",
                )));
                true
            }
            Envelope { relay: None, frame } => self.upstream.send(Envelope::relayed(tag, frame)),
        }
    }

    fn detach(&self, tag: u32) {
        self.upstream.send(Envelope::relayed(tag, Frame::Disconnect));
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tag);
    }
}
