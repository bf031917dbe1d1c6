//! Accept loop turning socket connections into transport peers.
//!
//! Every accepted connection gets a [`StreamChannel`] for outbound frames and
//! a session thread decoding inbound frames. What a peer *is* belongs to the
//! [`PeerSink`]: a router connection for [`super::SocketTransport`], a relayed
//! tool for [`super::RelayProxy`].

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ddbus_config::SocketEndpoint;
use ddbus_protocol::{Envelope, Frame, FrameReader, ResultCode};
use tracing::{debug, info, warn};

use super::{
    ConnectionStream, LISTENER_TARGET, PeerChannel, PeerCredentialIdentity, ProcessIdentity,
    StreamChannel, TransportError,
};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

/// Idle pause between polls of the non-blocking socket.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
/// Pause after a failed accept.
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Receives the peers a [`SocketListener`] accepts.
pub(crate) trait PeerSink: Send + Sync + 'static {
    /// Identifies an admitted peer for the rest of its session.
    type Peer: Copy + fmt::Display + Send;

    /// Admits a connection, or returns the frame explaining the refusal.
    fn attach(
        &self,
        channel: &Arc<StreamChannel>,
        process_id: Option<u32>,
    ) -> Result<Self::Peer, Frame>;

    /// Handles one inbound envelope. Returning `false` ends the session.
    fn deliver(&self, peer: Self::Peer, envelope: Envelope, channel: &StreamChannel) -> bool;

    /// Reports that the peer's session ended.
    fn detach(&self, peer: Self::Peer);
}

/// Bound listening socket, not yet accepting.
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
    identity: Arc<dyn ProcessIdentity>,
}

enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl SocketListener {
    /// Binds `endpoint`, reclaiming a stale Unix socket file if one is left.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, TransportError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => TcpListener::bind((host.as_str(), *port))
                .map(BoundSocket::Tcp)
                .map_err(|source| TransportError::EndpointUnavailable {
                    endpoint: endpoint.to_string(),
                    source,
                })?,
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                BoundSocket::Unix(bind_unix(endpoint, path.as_std_path())?)
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(TransportError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
            identity: Arc::new(PeerCredentialIdentity),
        })
    }

    /// Address of a TCP listener, useful when binding port 0.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            BoundSocket::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix(_) => None,
        }
    }

    pub(crate) fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Spawns the accept loop. `label` names the transport in traces.
    pub(crate) fn start<S: PeerSink>(
        self,
        label: impl Into<String>,
        sink: Arc<S>,
    ) -> Result<ListenerHandle, TransportError> {
        let nonblocking = match &self.socket {
            BoundSocket::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            BoundSocket::Unix(listener) => listener.set_nonblocking(true),
        };
        if let Err(source) = nonblocking {
            self.release();
            return Err(TransportError::EndpointUnavailable {
                endpoint: self.endpoint.to_string(),
                source,
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let peers = Arc::new(AtomicUsize::new(0));
        let accept = AcceptLoop {
            label: label.into(),
            listener: self,
            sink,
            stop: Arc::clone(&stop),
            peers: Arc::clone(&peers),
        };
        let thread = thread::Builder::new()
            .name("ddbusd-accept".to_owned())
            .spawn(move || accept.run())
            .map_err(|source| TransportError::WorkerSpawn { source })?;
        Ok(ListenerHandle {
            stop,
            peers,
            thread: Some(thread),
        })
    }

    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match &self.socket {
            BoundSocket::Tcp(listener) => listener.accept().map(|(stream, _)| {
                stream.set_nonblocking(false).map(|()| ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            BoundSocket::Unix(listener) => listener.accept().map(|(stream, _)| {
                stream.set_nonblocking(false).map(|()| ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => stream.map(Some),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Gives the endpoint back; Unix endpoints lose their socket file.
    fn release(&self) {
        #[cfg(unix)]
        remove_socket_file(&self.endpoint);
    }
}

impl fmt::Debug for SocketListener {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SocketListener")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Handle to a running accept loop. Dropping it stops accepting.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    peers: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops accepting new peers. Sessions already running are unaffected.
    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Number of peers whose sessions are still running.
    pub(crate) fn active_peers(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    /// Waits for the accept loop to release the endpoint.
    pub(crate) fn join(mut self) -> Result<(), TransportError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| TransportError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptLoop<S> {
    label: String,
    listener: SocketListener,
    sink: Arc<S>,
    stop: Arc<AtomicBool>,
    peers: Arc<AtomicUsize>,
}

impl<S: PeerSink> AcceptLoop<S> {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            transport = %self.label,
            endpoint = %self.listener.endpoint,
            "accepting peers"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok(Some(stream)) => {
                    last_error = None;
                    self.spawn_session(stream);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    if last_error != Some(error.kind()) {
                        warn!(
                            target: LISTENER_TARGET,
                            transport = %self.label,
                            error = %error,
                            "accept failed"
                        );
                    }
                    last_error = Some(error.kind());
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        self.listener.release();
        info!(
            target: LISTENER_TARGET,
            transport = %self.label,
            peers = self.peers.load(Ordering::SeqCst),
            "stopped accepting peers"
        );
    }

    fn spawn_session(&self, stream: ConnectionStream) {
        let session = Session {
            label: self.label.clone(),
            sink: Arc::clone(&self.sink),
            peers: Arc::clone(&self.peers),
            process_id: self.listener.identity.peer_process_id(&stream),
        };
        if let Err(error) = thread::Builder::new()
            .name("ddbusd-peer".to_owned())
            .spawn(move || session.run(stream))
        {
            warn!(
                target: LISTENER_TARGET,
                transport = %self.label,
                error = %error,
                "could not start a peer session"
            );
        }
    }
}

/// One accepted connection, from admission to hang-up.
struct Session<S> {
    label: String,
    sink: Arc<S>,
    peers: Arc<AtomicUsize>,
    process_id: Option<u32>,
}

impl<S: PeerSink> Session<S> {
    fn run(self, stream: ConnectionStream) {
        let (channel, writer) = match StreamChannel::spawn(&stream) {
            Ok((channel, writer)) => (Arc::new(channel), writer),
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    transport = %self.label,
                    error = %error,
                    "dropped connection before admission"
                );
                return;
            }
        };
        self.peers.fetch_add(1, Ordering::SeqCst);
        let peer = match self.sink.attach(&channel, self.process_id) {
            Ok(peer) => peer,
            Err(refusal) => {
                self.peers.fetch_sub(1, Ordering::SeqCst);
                debug!(
                    target: LISTENER_TARGET,
                    transport = %self.label,
                    kind = refusal.kind(),
                    "peer refused"
                );
                channel.send(Envelope::direct(refusal));
                hang_up(&channel, writer);
                return;
            }
        };
        debug!(target: LISTENER_TARGET, transport = %self.label, peer = %peer, "peer admitted");

        let mut frames = FrameReader::new(stream);
        loop {
            match frames.read_frame() {
                Ok(Some(envelope)) => {
                    if !self.sink.deliver(peer, envelope, &channel) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(
                        target: LISTENER_TARGET,
                        transport = %self.label,
                        peer = %peer,
                        error = %error,
                        "rejected inbound frame"
                    );
                    channel.send(Envelope::direct(Frame::error(
                        ResultCode::Error,
                        error.to_string(),
                    )));
                    if !error.is_recoverable() {
                        break;
                    }
                }
            }
        }

        self.peers.fetch_sub(1, Ordering::SeqCst);
        self.sink.detach(peer);
        debug!(target: LISTENER_TARGET, transport = %self.label, peer = %peer, "peer left");
        hang_up(&channel, writer);
    }
}

fn hang_up(channel: &StreamChannel, writer: JoinHandle<()>) {
    channel.close();
    if writer.join().is_err() {
        warn!(target: LISTENER_TARGET, "peer writer thread panicked");
    }
}

#[cfg(unix)]
fn bind_unix(endpoint: &SocketEndpoint, path: &Path) -> Result<UnixListener, TransportError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(TransportError::NotASocket {
                path: path.display().to_string(),
            });
        }
        Ok(_) => reclaim_stale_socket(endpoint, path)?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(TransportError::StaleSocket {
                path: path.display().to_string(),
                source,
            });
        }
    }
    UnixListener::bind(path).map_err(|source| TransportError::EndpointUnavailable {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[cfg(unix)]
fn remove_socket_file(endpoint: &SocketEndpoint) {
    let SocketEndpoint::Unix { path } = endpoint else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            path = %path,
            error = %error,
            "failed to remove socket file"
        );
    }
}

/// Removes a socket file nobody answers on; a live listener keeps it.
#[cfg(unix)]
fn reclaim_stale_socket(endpoint: &SocketEndpoint, path: &Path) -> Result<(), TransportError> {
    let stale = |source: io::Error| TransportError::StaleSocket {
        path: path.display().to_string(),
        source,
    };
    match UnixStream::connect(path) {
        Ok(_) => Err(TransportError::EndpointInUse {
            endpoint: endpoint.to_string(),
        }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            debug!(target: LISTENER_TARGET, path = %path.display(), "reclaiming stale socket");
            fs::remove_file(path).map_err(stale)
        }
        Err(error) => Err(stale(error)),
    }
}
