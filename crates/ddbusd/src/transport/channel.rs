//! Socket-backed [`PeerChannel`] with a dedicated writer thread.

use std::net::Shutdown;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use ddbus_protocol::{Envelope, write_frame};
use tracing::debug;

use super::{ConnectionStream, LISTENER_TARGET, PeerChannel, TransportError};

/// Queues outbound envelopes for one connection.
///
/// A writer thread drains the queue in order. Closing the channel stops
/// accepting envelopes, lets the writer flush what is queued and shuts down
/// the read half so the session's blocking read returns.
#[derive(Debug)]
pub(crate) struct StreamChannel {
    outbound: Mutex<Option<Sender<Envelope>>>,
    control: ConnectionStream,
}

impl StreamChannel {
    /// Spawns the writer thread for `stream`.
    pub(crate) fn spawn(
        stream: &ConnectionStream,
    ) -> Result<(Self, JoinHandle<()>), TransportError> {
        let mut writer = stream
            .try_clone()
            .map_err(|source| TransportError::PeerChannel { source })?;
        let control = stream
            .try_clone()
            .map_err(|source| TransportError::PeerChannel { source })?;
        let (sender, receiver) = mpsc::channel::<Envelope>();
        let handle = thread::spawn(move || {
            for envelope in receiver {
                if let Err(error) = write_frame(&mut writer, &envelope) {
                    debug!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "peer writer stopped"
                    );
                    break;
                }
            }
        });
        Ok((
            Self {
                outbound: Mutex::new(Some(sender)),
                control,
            },
            handle,
        ))
    }
}

impl PeerChannel for StreamChannel {
    fn send(&self, envelope: Envelope) -> bool {
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .is_some_and(|sender| sender.send(envelope).is_ok())
    }

    fn close(&self) {
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
        if let Err(error) = self.control.shutdown(Shutdown::Read) {
            debug!(
                target: LISTENER_TARGET,
                error = %error,
                "peer read half already closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};

    use ddbus_protocol::{Frame, FrameReader};

    use super::*;

    #[test]
    fn queued_frames_are_flushed_in_order_before_close() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");
        let stream = ConnectionStream::Tcp(accepted);

        let (channel, writer) = StreamChannel::spawn(&stream).expect("spawn channel");
        assert!(channel.send(Envelope::direct(Frame::Disconnect)));
        assert!(channel.send(Envelope::relayed(4, Frame::Disconnect)));
        channel.close();
        assert!(!channel.send(Envelope::direct(Frame::Disconnect)));
        writer.join().expect("join writer");
        drop(stream);
        drop(channel);

        let frames: Vec<_> = FrameReader::new(client)
            .collect::<Result<_, _>>()
            .expect("read frames");
        assert_eq!(
            frames,
            vec![
                Envelope::direct(Frame::Disconnect),
                Envelope::relayed(4, Frame::Disconnect),
            ]
        );
    }
}
