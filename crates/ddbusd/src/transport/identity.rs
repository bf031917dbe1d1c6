//! Resolves the operating-system process behind a connection.

use super::ConnectionStream;

/// Supplies the owning process id of a freshly accepted connection.
pub(crate) trait ProcessIdentity: Send + Sync {
    /// Returns the peer's process id when the platform exposes it.
    fn peer_process_id(&self, stream: &ConnectionStream) -> Option<u32>;
}

/// Reads `SO_PEERCRED` from Unix domain sockets on Linux.
///
/// TCP peers and other platforms report no identity, so the process id the
/// client claims during registration is used instead.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PeerCredentialIdentity;

impl ProcessIdentity for PeerCredentialIdentity {
    fn peer_process_id(&self, stream: &ConnectionStream) -> Option<u32> {
        peer_credentials(stream)
    }
}

#[cfg(target_os = "linux")]
fn peer_credentials(stream: &ConnectionStream) -> Option<u32> {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    match stream {
        ConnectionStream::Unix(unix) => getsockopt(unix, PeerCredentials)
            .ok()
            .and_then(|credentials| u32::try_from(credentials.pid()).ok()),
        ConnectionStream::Tcp(_) => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn peer_credentials(_stream: &ConnectionStream) -> Option<u32> {
    None
}
