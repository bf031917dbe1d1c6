//! Error types for client registry operations.

use ddbus_protocol::ClientId;
use thiserror::Error;

/// Errors surfaced by [`super::ClientRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The identifier does not name a registered client.
    #[error("client {id} is not registered")]
    UnknownClient {
        /// Identifier that failed to resolve.
        id: ClientId,
    },
    /// Identification was repeated with different metadata.
    #[error("client {id} is already identified as '{name}'")]
    DuplicateIdentification {
        /// Identified client.
        id: ClientId,
        /// Name recorded by the first identification.
        name: String,
    },
    /// A host is already designated and still registered.
    #[error("client {current} is already the host")]
    HostAlreadyDesignated {
        /// Current host.
        current: ClientId,
    },
    /// Every identifier has been handed out.
    #[error("client identifiers are exhausted")]
    IdentifiersExhausted,
}
