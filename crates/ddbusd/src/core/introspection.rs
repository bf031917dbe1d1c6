//! Read-only views of the listener for introspection services.

use ddbus_config::Config;

use super::RouteError;
use crate::registry::{ClientInfo, ClientManagerDescriptor};
use crate::transport::TransportHandle;

/// Capability flags captured when the listener is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateFlags {
    /// Accepts client registrations over forwarding relays.
    pub enable_restricted_clients: bool,
    /// Hosts the in-process server client answering URI requests.
    pub enable_server: bool,
}

/// Immutable listener configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerCreateInfo {
    /// Free-text listener description.
    pub description: String,
    /// Capability flags.
    pub flags: CreateFlags,
}

impl From<&Config> for ListenerCreateInfo {
    fn from(config: &Config) -> Self {
        Self {
            description: config.description().to_owned(),
            flags: CreateFlags {
                enable_restricted_clients: config.enable_restricted_clients(),
                enable_server: config.enable_server(),
            },
        }
    }
}

/// Description of one managed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    /// Stable handle.
    pub handle: TransportHandle,
    /// Human-readable name.
    pub name: String,
    /// Whether the transport carries relayed clients.
    pub forwarding: bool,
}

/// Accessors introspection services read from.
///
/// Every method returns a snapshot and may be called from any thread.
#[cfg_attr(test, mockall::automock)]
pub trait ListenerIntrospection: Send + Sync {
    /// Registered clients in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Internal`] when router state is poisoned.
    fn connected_clients(&self) -> Result<Vec<ClientInfo>, RouteError>;

    /// Active transports in handle order.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Internal`] when router state is poisoned.
    fn managed_transports(&self) -> Result<Vec<TransportInfo>, RouteError>;

    /// Client manager name and host designation.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Internal`] when router state is poisoned.
    fn client_manager(&self) -> Result<ClientManagerDescriptor, RouteError>;

    /// Configuration captured at creation.
    fn create_info(&self) -> ListenerCreateInfo;
}
