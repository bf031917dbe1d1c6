//! Registry of connected clients and the host designation.
//!
//! The registry is plain data: callers serialise access to it. Identifiers
//! start at 1, increase monotonically and are never handed out twice.

mod errors;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use ddbus_protocol::ClientId;

use crate::transport::{PeerId, TransportHandle};

pub use errors::RegistryError;

/// Point-in-time description of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Listener-assigned identifier.
    pub id: ClientId,
    /// Display name; empty until identified.
    pub name: String,
    /// Free-text description; empty until identified.
    pub description: String,
    /// Owning process id, 0 when unknown.
    pub process_id: u32,
    /// Whether the identification handshake completed.
    pub identified: bool,
}

/// Where frames for a client are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRoute {
    /// Served in-process by the URI service registry.
    Local,
    /// Reached through a transport peer.
    Remote {
        /// Transport that accepted the connection.
        transport: TransportHandle,
        /// Connection carrying the client.
        peer: PeerId,
        /// Relay tag when the client arrived through a forwarding relay.
        relay: Option<u32>,
    },
}

impl ClientRoute {
    /// Transport carrying the client, if any.
    #[must_use]
    pub fn transport(&self) -> Option<TransportHandle> {
        match self {
            Self::Local => None,
            Self::Remote { transport, .. } => Some(*transport),
        }
    }
}

/// Name and host designation of the client manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientManagerDescriptor {
    /// Manager name.
    pub name: String,
    /// Host client, or [`ClientId::NONE`].
    pub host_client_id: ClientId,
}

/// A registered client with its route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    /// Public description.
    pub info: ClientInfo,
    /// Delivery route.
    pub route: ClientRoute,
}

/// Tracks every client that completed registration.
#[derive(Debug)]
pub struct ClientRegistry {
    manager_name: String,
    clients: BTreeMap<ClientId, ClientRecord>,
    next_id: Option<u32>,
    host: ClientId,
}

impl ClientRegistry {
    /// Creates an empty registry for the named client manager.
    #[must_use]
    pub fn new(manager_name: impl Into<String>) -> Self {
        Self {
            manager_name: manager_name.into(),
            clients: BTreeMap::new(),
            next_id: Some(1),
            host: ClientId::NONE,
        }
    }

    /// Allocates a fresh identifier and records an unidentified client.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::IdentifiersExhausted`] once every `u32`
    /// identifier has been issued.
    pub fn register_client(
        &mut self,
        process_id: u32,
        route: ClientRoute,
    ) -> Result<ClientInfo, RegistryError> {
        let raw = self.next_id.ok_or(RegistryError::IdentifiersExhausted)?;
        self.next_id = raw.checked_add(1);
        let id = ClientId::new(raw);
        let info = ClientInfo {
            id,
            name: String::new(),
            description: String::new(),
            process_id,
            identified: false,
        };
        self.clients.insert(
            id,
            ClientRecord {
                info: info.clone(),
                route,
            },
        );
        Ok(info)
    }

    /// Marks a client identified.
    ///
    /// Repeating the call with identical metadata succeeds without change.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownClient`] for unregistered identifiers
    /// and [`RegistryError::DuplicateIdentification`] when the metadata
    /// conflicts with an earlier identification.
    pub fn complete_identification(
        &mut self,
        id: ClientId,
        name: &str,
        description: &str,
    ) -> Result<ClientInfo, RegistryError> {
        let record = self
            .clients
            .get_mut(&id)
            .ok_or(RegistryError::UnknownClient { id })?;
        let info = &mut record.info;
        if info.identified {
            if info.name == name && info.description == description {
                return Ok(info.clone());
            }
            return Err(RegistryError::DuplicateIdentification {
                id,
                name: info.name.clone(),
            });
        }
        name.clone_into(&mut info.name);
        description.clone_into(&mut info.description);
        info.identified = true;
        Ok(info.clone())
    }

    /// Removes a client, clearing the host designation if it was the host.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownClient`] for unregistered identifiers.
    pub fn unregister(&mut self, id: ClientId) -> Result<ClientRecord, RegistryError> {
        let record = self
            .clients
            .remove(&id)
            .ok_or(RegistryError::UnknownClient { id })?;
        if self.host == id {
            self.host = ClientId::NONE;
        }
        Ok(record)
    }

    /// Snapshot of every client in registration order.
    #[must_use]
    pub fn list_clients(&self) -> Vec<ClientInfo> {
        self.clients
            .values()
            .map(|record| record.info.clone())
            .collect()
    }

    /// Current host, or [`ClientId::NONE`].
    #[must_use]
    pub fn host_client_id(&self) -> ClientId {
        self.host
    }

    /// Designates the host client.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownClient`] for unregistered identifiers
    /// and [`RegistryError::HostAlreadyDesignated`] while another host is
    /// registered.
    pub fn designate_host(&mut self, id: ClientId) -> Result<(), RegistryError> {
        if !self.clients.contains_key(&id) {
            return Err(RegistryError::UnknownClient { id });
        }
        if !self.host.is_none() {
            return Err(RegistryError::HostAlreadyDesignated { current: self.host });
        }
        self.host = id;
        Ok(())
    }

    /// Looks up a client's description.
    #[must_use]
    pub fn get(&self, id: ClientId) -> Option<&ClientInfo> {
        self.clients.get(&id).map(|record| &record.info)
    }

    /// Looks up a client's route.
    #[must_use]
    pub fn route(&self, id: ClientId) -> Option<ClientRoute> {
        self.clients.get(&id).map(|record| record.route)
    }

    /// Clients reached through `transport`.
    #[must_use]
    pub fn clients_on_transport(&self, transport: TransportHandle) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|(_, record)| record.route.transport() == Some(transport))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Name and host designation.
    #[must_use]
    pub fn descriptor(&self) -> ClientManagerDescriptor {
        ClientManagerDescriptor {
            name: self.manager_name.clone(),
            host_client_id: self.host,
        }
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn with_next_id(mut self, next: u32) -> Self {
        self.next_id = Some(next);
        self
    }
}
