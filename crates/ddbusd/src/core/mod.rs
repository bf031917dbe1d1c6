//! The listener core: transports, clients and URI services behind one router.
//!
//! [`ListenerCore`] owns every transport for its whole lifetime and refers
//! to them only by [`TransportHandle`]. Structural changes (adding or
//! removing a transport, registering or unregistering a client) take the
//! router write lock; frame routing and introspection take read snapshots.
//! Forwarded requests are tracked in a separate table that is always locked
//! after the router state.

mod errors;
mod introspection;
mod pending;
mod routing;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use ddbus_protocol::{ClientId, Envelope, Frame, ResultCode};
use tracing::{debug, info, warn};

use crate::health::HealthReporter;
use crate::registry::{ClientInfo, ClientManagerDescriptor, ClientRegistry, ClientRoute};
use crate::services::ListenerUriService;
use crate::transport::{
    PeerChannel, PeerId, Transport, TransportBinding, TransportControl, TransportHandle,
};
use crate::uri::{ServiceRegistry, ServiceResponse, UriRequest, UriService};

pub use errors::RouteError;
#[cfg(test)]
pub(crate) use introspection::MockListenerIntrospection;
pub use introspection::{CreateFlags, ListenerCreateInfo, ListenerIntrospection, TransportInfo};

use pending::{LocalRequest, PendingRequest, PendingRequests};

pub(crate) const CORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::core");

struct TransportEntry {
    info: TransportInfo,
    control: Option<Box<dyn TransportControl>>,
}

struct PeerEntry {
    transport: TransportHandle,
    forwarding: bool,
    channel: Arc<dyn PeerChannel>,
    process_id: Option<u32>,
    /// Clients carried by the connection, keyed by relay tag.
    clients: BTreeMap<Option<u32>, ClientId>,
}

struct RouterState {
    transports: BTreeMap<TransportHandle, TransportEntry>,
    peers: HashMap<PeerId, PeerEntry>,
    registry: ClientRegistry,
    closed: bool,
}

/// Connection torn down with its transport.
struct ClosingPeer {
    peer: PeerEntry,
    local: Vec<LocalRequest>,
}

impl ClosingPeer {
    /// Answers everything still owed to the connection, then closes it.
    fn close(self, failed: &[PendingRequest]) {
        let Self { peer, local } = self;
        let channel = &peer.channel;
        for request in local {
            channel.send(Envelope {
                relay: request.relay,
                frame: Frame::failure(
                    request.request_id,
                    ResultCode::TransportClosed,
                    "transport closed",
                ),
            });
        }
        for (relay, client) in &peer.clients {
            for request in failed.iter().filter(|request| request.origin == *client) {
                channel.send(Envelope {
                    relay: *relay,
                    frame: Frame::failure(
                        request.origin_request,
                        ResultCode::TransportClosed,
                        "transport closed",
                    ),
                });
            }
        }
        let notice = || Frame::error(ResultCode::TransportClosed, "transport closed");
        if peer.forwarding {
            for relay in peer.clients.keys() {
                channel.send(Envelope {
                    relay: *relay,
                    frame: notice(),
                });
            }
        } else {
            channel.send(Envelope::direct(notice()));
        }
        channel.close();
    }
}

/// Clients removed from the registry together with the forwarded requests
/// that can no longer complete.
#[derive(Default)]
struct Departures {
    clients: Vec<ClientInfo>,
    failed: Vec<PendingRequest>,
}

/// The message router multiplexing transports into one client space.
pub struct ListenerCore {
    create_info: ListenerCreateInfo,
    state: RwLock<RouterState>,
    pending: Mutex<PendingRequests>,
    services: ServiceRegistry,
    reporter: Arc<dyn HealthReporter>,
    self_ref: Weak<ListenerCore>,
    next_transport: AtomicU32,
    next_peer: AtomicU64,
}

impl ListenerCore {
    /// Creates a listener with the built-in `listener` service registered.
    ///
    /// When [`CreateFlags::enable_server`] is set the listener registers
    /// itself as an identified in-process client and becomes host.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when the host client or the built-in service
    /// cannot be registered.
    pub fn new(
        create_info: ListenerCreateInfo,
        manager_name: impl Into<String>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Result<Arc<Self>, RouteError> {
        let registry = ClientRegistry::new(manager_name);
        let core = Arc::new_cyclic(|self_ref| Self {
            create_info,
            state: RwLock::new(RouterState {
                transports: BTreeMap::new(),
                peers: HashMap::new(),
                registry,
                closed: false,
            }),
            pending: Mutex::new(PendingRequests::default()),
            services: ServiceRegistry::new(),
            reporter,
            self_ref: self_ref.clone(),
            next_transport: AtomicU32::new(1),
            next_peer: AtomicU64::new(1),
        });

        if core.create_info.flags.enable_server {
            core.install_host()?;
        }

        let service = Arc::new(ListenerUriService::new());
        let view: Weak<Self> = Arc::downgrade(&core);
        service.bind(view);
        core.register_service(service)?;
        Ok(core)
    }

    fn install_host(&self) -> Result<(), RouteError> {
        let info = {
            let mut state = self.write_state()?;
            let description = self.create_info.description.clone();
            let registry = &mut state.registry;
            let name = registry.descriptor().name;
            let registered = registry.register_client(std::process::id(), ClientRoute::Local)?;
            let info = registry.complete_identification(registered.id, &name, &description)?;
            registry.designate_host(info.id)?;
            info
        };
        info!(target: CORE_TARGET, client_id = %info.id, "in-process host registered");
        self.reporter.client_registered(&info);
        Ok(())
    }

    /// Starts `transport` and adds it to the managed set.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::ShutDown`] after [`Self::shutdown`] and
    /// [`RouteError::Transport`] when the transport fails to start.
    pub fn add_transport(
        &self,
        transport: Box<dyn Transport>,
    ) -> Result<TransportHandle, RouteError> {
        let handle = TransportHandle::new(self.next_transport.fetch_add(1, Ordering::SeqCst));
        let info = TransportInfo {
            handle,
            name: transport.name().to_owned(),
            forwarding: transport.is_forwarding(),
        };
        {
            let mut state = self.write_state()?;
            if state.closed {
                return Err(RouteError::ShutDown);
            }
            state.transports.insert(
                handle,
                TransportEntry {
                    info: info.clone(),
                    control: None,
                },
            );
        }

        let binding = TransportBinding::new(handle, self.self_ref.clone());
        let control = match transport.start(binding) {
            Ok(control) => control,
            Err(error) => {
                if let Ok(mut state) = self.write_state() {
                    state.transports.remove(&handle);
                }
                warn!(
                    target: CORE_TARGET,
                    transport = %info.name,
                    error = %error,
                    "transport failed to start"
                );
                return Err(error.into());
            }
        };

        let stored = match self.write_state() {
            Ok(mut state) => match state.transports.get_mut(&handle) {
                Some(entry) => {
                    entry.control = Some(control);
                    Ok(())
                }
                None => Err((control, RouteError::UnknownTransport { handle })),
            },
            Err(error) => Err((control, error)),
        };
        if let Err((control, error)) = stored {
            control.close()?;
            return Err(error);
        }

        info!(
            target: CORE_TARGET,
            transport = %info.name,
            handle = %handle,
            forwarding = info.forwarding,
            "transport added"
        );
        self.reporter.transport_added(&info);
        Ok(handle)
    }

    /// Closes a transport and forgets every client it carried.
    ///
    /// Every request still waiting on the transport, forwarded or local,
    /// resolves with [`ResultCode::TransportClosed`] before its connections
    /// close.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownTransport`] for unmanaged handles and
    /// [`RouteError::Transport`] when the transport fails to stop cleanly.
    pub fn remove_transport(&self, handle: TransportHandle) -> Result<(), RouteError> {
        let (entry, closing, departures) = {
            let mut guard = self.write_state()?;
            let state = &mut *guard;
            let entry = state
                .transports
                .remove(&handle)
                .ok_or(RouteError::UnknownTransport { handle })?;
            let peers: Vec<PeerId> = state
                .peers
                .iter()
                .filter(|(_, peer)| peer.transport == handle)
                .map(|(id, _)| *id)
                .collect();
            let mut local = self.lock_pending()?.drain_local_on(&peers);
            let mut closing = Vec::with_capacity(peers.len());
            for id in peers {
                let Some(peer) = state.peers.remove(&id) else {
                    continue;
                };
                let (answers, rest): (Vec<_>, Vec<_>) =
                    local.into_iter().partition(|request| request.peer == id);
                local = rest;
                closing.push(ClosingPeer { peer, local: answers });
            }
            let clients = state.registry.clients_on_transport(handle);
            let departures = self.depart(state, &clients)?;
            (entry, closing, departures)
        };

        for peer in closing {
            peer.close(&departures.failed);
        }
        self.settle(departures, ResultCode::TransportClosed, "transport closed");
        let closed = match entry.control {
            Some(control) => control.close(),
            None => Ok(()),
        };
        info!(
            target: CORE_TARGET,
            transport = %entry.info.name,
            handle = %handle,
            "transport removed"
        );
        self.reporter.transport_removed(&entry.info);
        closed.map_err(RouteError::from)
    }

    /// Records a connection accepted by a transport.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::ShutDown`] once the listener is closing and
    /// [`RouteError::UnknownTransport`] when the transport was removed.
    pub(crate) fn attach_peer(
        &self,
        transport: TransportHandle,
        channel: Arc<dyn PeerChannel>,
        process_id: Option<u32>,
    ) -> Result<PeerId, RouteError> {
        let mut state = self.write_state()?;
        if state.closed {
            return Err(RouteError::ShutDown);
        }
        let forwarding = state
            .transports
            .get(&transport)
            .map(|entry| entry.info.forwarding)
            .ok_or(RouteError::UnknownTransport { handle: transport })?;
        let peer = PeerId::new(self.next_peer.fetch_add(1, Ordering::SeqCst));
        state.peers.insert(
            peer,
            PeerEntry {
                transport,
                forwarding,
                channel,
                process_id,
                clients: BTreeMap::new(),
            },
        );
        debug!(
            target: CORE_TARGET,
            transport = %transport,
            peer = %peer,
            process_id = ?process_id,
            "peer attached"
        );
        Ok(peer)
    }

    /// Forgets a connection and every client it carried.
    pub(crate) fn detach_peer(&self, peer: PeerId) {
        let departures = {
            let Ok(mut guard) = self.write_state() else {
                return;
            };
            let state = &mut *guard;
            let Some(entry) = state.peers.remove(&peer) else {
                return;
            };
            let clients: Vec<ClientId> = entry.clients.values().copied().collect();
            match self.depart(state, &clients) {
                Ok(departures) => departures,
                Err(error) => {
                    warn!(
                        target: CORE_TARGET,
                        peer = %peer,
                        error = %error,
                        "failed to detach peer"
                    );
                    return;
                }
            }
        };
        debug!(target: CORE_TARGET, peer = %peer, "peer detached");
        self.settle(departures, ResultCode::ClientDisconnected, "client disconnected");
    }

    /// Registers a URI service.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Service`] when the name is already taken.
    pub fn register_service(&self, service: Arc<dyn UriService>) -> Result<(), RouteError> {
        self.services.register(service)?;
        Ok(())
    }

    /// Unregisters and detaches a URI service. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Service`] when the service table is poisoned.
    pub fn unregister_service(&self, name: &str) -> Result<bool, RouteError> {
        Ok(self.services.unregister(name)?.is_some())
    }

    /// Names of registered URI services.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Service`] when the service table is poisoned.
    pub fn service_names(&self) -> Result<Vec<String>, RouteError> {
        Ok(self.services.names()?)
    }

    /// Answers a request with the local URI services on the calling thread.
    pub fn dispatch_local(&self, request: UriRequest) -> ServiceResponse {
        let service = request.service().to_owned();
        let command = request.command().to_owned();
        let response = self.services.dispatch(request);
        debug!(
            target: CORE_TARGET,
            service = %service,
            command = %command,
            result = %response.result,
            "local request dispatched"
        );
        response
    }

    /// Removes every transport and detaches every service.
    ///
    /// Idempotent. In-flight forwarded requests fail with
    /// [`ResultCode::TransportClosed`].
    pub fn shutdown(&self) {
        let handles: Vec<TransportHandle> = match self.write_state() {
            Ok(mut state) => {
                state.closed = true;
                state.transports.keys().copied().collect()
            }
            Err(error) => {
                warn!(
                    target: CORE_TARGET,
                    error = %error,
                    "router state unusable during shutdown"
                );
                Vec::new()
            }
        };
        for handle in handles {
            if let Err(error) = self.remove_transport(handle) {
                warn!(
                    target: CORE_TARGET,
                    handle = %handle,
                    error = %error,
                    "failed to remove transport during shutdown"
                );
            }
        }
        let stranded = self
            .pending
            .lock()
            .map(|mut pending| pending.drain_all())
            .unwrap_or_default();
        self.settle(
            Departures {
                clients: Vec::new(),
                failed: stranded,
            },
            ResultCode::TransportClosed,
            "listener shut down",
        );
        self.services.clear();
        info!(target: CORE_TARGET, "listener shut down");
    }

    /// Whether [`Self::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.read_state().map_or(true, |state| state.closed)
    }

    /// Unregisters `clients` and collects the forwarded requests they were
    /// party to. Must be called with the router write lock held.
    fn depart(
        &self,
        state: &mut RouterState,
        clients: &[ClientId],
    ) -> Result<Departures, RouteError> {
        let mut departures = Departures::default();
        for id in clients {
            match state.registry.unregister(*id) {
                Ok(record) => departures.clients.push(record.info),
                Err(error) => {
                    debug!(target: CORE_TARGET, error = %error, "client already gone");
                }
            }
        }
        if !clients.is_empty() {
            departures.failed = self.lock_pending()?.drain_involving(clients);
        }
        Ok(departures)
    }

    /// Reports departed clients and fails their requests. Must be called
    /// without router locks held.
    fn settle(&self, departures: Departures, result: ResultCode, detail: &str) {
        for request in departures.failed {
            self.deliver_to_client(
                request.origin,
                Frame::failure(request.origin_request, result, detail),
            );
        }
        for client in &departures.clients {
            info!(
                target: CORE_TARGET,
                client_id = %client.id,
                name = %client.name,
                "client unregistered"
            );
            self.reporter.client_unregistered(client);
        }
    }

    /// Sends a frame to a registered client. Frames addressed to the
    /// in-process host are discarded.
    fn deliver_to_client(&self, client: ClientId, frame: Frame) -> bool {
        let route = {
            let Ok(state) = self.read_state() else {
                return false;
            };
            match state.registry.route(client) {
                Some(ClientRoute::Remote { peer, relay, .. }) => state
                    .peers
                    .get(&peer)
                    .map(|entry| (Arc::clone(&entry.channel), relay)),
                Some(ClientRoute::Local) => {
                    debug!(
                        target: CORE_TARGET,
                        client_id = %client,
                        kind = frame.kind(),
                        "discarded frame addressed to the in-process host"
                    );
                    return true;
                }
                None => None,
            }
        };
        match route {
            Some((channel, relay)) => channel.send(Envelope { relay, frame }),
            None => false,
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, RouterState>, RouteError> {
        self.state
            .read()
            .map_err(|_| RouteError::poisoned("router state"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, RouterState>, RouteError> {
        self.state
            .write()
            .map_err(|_| RouteError::poisoned("router state"))
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, PendingRequests>, RouteError> {
        self.pending
            .lock()
            .map_err(|_| RouteError::poisoned("pending request"))
    }

    /// Whether a dispatch thread still owns the answer for `ticket`.
    fn finish_local(&self, ticket: u64) -> bool {
        self.lock_pending()
            .map_or(true, |mut pending| pending.finish_local(ticket))
    }
}

impl ListenerIntrospection for ListenerCore {
    fn connected_clients(&self) -> Result<Vec<ClientInfo>, RouteError> {
        Ok(self.read_state()?.registry.list_clients())
    }

    fn managed_transports(&self) -> Result<Vec<TransportInfo>, RouteError> {
        Ok(self
            .read_state()?
            .transports
            .values()
            .map(|entry| entry.info.clone())
            .collect())
    }

    fn client_manager(&self) -> Result<ClientManagerDescriptor, RouteError> {
        Ok(self.read_state()?.registry.descriptor())
    }

    fn create_info(&self) -> ListenerCreateInfo {
        self.create_info.clone()
    }
}

impl fmt::Debug for ListenerCore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ListenerCore")
            .field("create_info", &self.create_info)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
