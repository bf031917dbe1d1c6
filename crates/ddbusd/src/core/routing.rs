//! Inbound frame routing.

use std::sync::Arc;
use std::thread;

use ddbus_protocol::{ClientId, Envelope, Frame, RequestId, ResponseBody, ResultCode};
use tracing::{debug, info, warn};

use super::{CORE_TARGET, ListenerCore, LocalRequest, PendingRequest, RouteError};
use crate::registry::ClientRoute;
use crate::transport::{PeerChannel, PeerId, TransportHandle};
use crate::uri::UriRequest;

/// Return path to the connection and relay tag a frame arrived on.
#[derive(Clone)]
struct ReplyPath {
    channel: Arc<dyn PeerChannel>,
    relay: Option<u32>,
}

impl ReplyPath {
    fn send(&self, frame: Frame) -> bool {
        self.channel.send(Envelope {
            relay: self.relay,
            frame,
        })
    }
}

/// What the router knows about the connection a frame arrived on.
struct PeerLink {
    peer: PeerId,
    transport: TransportHandle,
    forwarding: bool,
    process_id: Option<u32>,
    client: Option<ClientId>,
}

/// Destination of a request once the target has been resolved.
enum RequestRoute {
    Local,
    Forward {
        channel: Arc<dyn PeerChannel>,
        relay: Option<u32>,
        target: ClientId,
        minted: RequestId,
    },
}

impl ListenerCore {
    /// Routes one inbound envelope from `peer`.
    ///
    /// Every failure is answered on the originating connection; nothing
    /// here tears the listener down.
    pub(crate) fn handle_frame(&self, peer: PeerId, envelope: Envelope) {
        let Envelope { relay, frame } = envelope;
        let Some((link, channel)) = self.peer_link(peer, relay) else {
            debug!(
                target: CORE_TARGET,
                peer = %peer,
                kind = frame.kind(),
                "dropped frame from detached peer"
            );
            return;
        };
        let reply = ReplyPath { channel, relay };

        if link.forwarding != relay.is_some() {
            let detail = if link.forwarding {
                "frames on a forwarding transport must carry a relay tag"
            } else {
                "relay tags are only accepted on forwarding transports"
            };
            warn!(target: CORE_TARGET, peer = %peer, detail, "rejected frame");
            reply.send(Frame::error(ResultCode::Error, detail));
            return;
        }

        match frame {
            Frame::Register { process_id, host } => {
                self.on_register(peer, &link, relay, process_id, host, &reply);
            }
            Frame::Identify { name, description } => {
                self.on_identify(&link, &name, &description, &reply);
            }
            Frame::Request {
                request_id,
                target,
                uri,
                payload,
                ..
            } => self.on_request(&link, request_id, target, uri, payload, &reply),
            Frame::Response {
                request_id,
                result,
                body,
                detail,
            } => self.on_response(&link, request_id, result, body, detail),
            Frame::Message {
                destination,
                payload,
                ..
            } => self.on_message(&link, destination, payload, &reply),
            Frame::Disconnect => self.on_disconnect(peer, relay),
            other => {
                reply.send(Frame::error(
                    ResultCode::Error,
                    format!("clients may not send '{}' frames", other.kind()),
                ));
            }
        }
    }

    fn peer_link(
        &self,
        peer: PeerId,
        relay: Option<u32>,
    ) -> Option<(PeerLink, Arc<dyn PeerChannel>)> {
        let state = self.read_state().ok()?;
        let entry = state.peers.get(&peer)?;
        let link = PeerLink {
            peer,
            transport: entry.transport,
            forwarding: entry.forwarding,
            process_id: entry.process_id,
            client: entry.clients.get(&relay).copied(),
        };
        Some((link, Arc::clone(&entry.channel)))
    }

    fn on_register(
        &self,
        peer: PeerId,
        link: &PeerLink,
        relay: Option<u32>,
        claimed: Option<u32>,
        host: bool,
        reply: &ReplyPath,
    ) {
        if link.forwarding && !self.create_info.flags.enable_restricted_clients {
            reply.send(Frame::error(
                ResultCode::Error,
                "this listener does not accept restricted clients",
            ));
            return;
        }
        if let Some(existing) = link.client {
            reply.send(Frame::error(
                ResultCode::Error,
                format!("connection is already registered as client {existing}"),
            ));
            return;
        }
        // Relayed clients share the relay's socket, so only the claim names them.
        let process_id = if link.forwarding {
            claimed.unwrap_or(0)
        } else {
            link.process_id.or(claimed).unwrap_or(0)
        };

        let registered = self.write_state().and_then(|mut guard| {
            let state = &mut *guard;
            let entry = state
                .peers
                .get_mut(&peer)
                .ok_or(RouteError::UnknownPeer { peer })?;
            let route = ClientRoute::Remote {
                transport: link.transport,
                peer,
                relay,
            };
            let info = state.registry.register_client(process_id, route)?;
            entry.clients.insert(relay, info.id);
            let became_host = host && state.registry.designate_host(info.id).is_ok();
            Ok((info, became_host))
        });

        match registered {
            Ok((info, became_host)) => {
                info!(
                    target: CORE_TARGET,
                    client_id = %info.id,
                    process_id = info.process_id,
                    transport = %link.transport,
                    host = became_host,
                    "client registered"
                );
                self.reporter.client_registered(&info);
                reply.send(Frame::Registered { client_id: info.id });
            }
            Err(error) => {
                warn!(
                    target: CORE_TARGET,
                    peer = %peer,
                    error = %error,
                    "registration failed"
                );
                reply.send(Frame::error(ResultCode::Error, error.to_string()));
            }
        }
    }

    fn on_identify(&self, link: &PeerLink, name: &str, description: &str, reply: &ReplyPath) {
        let Some(client) = link.client else {
            reply.send(not_registered());
            return;
        };
        let identified = self.write_state().and_then(|mut state| {
            state
                .registry
                .complete_identification(client, name, description)
                .map_err(RouteError::from)
        });
        match identified {
            Ok(info) => {
                debug!(
                    target: CORE_TARGET,
                    client_id = %info.id,
                    name = %info.name,
                    "client identified"
                );
                reply.send(Frame::Identified { client_id: info.id });
            }
            Err(error) => {
                reply.send(Frame::error(ResultCode::Error, error.to_string()));
            }
        }
    }

    fn on_request(
        &self,
        link: &PeerLink,
        request_id: RequestId,
        target: Option<ClientId>,
        uri: String,
        payload: Option<Vec<u8>>,
        reply: &ReplyPath,
    ) {
        let Some(origin) = link.client else {
            reply.send(Frame::failure(
                request_id,
                ResultCode::NotConnected,
                "connection has not registered a client",
            ));
            return;
        };
        match self.resolve_request(origin, request_id, target) {
            Ok(RequestRoute::Local) => {
                self.dispatch_detached(link.peer, request_id, &uri, payload, reply.clone());
            }
            Ok(RequestRoute::Forward {
                channel,
                relay,
                target,
                minted,
            }) => {
                let forwarded = channel.send(Envelope {
                    relay,
                    frame: Frame::Request {
                        request_id: minted,
                        target: Some(target),
                        source: Some(origin),
                        uri,
                        payload,
                    },
                });
                // The target may have departed meanwhile and failed the request itself.
                let unanswered = !forwarded
                    && self
                        .lock_pending()
                        .ok()
                        .and_then(|mut pending| pending.complete(minted, target))
                        .is_some();
                if unanswered {
                    reply.send(Frame::failure(
                        request_id,
                        ResultCode::TransportClosed,
                        format!("connection to client {target} is closed"),
                    ));
                }
            }
            Err((result, detail)) => {
                reply.send(Frame::failure(request_id, result, detail));
            }
        }
    }

    /// Resolves the target of a request. Forwarded requests are entered in
    /// the pending table while the router lock is still held so a racing
    /// disconnect cannot strand them.
    fn resolve_request(
        &self,
        origin: ClientId,
        request_id: RequestId,
        target: Option<ClientId>,
    ) -> Result<RequestRoute, (ResultCode, String)> {
        let internal = |error: RouteError| (ResultCode::Error, error.to_string());
        let state = self.read_state().map_err(internal)?;
        let target = target.unwrap_or_else(|| state.registry.host_client_id());
        if target.is_none() {
            return Err((
                ResultCode::NotConnected,
                "no host client is registered".to_owned(),
            ));
        }
        match state.registry.route(target) {
            None => Err((
                ResultCode::NotConnected,
                format!("client {target} is not connected"),
            )),
            Some(ClientRoute::Local) => Ok(RequestRoute::Local),
            Some(ClientRoute::Remote { peer, relay, .. }) => {
                let channel = state
                    .peers
                    .get(&peer)
                    .map(|entry| Arc::clone(&entry.channel))
                    .ok_or_else(|| {
                        (
                            ResultCode::TransportClosed,
                            format!("connection to client {target} is closed"),
                        )
                    })?;
                let minted = self.lock_pending().map_err(internal)?.insert(PendingRequest {
                    origin,
                    origin_request: request_id,
                    target,
                });
                Ok(RequestRoute::Forward {
                    channel,
                    relay,
                    target,
                    minted,
                })
            }
        }
    }

    /// Answers a local request on its own thread so a slow service only
    /// delays its own response.
    ///
    /// The request is ticketed in the pending table; if its transport closes
    /// first, the transport owns the answer and the thread's result is
    /// dropped.
    fn dispatch_detached(
        &self,
        peer: PeerId,
        request_id: RequestId,
        uri: &str,
        payload: Option<Vec<u8>>,
        reply: ReplyPath,
    ) {
        let request = match UriRequest::parse(uri, payload) {
            Ok(request) => request,
            Err(error) => {
                reply.send(Frame::failure(
                    request_id,
                    ResultCode::Error,
                    error.to_string(),
                ));
                return;
            }
        };
        let ticket = match self.lock_pending() {
            Ok(mut pending) => pending.begin_local(LocalRequest {
                peer,
                relay: reply.relay,
                request_id,
            }),
            Err(error) => {
                reply.send(Frame::failure(request_id, ResultCode::Error, error.to_string()));
                return;
            }
        };
        let core = self.self_ref.clone();
        let failure_path = reply.clone();
        let spawned = thread::Builder::new()
            .name("ddbusd-dispatch".to_owned())
            .spawn(move || {
                let Some(core) = core.upgrade() else {
                    reply.send(Frame::failure(
                        request_id,
                        ResultCode::TransportClosed,
                        "listener shut down",
                    ));
                    return;
                };
                let frame = core.dispatch_local(request).into_frame(request_id);
                if core.finish_local(ticket) {
                    reply.send(frame);
                } else {
                    debug!(
                        target: CORE_TARGET,
                        peer = %peer,
                        request_id,
                        "dropped answer for a request on a closed transport"
                    );
                }
            });
        if let Err(error) = spawned {
            warn!(target: CORE_TARGET, error = %error, "failed to spawn dispatch thread");
            if !self.finish_local(ticket) {
                return;
            }
            failure_path.send(Frame::failure(
                request_id,
                ResultCode::Error,
                "listener could not schedule the request",
            ));
        }
    }

    fn on_response(
        &self,
        link: &PeerLink,
        minted: RequestId,
        result: ResultCode,
        body: Option<ResponseBody>,
        detail: Option<String>,
    ) {
        let Some(responder) = link.client else {
            debug!(
                target: CORE_TARGET,
                request_id = minted,
                "response from unregistered connection"
            );
            return;
        };
        let completed = self
            .lock_pending()
            .ok()
            .and_then(|mut pending| pending.complete(minted, responder));
        let Some(request) = completed else {
            debug!(
                target: CORE_TARGET,
                client_id = %responder,
                request_id = minted,
                "dropped unsolicited response"
            );
            return;
        };
        let frame = Frame::Response {
            request_id: request.origin_request,
            result,
            body,
            detail,
        };
        if !self.deliver_to_client(request.origin, frame) {
            debug!(
                target: CORE_TARGET,
                client_id = %request.origin,
                "requesting client left before the response arrived"
            );
        }
    }

    fn on_message(
        &self,
        link: &PeerLink,
        destination: ClientId,
        payload: serde_json::Value,
        reply: &ReplyPath,
    ) {
        let Some(source) = link.client else {
            reply.send(not_registered());
            return;
        };
        let frame = Frame::Message {
            source: Some(source),
            destination,
            payload,
        };
        if !self.deliver_to_client(destination, frame) {
            reply.send(Frame::error(
                ResultCode::NotConnected,
                format!("client {destination} is not connected"),
            ));
        }
    }

    fn on_disconnect(&self, peer: PeerId, relay: Option<u32>) {
        let departures = {
            let Ok(mut guard) = self.write_state() else {
                return;
            };
            let state = &mut *guard;
            let Some(client) = state
                .peers
                .get_mut(&peer)
                .and_then(|entry| entry.clients.remove(&relay))
            else {
                debug!(
                    target: CORE_TARGET,
                    peer = %peer,
                    "disconnect from unregistered connection"
                );
                return;
            };
            match self.depart(state, &[client]) {
                Ok(departures) => departures,
                Err(error) => {
                    warn!(
                        target: CORE_TARGET,
                        peer = %peer,
                        error = %error,
                        "failed to unregister client"
                    );
                    return;
                }
            }
        };
        self.settle(departures, ResultCode::ClientDisconnected, "client disconnected");
    }
}

fn not_registered() -> Frame {
    Frame::error(ResultCode::NotConnected, "connection has not registered a client")
}
