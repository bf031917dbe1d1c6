//! Requests awaiting an answer: forwarded between clients, or running on a
//! local dispatch thread.

use std::collections::HashMap;

use ddbus_protocol::{ClientId, RequestId};

use crate::transport::PeerId;

/// Origin of a forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PendingRequest {
    pub(super) origin: ClientId,
    pub(super) origin_request: RequestId,
    pub(super) target: ClientId,
}

/// Request answered by the local URI services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LocalRequest {
    pub(super) peer: PeerId,
    pub(super) relay: Option<u32>,
    pub(super) request_id: RequestId,
}

/// Forwarded requests keyed by the id the router minted for them, and local
/// requests keyed by dispatch ticket.
///
/// Whoever removes an entry owns the answer to it.
#[derive(Debug)]
pub(super) struct PendingRequests {
    entries: HashMap<RequestId, PendingRequest>,
    next_id: RequestId,
    local: HashMap<u64, LocalRequest>,
    next_ticket: u64,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            local: HashMap::new(),
            next_ticket: 1,
        }
    }
}

impl PendingRequests {
    /// Records a forwarded request and returns the id used on the wire.
    pub(super) fn insert(&mut self, request: PendingRequest) -> RequestId {
        let minted = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.entries.insert(minted, request);
        minted
    }

    /// Resolves a response from `responder`. Responses from any other
    /// client are ignored.
    pub(super) fn complete(
        &mut self,
        minted: RequestId,
        responder: ClientId,
    ) -> Option<PendingRequest> {
        match self.entries.get(&minted) {
            Some(entry) if entry.target == responder => self.entries.remove(&minted),
            _ => None,
        }
    }

    /// Removes every request that involves one of `clients`, either as
    /// origin or target.
    pub(super) fn drain_involving(&mut self, clients: &[ClientId]) -> Vec<PendingRequest> {
        let minted: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| clients.contains(&entry.origin) || clients.contains(&entry.target))
            .map(|(id, _)| *id)
            .collect();
        minted
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    pub(super) fn drain_all(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Records a request handed to a dispatch thread.
    pub(super) fn begin_local(&mut self, request: LocalRequest) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1).max(1);
        self.local.insert(ticket, request);
        ticket
    }

    /// Returns `true` when the dispatch thread still owns the answer.
    pub(super) fn finish_local(&mut self, ticket: u64) -> bool {
        self.local.remove(&ticket).is_some()
    }

    /// Takes every local request that arrived on one of `peers`.
    pub(super) fn drain_local_on(&mut self, peers: &[PeerId]) -> Vec<LocalRequest> {
        let tickets: Vec<u64> = self
            .local
            .iter()
            .filter(|(_, request)| peers.contains(&request.peer))
            .map(|(ticket, _)| *ticket)
            .collect();
        tickets
            .into_iter()
            .filter_map(|ticket| self.local.remove(&ticket))
            .collect()
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }
}
