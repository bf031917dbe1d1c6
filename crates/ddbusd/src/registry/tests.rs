//! Unit tests for the client registry.

use std::collections::HashSet;

use rstest::{fixture, rstest};

use super::*;

fn remote(peer: u64) -> ClientRoute {
    ClientRoute::Remote {
        transport: TransportHandle::new(1),
        peer: PeerId::new(peer),
        relay: None,
    }
}

#[fixture]
fn registry() -> ClientRegistry {
    ClientRegistry::new("ddbus")
}

#[rstest]
fn identifiers_start_at_one_and_are_never_reused(mut registry: ClientRegistry) {
    let mut seen = HashSet::new();
    for round in 0..20_u64 {
        let info = registry
            .register_client(100, remote(round))
            .expect("register");
        assert!(!info.id.is_none());
        assert!(seen.insert(info.id), "identifier {} reused", info.id);
        if round % 3 == 0 {
            registry.unregister(info.id).expect("unregister");
        }
    }
    assert!(seen.contains(&ClientId::new(1)));
}

#[rstest]
fn registration_exhausts_instead_of_wrapping() {
    let mut registry = ClientRegistry::new("ddbus").with_next_id(u32::MAX);
    let last = registry
        .register_client(1, ClientRoute::Local)
        .expect("last identifier");
    assert_eq!(last.id, ClientId::new(u32::MAX));
    let error = registry
        .register_client(1, ClientRoute::Local)
        .expect_err("space exhausted");
    assert_eq!(error, RegistryError::IdentifiersExhausted);
}

#[rstest]
fn identification_is_idempotent_for_identical_metadata(mut registry: ClientRegistry) {
    let info = registry.register_client(7, remote(1)).expect("register");
    assert!(!info.identified);

    let first = registry
        .complete_identification(info.id, "tracer", "trace capture")
        .expect("identify");
    let second = registry
        .complete_identification(info.id, "tracer", "trace capture")
        .expect("repeat identify");
    assert!(first.identified);
    assert_eq!(first, second);
}

#[rstest]
#[case::different_name("viewer", "trace capture")]
#[case::different_description("tracer", "something else")]
fn conflicting_identification_is_rejected(
    mut registry: ClientRegistry,
    #[case] name: &str,
    #[case] description: &str,
) {
    let info = registry.register_client(7, remote(1)).expect("register");
    registry
        .complete_identification(info.id, "tracer", "trace capture")
        .expect("identify");
    let error = registry
        .complete_identification(info.id, name, description)
        .expect_err("conflicting identification");
    assert!(matches!(
        error,
        RegistryError::DuplicateIdentification { ref name, .. } if name == "tracer"
    ));
    assert_eq!(
        registry.get(info.id).map(|client| client.name.as_str()),
        Some("tracer")
    );
}

#[rstest]
fn host_is_designated_once_while_registered(mut registry: ClientRegistry) {
    assert_eq!(registry.host_client_id(), ClientId::NONE);
    let host = registry.register_client(1, ClientRoute::Local).expect("host");
    let other = registry.register_client(2, remote(2)).expect("other");

    registry.designate_host(host.id).expect("designate");
    assert_eq!(
        registry.designate_host(other.id),
        Err(RegistryError::HostAlreadyDesignated { current: host.id })
    );

    registry.unregister(host.id).expect("unregister host");
    assert_eq!(registry.host_client_id(), ClientId::NONE);
    registry.designate_host(other.id).expect("new host");
    assert_eq!(registry.descriptor().host_client_id, other.id);
}

#[rstest]
fn designating_an_unknown_client_fails(mut registry: ClientRegistry) {
    assert_eq!(
        registry.designate_host(ClientId::new(9)),
        Err(RegistryError::UnknownClient {
            id: ClientId::new(9)
        })
    );
}

#[rstest]
fn listings_are_snapshots_in_registration_order(mut registry: ClientRegistry) {
    let alpha = registry.register_client(100, remote(1)).expect("alpha");
    let beta = registry.register_client(200, remote(2)).expect("beta");
    let snapshot = registry.list_clients();

    registry.unregister(alpha.id).expect("unregister alpha");

    let ids: Vec<_> = snapshot.iter().map(|client| client.id).collect();
    assert_eq!(ids, vec![alpha.id, beta.id]);
    assert_eq!(registry.len(), 1);
}

#[rstest]
fn clients_are_grouped_by_transport(mut registry: ClientRegistry) {
    let local = registry.register_client(1, ClientRoute::Local).expect("local");
    let first = registry.register_client(2, remote(1)).expect("first");
    let elsewhere = registry
        .register_client(
            3,
            ClientRoute::Remote {
                transport: TransportHandle::new(2),
                peer: PeerId::new(5),
                relay: Some(1),
            },
        )
        .expect("elsewhere");

    assert_eq!(
        registry.clients_on_transport(TransportHandle::new(1)),
        vec![first.id]
    );
    assert_eq!(
        registry.clients_on_transport(TransportHandle::new(2)),
        vec![elsewhere.id]
    );
    assert_eq!(registry.route(local.id), Some(ClientRoute::Local));
}
