//! Tests that exercise the crate's public re-exports.

use std::sync::Arc;

use ddbus_config::Config;
use rstest::rstest;

use crate::{ConfigLoader, ListenerCore, StaticConfigLoader, UriRequest, bootstrap_with};

use super::support::{HealthEvent, RecordingHealthReporter, TestConfigLoader};

#[rstest]
fn bootstrap_with_reexport_initialises_daemon() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());

    let daemon = bootstrap_with(&loader, reporter.clone()).expect("bootstrap should succeed");

    assert!(daemon.config().listen_socket().prepare_filesystem().is_ok());
    let core: &Arc<ListenerCore> = daemon.core();
    assert!(!core.is_shut_down());
    let events = reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapStarting));
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
    daemon.shutdown();
}

#[rstest]
fn static_loader_returns_the_wrapped_configuration() {
    let config = Config {
        description: "Pinned".to_owned(),
        ..Config::default()
    };
    let loader = StaticConfigLoader::new(config.clone());
    assert_eq!(loader.load().expect("static load"), config);
}

#[rstest]
fn uri_request_reexport_parses_lines() {
    let request = UriRequest::parse("listener/info verbose", None).expect("parse");
    assert_eq!(request.service(), "listener");
    assert_eq!(request.command(), "info");
    assert_eq!(request.arguments(), "verbose");
}
