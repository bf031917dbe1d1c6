//! Structured health reporting for listener lifecycle events.

use std::sync::Arc;

use ddbus_config::Config;

use crate::bootstrap::BootstrapError;
use crate::core::TransportInfo;
use crate::registry::ClientInfo;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
///
/// This is the logging sink the listener core reports connect and
/// disconnect events to. Implementations must not block.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after a transport starts accepting connections.
    fn transport_added(&self, transport: &TransportInfo);

    /// Invoked after a transport has been closed and forgotten.
    fn transport_removed(&self, transport: &TransportInfo);

    /// Invoked when a client registers.
    fn client_registered(&self, client: &ClientInfo);

    /// Invoked when a client unregisters or its connection ends.
    fn client_unregistered(&self, client: &ClientInfo);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn transport_added(&self, transport: &TransportInfo) {
        (**self).transport_added(transport);
    }

    fn transport_removed(&self, transport: &TransportInfo) {
        (**self).transport_removed(transport);
    }

    fn client_registered(&self, client: &ClientInfo) {
        (**self).client_registered(client);
    }

    fn client_unregistered(&self, client: &ClientInfo) {
        (**self).client_unregistered(client);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting listener bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.listen_socket(),
            relay_socket = ?config.relay_socket().map(ToString::to_string),
            server = config.enable_server(),
            restricted_clients = config.enable_restricted_clients(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "listener bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "listener bootstrap failed"
        );
    }

    fn transport_added(&self, transport: &TransportInfo) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "transport_added",
            transport = %transport.name,
            handle = %transport.handle,
            forwarding = transport.forwarding,
            "transport added"
        );
    }

    fn transport_removed(&self, transport: &TransportInfo) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "transport_removed",
            transport = %transport.name,
            handle = %transport.handle,
            "transport removed"
        );
    }

    fn client_registered(&self, client: &ClientInfo) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "client_registered",
            client_id = %client.id,
            process_id = client.process_id,
            "client registered"
        );
    }

    fn client_unregistered(&self, client: &ClientInfo) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "client_unregistered",
            client_id = %client.id,
            name = %client.name,
            "client unregistered"
        );
    }
}
