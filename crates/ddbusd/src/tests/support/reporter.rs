//! Test double for [`HealthReporter`] that records structured events for assertions.
//!
//! The recorder captures the listener lifecycle telemetry emitted during
//! bootstrap and routing so behaviour tests can validate observable events.

use std::sync::Mutex;

use ddbus_config::Config;
use ddbus_protocol::ClientId;

use crate::bootstrap::BootstrapError;
use crate::core::TransportInfo;
use crate::health::HealthReporter;
use crate::registry::ClientInfo;
use crate::transport::TransportHandle;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// A transport started.
    TransportAdded { handle: TransportHandle, name: String },
    /// A transport was removed.
    TransportRemoved(TransportHandle),
    /// A client registered.
    ClientRegistered(ClientId),
    /// A client unregistered.
    ClientUnregistered(ClientId),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn transport_added(&self, transport: &TransportInfo) {
        self.record(HealthEvent::TransportAdded {
            handle: transport.handle,
            name: transport.name.clone(),
        });
    }

    fn transport_removed(&self, transport: &TransportInfo) {
        self.record(HealthEvent::TransportRemoved(transport.handle));
    }

    fn client_registered(&self, client: &ClientInfo) {
        self.record(HealthEvent::ClientRegistered(client.id));
    }

    fn client_unregistered(&self, client: &ClientInfo) {
        self.record(HealthEvent::ClientUnregistered(client.id));
    }
}
