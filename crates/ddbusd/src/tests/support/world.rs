//! Bootstrap scenario world: loader, reporter and the resulting daemon.

use std::cell::RefCell;
use std::sync::Arc;

use ddbus_protocol::{ResponseBody, ResultCode};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};
use crate::core::RouteError;
use crate::transport::TransportHandle;
use crate::uri::{ServiceResponse, UriRequest};

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
    attached: Option<Result<Vec<TransportHandle>, RouteError>>,
    response: Option<ServiceResponse>,
}

impl TestWorld {
    /// Builds a world with a successful configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::new()),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
            attached: None,
            response: None,
        }
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.install(Box::new(FailingConfigLoader));
    }

    /// Installs a loader that succeeds.
    pub fn use_successful_loader(&mut self) {
        self.install(Box::new(TestConfigLoader::new()));
    }

    /// Installs a loader that also configures a forwarding socket.
    pub fn use_relay_loader(&mut self) {
        self.install(Box::new(TestConfigLoader::new().with_relay_socket()));
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.daemon.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        match bootstrap_with(&*self.loader, self.reporter.clone()) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Binds the configured sockets on the running daemon.
    pub fn attach_transports(&mut self) {
        if let Some(daemon) = self.daemon.as_ref() {
            self.attached = Some(daemon.attach_configured_transports());
        }
    }

    /// Dispatches a request line to the daemon's local services.
    pub fn query(&mut self, line: &str) {
        let Some(daemon) = self.daemon.as_ref() else {
            return;
        };
        let request = UriRequest::parse(line, None).expect("request line should parse");
        self.response = Some(daemon.core().dispatch_local(request));
    }

    /// Returns whether bootstrap produced an error.
    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Returns true when the daemon handle is available.
    #[must_use]
    pub fn daemon_started(&self) -> bool {
        self.daemon.is_some()
    }

    /// Number of transports attached by the last attach step.
    #[must_use]
    pub fn attached_count(&self) -> Option<usize> {
        match self.attached.as_ref()? {
            Ok(handles) => Some(handles.len()),
            Err(_) => None,
        }
    }

    /// Text of the last successful service response.
    #[must_use]
    pub fn response_text(&self) -> Option<&str> {
        let response = self.response.as_ref()?;
        if response.result != ResultCode::Success {
            return None;
        }
        response.body.as_ref().and_then(ResponseBody::as_text)
    }

    fn install(&mut self, loader: Box<dyn ConfigLoader>) {
        self.shutdown();
        self.loader = loader;
        self.bootstrap_error = None;
        self.attached = None;
        self.response = None;
    }

    fn shutdown(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            daemon.shutdown();
        }
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Default test world fixture.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
