//! Listener bootstrap orchestration.

use std::sync::Arc;

use ddbus_config::{Config, SocketPreparationError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::info;

use crate::core::{CORE_TARGET, ListenerCore, ListenerCreateInfo, RouteError};
use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{SocketTransport, TransportHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the listener configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when any configuration layer is invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out an already resolved configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps a resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare listener socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The listener core could not be created.
    #[error("failed to create listener core: {source}")]
    Core {
        /// Underlying routing error.
        #[source]
        source: RouteError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    core: Arc<ListenerCore>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The listener core built from the configuration.
    #[must_use]
    pub fn core(&self) -> &Arc<ListenerCore> {
        &self.core
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Reporter receiving lifecycle events.
    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn HealthReporter> {
        &self.reporter
    }

    /// Binds the configured sockets and hands them to the core.
    ///
    /// The listen socket is always served; the relay socket, when
    /// configured, is added as a forwarding transport.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when a socket cannot be bound or the core
    /// refuses the transport. Transports added before the failure stay
    /// managed until [`Self::shutdown`].
    pub fn attach_configured_transports(&self) -> Result<Vec<TransportHandle>, RouteError> {
        let listen = self.config.listen_socket();
        let mut handles = vec![
            self.core
                .add_transport(Box::new(SocketTransport::bind(listen.to_string(), listen)?))?,
        ];
        if let Some(relay) = self.config.relay_socket() {
            let transport = SocketTransport::bind_forwarding(relay.to_string(), relay)?;
            handles.push(self.core.add_transport(Box::new(transport))?);
        }
        info!(
            target: CORE_TARGET,
            transports = handles.len(),
            "configured transports attached"
        );
        Ok(handles)
    }

    /// Shuts the listener core down.
    pub fn shutdown(self) {
        self.core.shutdown();
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Daemon")
            .field("config", &self.config)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

/// Bootstraps the listener using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry, socket
/// preparation or core construction fails. Every failure is also reported
/// through `reporter`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    match assemble(loader, &reporter) {
        Ok(daemon) => {
            reporter.bootstrap_succeeded(&daemon.config);
            Ok(daemon)
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn assemble(
    loader: &dyn ConfigLoader,
    reporter: &Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let sockets = std::iter::once(config.listen_socket()).chain(config.relay_socket());
    for endpoint in sockets {
        endpoint
            .prepare_filesystem()
            .map_err(|source| BootstrapError::Socket { source })?;
    }

    let core = ListenerCore::new(
        ListenerCreateInfo::from(&config),
        config.client_manager_name(),
        Arc::clone(reporter),
    )
    .map_err(|source| BootstrapError::Core { source })?;

    Ok(Daemon {
        config,
        core,
        telemetry,
        reporter: Arc::clone(reporter),
    })
}
