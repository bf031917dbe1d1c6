//! Layered configuration for the diagnostic bus listener.
//!
//! Values resolve from built-in defaults, then configuration files, then
//! `DDBUS_*` environment variables, then command-line flags. The later layer
//! wins for every field.

mod defaults;
mod logging;
mod runtime;
mod socket;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CLIENT_MANAGER_NAME, DEFAULT_DESCRIPTION, DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT,
    default_client_manager_name, default_description, default_enable_server,
    default_log_filter, default_log_filter_string, default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{EndpointConflict, SocketEndpoint, SocketParseError, SocketPreparationError};

/// Settings consumed by `ddbusd` at start-up.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "DDBUS")]
pub struct Config {
    /// Endpoint tools connect to.
    #[ortho_config(default = default_socket_endpoint())]
    pub listen_socket: SocketEndpoint,
    /// Optional forwarding endpoint for restricted clients.
    pub relay_socket: Option<SocketEndpoint>,
    /// Upstream listener the relay forwards to.
    pub relay_upstream: Option<SocketEndpoint>,
    /// Free-form description reported by `listener/info`.
    #[ortho_config(default = default_description())]
    pub description: String,
    /// Name reported for the client manager.
    #[ortho_config(default = default_client_manager_name())]
    pub client_manager_name: String,
    /// Registers an in-process host client when set.
    #[ortho_config(default = true)]
    pub enable_server: bool,
    /// Accepts clients arriving through the relay socket.
    #[ortho_config(default = false)]
    pub enable_restricted_clients: bool,
    /// Tracing filter directives.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Trace output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_socket: default_socket_endpoint(),
            relay_socket: None,
            relay_upstream: None,
            description: default_description(),
            client_manager_name: default_client_manager_name(),
            enable_server: default_enable_server(),
            enable_restricted_clients: false,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Endpoint the primary listener binds.
    #[must_use]
    pub fn listen_socket(&self) -> &SocketEndpoint {
        &self.listen_socket
    }

    /// Endpoint the relay proxy binds, when one is configured.
    #[must_use]
    pub fn relay_socket(&self) -> Option<&SocketEndpoint> {
        self.relay_socket.as_ref()
    }

    /// Upstream listener to forward to; when set the process runs as a
    /// relay instead of a listener.
    #[must_use]
    pub fn relay_upstream(&self) -> Option<&SocketEndpoint> {
        self.relay_upstream.as_ref()
    }

    /// Listener description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Client manager name.
    #[must_use]
    pub fn client_manager_name(&self) -> &str {
        &self.client_manager_name
    }

    /// Whether the in-process host client is registered.
    #[must_use]
    pub fn enable_server(&self) -> bool {
        self.enable_server
    }

    /// Whether relayed clients are admitted.
    #[must_use]
    pub fn enable_restricted_clients(&self) -> bool {
        self.enable_restricted_clients
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Trace output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Rejects endpoint combinations no process can serve.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointConflict`] when the relay socket clashes with the
    /// listen socket or a relay would forward to itself.
    pub fn check_endpoints(&self) -> Result<(), EndpointConflict> {
        if let Some(upstream) = self.relay_upstream()
            && upstream.overlaps(self.listen_socket())
        {
            return Err(EndpointConflict::UpstreamLoop {
                upstream: upstream.clone(),
            });
        }
        if let Some(relay) = self.relay_socket()
            && relay.overlaps(self.listen_socket())
        {
            return Err(EndpointConflict::RelaySocket {
                listen: self.listen_socket.clone(),
                relay: relay.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_settings_are_off_by_default() {
        let config = Config::default();
        assert!(config.relay_upstream().is_none());
        assert!(config.relay_socket().is_none());
    }

    #[test]
    fn relay_upstream_is_exposed_when_set() {
        let upstream = SocketEndpoint::tcp("127.0.0.1", 27301);
        let config = Config {
            relay_upstream: Some(upstream.clone()),
            ..Config::default()
        };
        assert_eq!(config.relay_upstream(), Some(&upstream));
    }

    #[test]
    fn default_endpoints_do_not_conflict() {
        assert_eq!(Config::default().check_endpoints(), Ok(()));
    }

    #[test]
    fn relay_sharing_the_listen_socket_is_refused() {
        let config = Config {
            listen_socket: SocketEndpoint::tcp("127.0.0.1", 27300),
            relay_socket: Some(SocketEndpoint::tcp("0.0.0.0", 27300)),
            ..Config::default()
        };
        assert!(matches!(
            config.check_endpoints(),
            Err(EndpointConflict::RelaySocket { .. })
        ));
    }

    #[test]
    fn defaults_describe_the_listener() {
        let config = Config::default();
        assert_eq!(config.description(), "Diagnostic Bus Listener");
        assert_eq!(config.client_manager_name(), "ddbus");
        assert!(config.enable_server());
        assert!(!config.enable_restricted_clients());
        assert_eq!(config.log_format(), LogFormat::Json);
    }
}
