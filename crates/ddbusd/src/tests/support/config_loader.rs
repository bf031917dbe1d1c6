//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ddbus_config::{Config, SocketEndpoint};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use crate::bootstrap::ConfigLoader;

/// Loader that places the listen socket under a temporary directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    socket_dir: Arc<TempDir>,
    relay_socket: bool,
    relay_upstream: Option<SocketEndpoint>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            socket_dir: Arc::new(dir),
            relay_socket: false,
            relay_upstream: None,
        }
    }

    /// Also configures a forwarding socket beside the listen socket.
    #[must_use]
    pub fn with_relay_socket(mut self) -> Self {
        self.relay_socket = true;
        self
    }

    /// Runs the process as a relay forwarding to `upstream`.
    #[must_use]
    pub fn with_relay_upstream(mut self, upstream: SocketEndpoint) -> Self {
        self.relay_upstream = Some(upstream);
        self
    }

    /// Directory holding the socket and the runtime files.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.socket_dir.path()
    }

    fn socket_path(&self, file: &str) -> String {
        let path: PathBuf = self.runtime_dir().join(file);
        path.to_str()
            .expect("temporary socket path was not valid UTF-8")
            .to_owned()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let relay_socket = self
            .relay_socket
            .then(|| SocketEndpoint::unix(self.socket_path("ddbusd-relay.sock")));
        Ok(Config {
            listen_socket: SocketEndpoint::unix(self.socket_path("ddbusd.sock")),
            relay_socket,
            relay_upstream: self.relay_upstream.clone(),
            enable_restricted_clients: self.relay_socket,
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an unsupported socket scheme.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = [
            OsString::from("ddbusd"),
            OsString::from("--listen-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
