use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// TCP port the listener binds when Unix domain sockets are unavailable.
pub const DEFAULT_TCP_PORT: u16 = 27300;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Human-readable description advertised by the listener.
pub const DEFAULT_DESCRIPTION: &str = "Diagnostic Bus Listener";

/// Name reported by the listener's client manager.
pub const DEFAULT_CLIENT_MANAGER_NAME: &str = "ddbus";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned listener description.
pub fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_owned()
}

/// Owned client manager name.
pub fn default_client_manager_name() -> String {
    DEFAULT_CLIENT_MANAGER_NAME.to_owned()
}

/// Server support is on unless explicitly disabled.
pub fn default_enable_server() -> bool {
    true
}

/// Computes the default endpoint the listener accepts tools on.
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("ddbus");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join("ddbusd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
