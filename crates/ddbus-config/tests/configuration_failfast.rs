//! Configuration that no listener or relay could serve must fail to load.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ddbus_config::{Config, EndpointConflict, SocketEndpoint};
use once_cell::sync::Lazy;
use ortho_config::{OrthoConfig, OrthoError};
use rstest::rstest;
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Holds one `DDBUS_*` variable for the duration of a test.
struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvOverride {
    fn set(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::env::var_os(key);
        // Restored in `Drop` while the mutex is still held.
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

fn args(extra: &[&str]) -> Vec<OsString> {
    std::iter::once("ddbusd")
        .chain(extra.iter().copied())
        .map(OsString::from)
        .collect()
}

/// Loads from flags alone, keeping other tests' variables out.
fn load_flags(extra: &[&str]) -> Result<Config, Arc<OrthoError>> {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
    Config::load_from_iter(args(extra))
}

#[test]
fn broken_listener_and_relay_files_are_reported_together() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let listener_path = temp_dir.path().join("listener.toml");
    let relay_path = temp_dir.path().join("relay.toml");
    fs::write(
        &listener_path,
        r#"listen_socket = { transport = "tcp" host = "127.0.0.1" }"#,
    )
    .expect("write malformed listener config");
    fs::write(
        &relay_path,
        r#"relay_upstream = { transport = "tcp", port = not_a_number }"#,
    )
    .expect("write malformed relay config");
    let _env = EnvOverride::set("DDBUS_CONFIG_PATH", relay_path.as_os_str());

    let error = Config::load_from_iter(args(&[
        "--config-path",
        listener_path.to_str().expect("utf-8 temp path"),
    ]))
    .expect_err("loading must fail");

    assert!(
        error.to_string().contains("multiple configuration errors"),
        "expected aggregate message, got {error}"
    );
    let OrthoError::Aggregate(aggregate) = error.as_ref() else {
        panic!("expected aggregated error, got {error:?}");
    };
    let mut reported: Vec<_> = aggregate
        .iter()
        .filter_map(|err| match err {
            OrthoError::File { path, .. } => Some(path.clone()),
            _ => None,
        })
        .collect();
    reported.sort();
    let mut expected = vec![listener_path, relay_path];
    expected.sort();
    assert_eq!(reported, expected);
}

#[rstest]
#[case::listen_socket("--listen-socket")]
#[case::relay_socket("--relay-socket")]
#[case::relay_upstream("--relay-upstream")]
fn unsupported_endpoint_schemes_are_rejected(#[case] flag: &str) {
    let error = load_flags(&[flag, "invalid://socket"]).expect_err("unsupported scheme must fail");
    assert!(
        error.to_string().contains("invalid"),
        "error should name the offending value: {error}"
    );
}

#[test]
fn relay_forwarding_to_its_own_socket_is_refused() {
    let config = load_flags(&[
        "--listen-socket",
        "tcp://127.0.0.1:27399",
        "--relay-upstream",
        "tcp://127.0.0.1:27399",
    ])
    .expect("flags parse");
    assert_eq!(
        config.check_endpoints(),
        Err(EndpointConflict::UpstreamLoop {
            upstream: SocketEndpoint::tcp("127.0.0.1", 27399),
        })
    );
}

#[test]
fn unknown_log_format_is_rejected() {
    let _env = EnvOverride::set("DDBUS_LOG_FORMAT", OsStr::new("yaml"));
    let error = Config::load_from_iter(args(&[])).expect_err("unknown format must fail");
    assert!(!error.to_string().is_empty());
}
