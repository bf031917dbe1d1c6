//! Supervision of a listener or relay process: the single-instance guard,
//! detaching, and deciding when to stop.

use std::time::Duration;

pub(crate) mod daemonizer;
mod errors;
mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use daemonizer::DaemonizeError;
pub use errors::{FileAction, LaunchError};
pub use launch::{LaunchMode, run_daemon};
pub use shutdown::ShutdownError;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const FOREGROUND_ENV_VAR: &str = "DDBUS_FOREGROUND";
